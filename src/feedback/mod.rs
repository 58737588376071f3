//! Classifies thumbs-down ratings and triggers the appropriate admin
//! action. An in-process `tokio::sync::mpsc` consumer task: no new
//! infrastructure dependency such as a Postgres `LISTEN`/`NOTIFY` listener
//! crate is needed. The rating-insert code path sends a
//! [`NegativeRatingEvent`] and returns immediately; this module owns the
//! consumer loop that classifies the rating and records the outcome, with
//! manual exponential backoff on retry matching the style used for
//! embedding retries in `ingestion`.

use crate::context::SourceSnapshot;
use crate::db::models::{AdminAction, ThumbsDownClassification};
use crate::db::repository::{ConversationRepository, QualityRepository, RatingRepository};
use crate::error::Result;
use crate::llm::{ChatMessage, LLMClient, ToolChoice};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Enqueued by the rating-insert code path on every thumbs-down.
#[derive(Debug, Clone, Copy)]
pub struct NegativeRatingEvent {
    pub rating_id: Uuid,
}

/// The parsed shape of the LLM's classification response.
#[derive(Debug, Deserialize)]
struct ClassificationPayload {
    classification: ThumbsDownClassification,
    confidence: f32,
    reasoning: String,
    #[serde(default)]
    suggested_reformulation: Option<String>,
    #[serde(default)]
    missing_info_details: Option<String>,
}

/// A parse failure degrades to this fixed payload rather than failing
/// the analysis outright.
fn fallback_payload(parse_error: &str) -> ClassificationPayload {
    ClassificationPayload {
        classification: ThumbsDownClassification::BadAnswer,
        confidence: 0.5,
        reasoning: format!("classification response was not valid JSON: {parse_error}"),
        suggested_reformulation: None,
        missing_info_details: None,
    }
}

/// Fixed classification -> admin-action mapping.
fn admin_action_for(classification: ThumbsDownClassification) -> AdminAction {
    match classification {
        ThumbsDownClassification::BadQuestion => AdminAction::ContactUser,
        ThumbsDownClassification::MissingSources => AdminAction::MarkForReingestion,
        ThumbsDownClassification::UnrealisticExpectations => AdminAction::Ignore,
        ThumbsDownClassification::BadAnswer => AdminAction::Pending,
    }
}

pub struct FeedbackAnalyzer {
    ratings: RatingRepository,
    conversations: ConversationRepository,
    quality: QualityRepository,
    llm: Box<dyn LLMClient>,
    llm_timeout: Duration,
    confidence_threshold: f32,
    max_retries: u32,
}

impl FeedbackAnalyzer {
    pub fn new(
        ratings: RatingRepository,
        conversations: ConversationRepository,
        quality: QualityRepository,
        llm: Box<dyn LLMClient>,
        llm_timeout: Duration,
        confidence_threshold: f32,
        max_retries: u32,
    ) -> Self {
        Self { ratings, conversations, quality, llm, llm_timeout, confidence_threshold, max_retries }
    }

    /// Spawn the consumer task and hand back the sender half the
    /// rating-insert path enqueues events on. Consuming `self` means the
    /// analyzer only exists inside its own task — there is no shared
    /// mutable state to guard.
    pub fn spawn(self) -> mpsc::UnboundedSender<NegativeRatingEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = self.analyze_with_retry(event.rating_id).await {
                    tracing::warn!(rating_id = %event.rating_id, error = %e, "feedback analysis permanently failed, recording for admin review");
                    if let Err(record_err) = self.record_permanent_failure(event.rating_id, &e.to_string()).await {
                        tracing::error!(rating_id = %event.rating_id, error = %record_err, "could not record feedback analysis failure");
                    }
                }
            }
        });
        tx
    }

    /// Retry on analyzer failure with the same manual exponential-backoff
    /// shape as `ingestion::embed_with_retry`, up to `max_retries`.
    async fn analyze_with_retry(&self, rating_id: Uuid) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.analyze(rating_id).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = Duration::from_millis(200 * 2u64.pow(attempt));
                    tracing::warn!(rating_id = %rating_id, attempt, error = %e, "feedback analysis failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn analyze(&self, rating_id: Uuid) -> Result<()> {
        let Some(rating) = self.ratings.get(rating_id).await? else {
            // The rating was cancelled or never existed by the time the
            // consumer caught up; not an error.
            return Ok(());
        };

        let Some(assistant_message) = self.conversations.get_message(rating.message_id).await? else {
            return Ok(());
        };
        let user_question = self
            .conversations
            .preceding_message(rating.message_id)
            .await?
            .map(|m| m.content)
            .unwrap_or_default();

        let sources: Vec<SourceSnapshot> = assistant_message
            .sources
            .as_ref()
            .and_then(|json| serde_json::from_value(json.clone()).ok())
            .unwrap_or_default();

        let prompt = classification_prompt(
            &user_question,
            &assistant_message.content,
            &sources,
            rating.feedback_text.as_deref(),
        );

        let response = self
            .llm
            .complete(&[ChatMessage::user(prompt)], None, Some(ToolChoice::None), 0.0, self.llm_timeout)
            .await?;
        let raw = response.content.unwrap_or_default();
        let payload = match serde_json::from_str::<ClassificationPayload>(&raw) {
            Ok(p) => p,
            Err(e) => fallback_payload(&e.to_string()),
        };

        let needs_admin_review = payload.confidence < self.confidence_threshold;
        // Only a classification the model is actually confident about gets
        // an automatic action; below threshold it stays `Pending`, awaiting
        // a human reviewer instead of e.g. triggering re-ingestion on a
        // guess.
        let admin_action = if payload.confidence >= self.confidence_threshold {
            admin_action_for(payload.classification)
        } else {
            AdminAction::Pending
        };

        self.ratings
            .insert_validation(
                rating_id,
                &user_question,
                &assistant_message.content,
                assistant_message.sources.clone(),
                payload.classification,
                payload.confidence,
                &payload.reasoning,
                payload.suggested_reformulation.as_deref(),
                payload.missing_info_details.as_deref(),
                needs_admin_review,
                admin_action,
            )
            .await?;

        match admin_action {
            AdminAction::MarkForReingestion => self.mark_documents_for_reingestion(&sources, &payload.reasoning).await?,
            AdminAction::ContactUser => self.notify_user(&assistant_message, &payload.reasoning).await?,
            AdminAction::Ignore | AdminAction::Pending => {}
        }

        Ok(())
    }

    /// Mark every distinct document cited in the answer's sources as
    /// needing re-ingestion.
    async fn mark_documents_for_reingestion(&self, sources: &[SourceSnapshot], reason: &str) -> Result<()> {
        let mut seen = HashSet::new();
        for source in sources {
            if seen.insert(source.document_id) {
                self.quality.mark_needs_reingestion(source.document_id, reason).await?;
            }
        }
        Ok(())
    }

    /// Surface a notification to the user who asked the question.
    async fn notify_user(&self, assistant_message: &crate::db::models::Message, reasoning: &str) -> Result<()> {
        let Some(conversation) = self.conversations.get(assistant_message.conversation_id).await? else {
            return Ok(());
        };
        self.ratings
            .insert_notification(
                conversation.user_id,
                "thumbs_down_follow_up",
                &pedagogical_hint(reasoning),
            )
            .await?;
        Ok(())
    }

    /// On permanent analyzer failure (retries exhausted), still leave a
    /// record behind rather than silently dropping the rating — a
    /// `needs_admin_review` row carrying the error in `reasoning`.
    async fn record_permanent_failure(&self, rating_id: Uuid, error: &str) -> Result<()> {
        let Some(rating) = self.ratings.get(rating_id).await? else {
            return Ok(());
        };
        let Some(assistant_message) = self.conversations.get_message(rating.message_id).await? else {
            return Ok(());
        };
        let user_question = self
            .conversations
            .preceding_message(rating.message_id)
            .await?
            .map(|m| m.content)
            .unwrap_or_default();

        self.ratings
            .insert_validation(
                rating_id,
                &user_question,
                &assistant_message.content,
                assistant_message.sources.clone(),
                ThumbsDownClassification::BadAnswer,
                0.0,
                &format!("feedback analysis failed permanently: {error}"),
                None,
                None,
                true,
                AdminAction::Pending,
            )
            .await?;
        Ok(())
    }
}

/// Detected kind of question-phrasing issue, driving which pedagogical hint
/// `pedagogical_hint` produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhrasingIssue {
    Spelling,
    Vagueness,
    Grammar,
    Other,
}

/// Keyword match on the model's reasoning text to pick a phrasing-issue
/// category. Checked in a fixed order since a reasoning string can mention
/// more than one symptom.
fn detect_phrasing_issue(reasoning: &str) -> PhrasingIssue {
    let lower = reasoning.to_lowercase();
    const SPELLING_MARKERS: &[&str] = &["orthograph", "faute de frappe", "mal écrit", "mal orthographié"];
    const VAGUENESS_MARKERS: &[&str] = &["vague", "imprécis", "ambigu", "manque de détail", "trop générale"];
    const GRAMMAR_MARKERS: &[&str] = &["grammair", "syntaxe", "mal construite", "agrammatical"];

    if SPELLING_MARKERS.iter().any(|m| lower.contains(m)) {
        PhrasingIssue::Spelling
    } else if VAGUENESS_MARKERS.iter().any(|m| lower.contains(m)) {
        PhrasingIssue::Vagueness
    } else if GRAMMAR_MARKERS.iter().any(|m| lower.contains(m)) {
        PhrasingIssue::Grammar
    } else {
        PhrasingIssue::Other
    }
}

/// A French follow-up message tailored to the detected phrasing issue
/// rather than one fixed template for every `bad_question` classification.
fn pedagogical_hint(reasoning: &str) -> String {
    match detect_phrasing_issue(reasoning) {
        PhrasingIssue::Spelling => format!(
            "Votre question contient peut-être une faute d'orthographe qui a gêné la recherche : {reasoning}. \
             Essayez de la reformuler avec les mots corrigés."
        ),
        PhrasingIssue::Vagueness => format!(
            "Votre question mérite d'être précisée : {reasoning}. \
             Ajoutez un contexte ou un exemple concret pour aider à trouver la bonne réponse."
        ),
        PhrasingIssue::Grammar => format!(
            "La formulation de votre question a pu nuire à la recherche : {reasoning}. \
             Essayez de la reformuler avec une phrase plus simple."
        ),
        PhrasingIssue::Other => format!("Votre question mérite d'être reformulée : {reasoning}"),
    }
}

/// Build the classification prompt listing the four categories.
fn classification_prompt(
    user_question: &str,
    assistant_response: &str,
    sources: &[SourceSnapshot],
    feedback_text: Option<&str>,
) -> String {
    let source_count = sources.len();
    let feedback = feedback_text.unwrap_or("(aucun commentaire)");
    format!(
        "Un utilisateur a donné un avis négatif sur la réponse suivante. \
         Classe ce retour dans l'une de ces quatre catégories exactement : \
         bad_question, bad_answer, missing_sources, unrealistic_expectations. \
         Réponds uniquement avec un objet JSON des champs classification, \
         confidence (0-1), reasoning, suggested_reformulation, missing_info_details.\n\n\
         Question : {user_question}\n\
         Réponse : {assistant_response}\n\
         Nombre de sources citées : {source_count}\n\
         Commentaire utilisateur : {feedback}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_action_mapping_matches_classification_table() {
        assert_eq!(admin_action_for(ThumbsDownClassification::BadQuestion), AdminAction::ContactUser);
        assert_eq!(admin_action_for(ThumbsDownClassification::MissingSources), AdminAction::MarkForReingestion);
        assert_eq!(admin_action_for(ThumbsDownClassification::UnrealisticExpectations), AdminAction::Ignore);
        assert_eq!(admin_action_for(ThumbsDownClassification::BadAnswer), AdminAction::Pending);
    }

    #[test]
    fn fallback_payload_defaults_to_bad_answer_with_half_confidence() {
        let payload = fallback_payload("unexpected token");
        assert_eq!(payload.classification, ThumbsDownClassification::BadAnswer);
        assert_eq!(payload.confidence, 0.5);
        assert!(payload.reasoning.contains("unexpected token"));
    }

    #[test]
    fn classification_payload_parses_expected_shape() {
        let raw = r#"{"classification":"missing_sources","confidence":0.9,"reasoning":"no chunk covered this"}"#;
        let parsed: ClassificationPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.classification, ThumbsDownClassification::MissingSources);
        assert!(parsed.suggested_reformulation.is_none());
    }

    #[test]
    fn classification_prompt_lists_all_four_categories() {
        let prompt = classification_prompt("q", "a", &[], None);
        for category in ["bad_question", "bad_answer", "missing_sources", "unrealistic_expectations"] {
            assert!(prompt.contains(category), "missing {category}");
        }
    }

    #[test]
    fn detect_phrasing_issue_matches_spelling_markers() {
        assert_eq!(
            detect_phrasing_issue("la question contient une faute de frappe sur le mot RTT"),
            PhrasingIssue::Spelling
        );
    }

    #[test]
    fn detect_phrasing_issue_matches_vagueness_markers() {
        assert_eq!(
            detect_phrasing_issue("la question est trop vague pour identifier le document visé"),
            PhrasingIssue::Vagueness
        );
    }

    #[test]
    fn detect_phrasing_issue_matches_grammar_markers() {
        assert_eq!(
            detect_phrasing_issue("la phrase est mal construite, la syntaxe gêne la recherche"),
            PhrasingIssue::Grammar
        );
    }

    #[test]
    fn detect_phrasing_issue_defaults_to_other() {
        assert_eq!(detect_phrasing_issue("la question porte sur un sujet hors périmètre"), PhrasingIssue::Other);
    }

    #[test]
    fn pedagogical_hint_varies_by_issue_type() {
        let spelling = pedagogical_hint("faute de frappe sur RTT");
        let vague = pedagogical_hint("question trop vague");
        assert!(spelling.contains("faute d'orthographe"));
        assert!(vague.contains("précisée"));
        assert_ne!(spelling, vague);
    }
}
