//! French query preprocessing: stopword removal for the keyword-search
//! tsquery, an adaptive α heuristic for weighting dense vs. keyword scores,
//! and contextual-reference detection feeding reformulation. Pure functions
//! over `&str` returning a plain struct, tested table-driven.

mod stopwords;

use crate::llm::{ChatMessage, LLMClient};
use crate::error::Result;
use regex::Regex;
use std::sync::OnceLock;

pub use stopwords::is_french_stopword;

/// Output of query preprocessing, handed to the retrieval engine and the
/// embedding client.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedQuery {
    /// `None` when the tsquery would be empty after stopword removal —
    /// signals "keyword search disabled for this query" rather than
    /// producing a wildcard.
    pub tsquery_text: Option<String>,
    /// Weight given to the dense-vector score in RRF fusion.
    pub adaptive_alpha: f32,
    /// The text actually sent to the embedding service — identical to the
    /// raw (or reformulated) query; kept as a distinct field since callers
    /// that reformulate pass the reformulated form through here.
    pub enriched_query_for_embedding: String,
}

/// Strength of a contextual reference detected in a query, used to decide
/// whether reformulation against conversation history is worthwhile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceStrength {
    /// Feminine/masculine demonstrative pronoun ("celui", "celle", ...).
    Strong,
    /// Neuter demonstrative ("ça", "cela", "ce"), only counted when the
    /// query is short (<8 tokens).
    Medium,
    /// A personal pronoun ("il", "elle", ...) occupying the first token.
    PronounFirst,
}

const WH_WORDS: &[&str] = &[
    "qui", "que", "quoi", "quel", "quelle", "quels", "quelles", "où", "quand", "pourquoi",
    "comment",
];

const STRONG_DEMONSTRATIVES: &[&str] = &["celui", "celle", "ceux", "celles"];
const MEDIUM_DEMONSTRATIVES: &[&str] = &["ça", "cela", "ce"];
const FIRST_POSITION_PRONOUNS: &[&str] = &["il", "elle", "ils", "elles"];
// Bare articles must never be mistaken for a contextual reference.
const BARE_ARTICLES: &[&str] = &["le", "la", "les"];

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}]+(?:[-.'][\p{L}\p{N}]+)*").unwrap())
}

fn tokenize(query: &str) -> Vec<&str> {
    word_regex().find_iter(query).map(|m| m.as_str()).collect()
}

fn is_acronym(token: &str) -> bool {
    token.chars().count() >= 2 && token.chars().all(|c| !c.is_alphabetic() || c.is_uppercase())
        && token.chars().any(|c| c.is_alphabetic())
}

fn is_capitalized(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) if first.is_uppercase() => {
            token.chars().count() >= 2 && chars.all(|c| !c.is_alphabetic() || c.is_lowercase())
        }
        _ => false,
    }
}

/// Build the French tsquery text and the adaptive α for a raw user query.
/// Pure function — no I/O, no LLM call.
pub fn process(query: &str) -> PreprocessedQuery {
    let tokens = tokenize(query);

    let tsquery_text = build_tsquery(&tokens);
    let adaptive_alpha = adaptive_alpha(query, &tokens);

    PreprocessedQuery {
        tsquery_text,
        adaptive_alpha,
        enriched_query_for_embedding: query.to_string(),
    }
}

fn build_tsquery(tokens: &[&str]) -> Option<String> {
    let mut surviving = Vec::new();
    for token in tokens {
        let lower = token.to_lowercase();
        if is_french_stopword(&lower) {
            continue;
        }
        let preserved = if (is_acronym(token) || is_capitalized(token)) && token.chars().count() >= 2 {
            token.to_string()
        } else {
            lower
        };
        surviving.push(preserved);
    }

    if surviving.is_empty() {
        None
    } else {
        Some(surviving.join(" & "))
    }
}

/// The adaptive-α table: most-specific rule wins, ties toward the lower
/// (keyword-biased) α.
fn adaptive_alpha(raw_query: &str, tokens: &[&str]) -> f32 {
    let has_acronym = tokens.iter().any(|t| is_acronym(t));
    let has_non_initial_capitalized = tokens
        .iter()
        .enumerate()
        .any(|(i, t)| i > 0 && is_capitalized(t));

    if has_acronym || has_non_initial_capitalized {
        return 0.3;
    }

    let lower_query = raw_query.to_lowercase();
    let has_wh_word = WH_WORDS.iter().any(|w| {
        tokens
            .iter()
            .any(|t| t.to_lowercase() == *w)
            || lower_query.contains(w)
    });
    if tokens.len() >= 12 && has_wh_word {
        return 0.7;
    }

    if tokens.len() <= 3 {
        return 0.4;
    }

    0.5
}

/// Detect a contextual reference in `query` at one of three strengths.
/// Bare articles never qualify.
pub fn detect_contextual_reference(query: &str) -> Option<ReferenceStrength> {
    let tokens = tokenize(query);
    let lower: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();

    if let Some(first) = lower.first() {
        if BARE_ARTICLES.contains(&first.as_str()) {
            // A bare leading article alone is not a reference; fall through
            // to check the remaining rules normally.
        } else if FIRST_POSITION_PRONOUNS.contains(&first.as_str()) {
            return Some(ReferenceStrength::PronounFirst);
        }
    }

    if lower.iter().any(|t| STRONG_DEMONSTRATIVES.contains(&t.as_str())) {
        return Some(ReferenceStrength::Strong);
    }

    if tokens.len() < 8 && lower.iter().any(|t| MEDIUM_DEMONSTRATIVES.contains(&t.as_str())) {
        return Some(ReferenceStrength::Medium);
    }

    None
}

/// Invoke the LLM with a dedicated reformulation prompt over the last ≤3
/// message pairs to turn a context-dependent query into a standalone
/// question. Only called when tool-calling is active and
/// [`detect_contextual_reference`] found something to resolve.
pub async fn reformulate(
    llm: &dyn LLMClient,
    history: &[ChatMessage],
    query: &str,
) -> Result<String> {
    let window: Vec<&ChatMessage> = history
        .iter()
        .rev()
        .filter(|m| matches!(m.role, crate::llm::Role::User | crate::llm::Role::Assistant))
        .take(6)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    let mut transcript = String::new();
    for message in &window {
        let role = match message.role {
            crate::llm::Role::User => "Utilisateur",
            crate::llm::Role::Assistant => "Assistant",
            _ => continue,
        };
        if let Some(content) = &message.content {
            transcript.push_str(&format!("{role}: {content}\n"));
        }
    }

    let system = ChatMessage::system(
        "Tu reformules la question de l'utilisateur pour qu'elle soit autonome, \
         sans référence implicite à la conversation précédente. Réponds \
         uniquement avec la question reformulée, sans préambule.",
    );
    let user = ChatMessage::user(format!(
        "Historique de conversation:\n{transcript}\nQuestion actuelle: {query}\n\nQuestion reformulée:"
    ));

    let response = llm
        .complete(&[system, user], None, None, 0.0, std::time::Duration::from_secs(30))
        .await?;

    Ok(response
        .content
        .unwrap_or_else(|| query.to_string())
        .trim()
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("le la les", true)]
    #[case("procédure RTT", false)]
    fn empty_tsquery_when_all_stopwords(#[case] query: &str, #[case] expect_empty: bool) {
        let result = process(query);
        assert_eq!(result.tsquery_text.is_none(), expect_empty);
    }

    #[test]
    fn preserves_acronym_casing_in_tsquery() {
        let result = process("procédure RTT");
        let tsquery = result.tsquery_text.unwrap();
        assert!(tsquery.contains("RTT"));
        assert!(!tsquery.contains("rtt"));
    }

    #[rstest]
    #[case("procédure RTT", 0.3)]
    #[case("le la les", 0.4)]
    #[case("Pourquoi est-ce que le télétravail pour les cadres nécessite un accord écrit ?", 0.7)]
    #[case("télétravail accord préalable entreprise", 0.5)]
    fn adaptive_alpha_matches_table(#[case] query: &str, #[case] expected: f32) {
        let result = process(query);
        assert_eq!(result.adaptive_alpha, expected);
    }

    #[test]
    fn all_caps_query_of_length_three_yields_point_three() {
        // Testable property 11.
        let result = process("RTT ET CONGES");
        assert_eq!(result.adaptive_alpha, 0.3);
    }

    #[test]
    fn bare_articles_are_never_contextual_references() {
        assert_eq!(detect_contextual_reference("le télétravail"), None);
        assert_eq!(detect_contextual_reference("la procédure"), None);
        assert_eq!(detect_contextual_reference("les congés"), None);
    }

    #[test]
    fn strong_demonstrative_detected() {
        assert_eq!(
            detect_contextual_reference("Et celle pour les cadres ?"),
            Some(ReferenceStrength::Strong)
        );
    }

    #[test]
    fn pronoun_in_first_position_detected() {
        assert_eq!(
            detect_contextual_reference("Il concerne qui exactement ?"),
            Some(ReferenceStrength::PronounFirst)
        );
    }

    #[test]
    fn medium_demonstrative_only_fires_under_eight_tokens() {
        assert_eq!(detect_contextual_reference("Et ça marche comment ?"), Some(ReferenceStrength::Medium));
        let long = "Et ça marche comment avec tous les autres services disponibles par ailleurs ?";
        assert_eq!(detect_contextual_reference(long), None);
    }

    #[test]
    fn zero_prior_messages_means_no_reformulation_trigger() {
        // Testable property 12: the orchestrator only reformulates when
        // detect_contextual_reference fires AND history is non-empty; this
        // module only covers the detection half, exercised here with an
        // unambiguous first message.
        assert_eq!(detect_contextual_reference("Qu'est-ce qu'un RTT ?"), None);
    }

    struct ScriptedLLM {
        response: String,
    }

    #[async_trait::async_trait]
    impl crate::llm::LLMClient for ScriptedLLM {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&[crate::llm::ToolDef]>,
            _tool_choice: Option<crate::llm::ToolChoice>,
            _temperature: f32,
            _timeout: std::time::Duration,
        ) -> Result<ChatMessage> {
            Ok(ChatMessage::assistant(self.response.clone()))
        }
    }

    /// End-to-end scenario 4: a contextual-reference query reformulates
    /// against the last few message pairs into a standalone question.
    #[tokio::test]
    async fn reformulate_turns_a_contextual_reference_into_a_standalone_question() {
        assert_eq!(
            detect_contextual_reference("Et celle pour les cadres ?"),
            Some(ReferenceStrength::Strong)
        );

        let llm = ScriptedLLM {
            response: "Quelle est la procédure de télétravail pour les cadres ?".to_string(),
        };
        let history = vec![
            ChatMessage::user("Quelle est la procédure de télétravail ?"),
            ChatMessage::assistant("Le télétravail requiert un accord préalable."),
        ];

        let reformulated = reformulate(&llm, &history, "Et celle pour les cadres ?")
            .await
            .unwrap();

        assert_eq!(reformulated, "Quelle est la procédure de télétravail pour les cadres ?");
    }

    #[tokio::test]
    async fn reformulate_trims_whitespace_from_the_llm_response() {
        let llm = ScriptedLLM { response: "  Quelle est la procédure ?  \n".to_string() };
        let reformulated = reformulate(&llm, &[], "celle-ci ?").await.unwrap();
        assert_eq!(reformulated, "Quelle est la procédure ?");
    }
}
