//! Rewrites an assistant message through a named `response_templates` row
//! before it reaches the user — four fixed placeholders substituted with
//! plain `str::replace`, no templating engine.

use crate::db::models::Message;
use crate::db::repository::{ConversationRepository, TemplateRepository};
use crate::error::{EngineError, Result};
use crate::llm::{ChatMessage, LLMClient, ToolChoice};
use std::time::Duration;
use uuid::Uuid;

/// The outcome of applying a template.
#[derive(Debug, Clone)]
pub struct FormattedResponse {
    pub message_id: Uuid,
    pub template_name: String,
    pub formatted_content: String,
}

pub struct TemplateFormatter {
    templates: TemplateRepository,
    conversations: ConversationRepository,
    llm: Box<dyn LLMClient>,
    llm_timeout: Duration,
}

impl TemplateFormatter {
    pub fn new(
        templates: TemplateRepository,
        conversations: ConversationRepository,
        llm: Box<dyn LLMClient>,
        llm_timeout: Duration,
    ) -> Self {
        Self { templates, conversations, llm, llm_timeout }
    }

    /// Load the named template, substitute its four placeholders, run one
    /// completion over the result, and upsert the formatted output keyed by
    /// `message_id` — re-formatting replaces the prior version rather than
    /// accumulating history.
    #[tracing::instrument(skip(self))]
    pub async fn apply(&self, message_id: Uuid, template_name: &str) -> Result<FormattedResponse> {
        let template = self
            .templates
            .get_by_name(template_name)
            .await?
            .ok_or_else(|| EngineError::DataValidation(format!("no template named {template_name}")))?;

        let message = self
            .conversations
            .get_message(message_id)
            .await?
            .ok_or_else(|| EngineError::DataValidation(format!("no message {message_id}")))?;

        self.conversations
            .get(message.conversation_id)
            .await?
            .ok_or_else(|| EngineError::DataValidation(format!("no conversation {}", message.conversation_id)))?;

        let transcript = self.conversation_transcript(message.conversation_id).await?;
        let substituted = substitute(&template.body, &message, &transcript);

        let response = self
            .llm
            .complete(&[ChatMessage::user(substituted)], None, Some(ToolChoice::None), 0.2, self.llm_timeout)
            .await?;
        let formatted_content = response.content.unwrap_or_default();

        let row = self
            .templates
            .upsert_formatted(message_id, template_name, &formatted_content)
            .await?;

        Ok(FormattedResponse {
            message_id: row.message_id,
            template_name: row.template_name,
            formatted_content: row.formatted_content,
        })
    }

    /// Builds `{conversation_context}`: a formatted transcript of the
    /// conversation so far, not just its title.
    async fn conversation_transcript(&self, conversation_id: Uuid) -> Result<String> {
        let history = self.conversations.recent_messages(conversation_id, 10).await?;
        Ok(format_transcript(&history))
    }
}

fn format_transcript(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "(aucun historique)".to_string();
    }
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                crate::db::models::MessageRole::User => "Utilisateur",
                crate::db::models::MessageRole::Assistant => "Assistant",
                crate::db::models::MessageRole::System => "Système",
                crate::db::models::MessageRole::Tool => "Outil",
            };
            format!("{role}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Four fixed placeholders: `{original_response}`, `{conversation_context}`,
/// `{user_first_name}`, `{user_last_name}`. The name fields are not modeled
/// anywhere in this crate's schema (user identity is an external
/// collaborator's concern), so they substitute to the empty string rather
/// than failing the whole formatting pass.
fn substitute(body: &str, message: &Message, transcript: &str) -> String {
    body.replace("{original_response}", &message.content)
        .replace("{conversation_context}", transcript)
        .replace("{user_first_name}", "")
        .replace("{user_last_name}", "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_message(content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            role: crate::db::models::MessageRole::Assistant,
            content: content.to_string(),
            sources: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn substitute_replaces_original_response_and_context() {
        let message = sample_message("Les RTT sont accordés selon l'ancienneté.");
        let rendered = substitute(
            "Réponse: {original_response}\nContexte: {conversation_context}",
            &message,
            "Utilisateur: Quels sont mes droits aux RTT ?",
        );
        assert_eq!(
            rendered,
            "Réponse: Les RTT sont accordés selon l'ancienneté.\nContexte: Utilisateur: Quels sont mes droits aux RTT ?"
        );
    }

    #[test]
    fn substitute_leaves_name_placeholders_empty() {
        let message = sample_message("x");
        let rendered = substitute("[{user_first_name} {user_last_name}]", &message, "");
        assert_eq!(rendered, "[ ]");
    }

    #[test]
    fn format_transcript_falls_back_for_empty_history() {
        assert_eq!(format_transcript(&[]), "(aucun historique)");
    }

    #[test]
    fn format_transcript_labels_each_role() {
        let messages = vec![
            sample_message_with_role(crate::db::models::MessageRole::User, "Bonjour"),
            sample_message_with_role(crate::db::models::MessageRole::Assistant, "Bonjour aussi"),
        ];
        let transcript = format_transcript(&messages);
        assert!(transcript.contains("Utilisateur: Bonjour"));
        assert!(transcript.contains("Assistant: Bonjour aussi"));
    }

    fn sample_message_with_role(role: crate::db::models::MessageRole, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            role,
            content: content.to_string(),
            sources: None,
            created_at: Utc::now(),
        }
    }
}
