use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gavel_judge::Evaluation;
use gavel_provider::HistoryEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// How a turn moves through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    /// Generate and evaluate once, no refinement
    Simple,
    /// Iterative refinement driven by judge feedback
    #[default]
    Feedback,
    /// Feedback mode plus a critique of the user's own message
    InputCritique,
}

impl ConversationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Feedback => "feedback",
            Self::InputCritique => "input_critique",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMeta {
    pub iteration: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub meta: MessageMeta,
}

impl Message {
    pub fn user(content: String) -> Self {
        Self {
            id: new_message_id(),
            role: MessageRole::User,
            content,
            timestamp: Utc::now(),
            meta: MessageMeta::default(),
        }
    }

    pub fn assistant(content: String, iteration: u32, evaluation: Evaluation) -> Self {
        Self {
            id: new_message_id(),
            role: MessageRole::Assistant,
            content,
            timestamp: Utc::now(),
            meta: MessageMeta {
                iteration,
                evaluation: Some(evaluation),
            },
        }
    }
}

pub fn new_conversation_id() -> String {
    format!("conv_{}", short_uuid())
}

fn new_message_id() -> String {
    format!("msg_{}", short_uuid())
}

fn short_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// In-memory state of one conversation. Owned by the handle that serializes
/// pipelines for its id; lives and dies with the process.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
    pub conversation_id: String,
    pub messages: Vec<Message>,
    /// Final iteration count of the last completed turn
    pub iteration: u32,
    pub mode: ConversationMode,
    pub cancelled: bool,
}

impl ConversationState {
    pub fn new(conversation_id: String) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            iteration: 0,
            mode: ConversationMode::default(),
            cancelled: false,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// History formatted for the generation capability.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.messages
            .iter()
            .map(|m| HistoryEntry::new(m.role.as_str(), m.content.clone()))
            .collect()
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
    }

    /// Drop the trailing assistant message, if any. Used by retry.
    pub fn pop_last_assistant(&mut self) -> Option<Message> {
        match self.messages.last() {
            Some(m) if m.role == MessageRole::Assistant => self.messages.pop(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_maps_roles() {
        let mut state = ConversationState::new(new_conversation_id());
        state.push(Message::user("hello".to_string()));

        let history = state.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[0].content, "hello");
    }

    #[test]
    fn test_pop_last_assistant_only_pops_assistant() {
        let mut state = ConversationState::new(new_conversation_id());
        state.push(Message::user("question".to_string()));
        assert!(state.pop_last_assistant().is_none());
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn test_ids_are_prefixed() {
        assert!(new_conversation_id().starts_with("conv_"));
        assert!(Message::user(String::new()).id.starts_with("msg_"));
    }
}
