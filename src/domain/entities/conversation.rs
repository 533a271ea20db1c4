use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one conversation: a user talking to a specific agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub user_id: String,
    pub agent_id: String,
}

impl ConversationKey {
    pub fn new(user_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            agent_id: agent_id.into(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.agent_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "System",
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

/// One user turn and the assistant's reply to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub user: String,
    pub assistant: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Interaction {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Messages ever added, including ones later trimmed away.
    pub message_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub messages: Vec<Message>,
    pub metadata: ConversationMetadata,
}

impl ConversationRecord {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            messages: Vec::new(),
            metadata: ConversationMetadata {
                created_at: now,
                updated_at: now,
                message_count: 0,
            },
        }
    }

    pub fn push(&mut self, message: Message, now: DateTime<Utc>) {
        self.messages.push(message);
        self.metadata.message_count += 1;
        self.metadata.updated_at = now;
    }

    /// Drops the oldest non-system messages until at most `max_history`
    /// remain. System messages always survive and are moved to the front;
    /// when they alone exceed `max_history` every other message is dropped.
    pub fn trim(&mut self, max_history: usize) {
        if self.messages.len() <= max_history {
            return;
        }

        let (system, other): (Vec<Message>, Vec<Message>) = self
            .messages
            .drain(..)
            .partition(|m| m.role == MessageRole::System);

        let keep = max_history.saturating_sub(system.len());
        let skip = other.len().saturating_sub(keep);

        self.messages = system;
        self.messages.extend(other.into_iter().skip(skip));
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, MessageRole::User))
            .map(|m| m.content.as_str())
    }

    /// The most recent `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn duration_seconds(&self) -> f64 {
        (self.metadata.updated_at - self.metadata.created_at).num_milliseconds() as f64 / 1000.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub exists: bool,
    pub message_count: usize,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl ConversationSummary {
    pub fn missing() -> Self {
        Self {
            exists: false,
            message_count: 0,
            duration_seconds: 0.0,
            created_at: None,
            updated_at: None,
            active: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationOverview {
    pub user_id: String,
    pub agent_id: String,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
}
