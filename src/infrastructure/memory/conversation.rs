use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::clock::to_chrono;
use crate::domain::{
    Clock, ConversationKey, ConversationOverview, ConversationRecord, ConversationSummary,
    Interaction, Message, MessageRole,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Messages retained per conversation after trimming.
    pub max_history: usize,
    /// Idle time after which a conversation is discarded.
    pub ttl: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_history: 20,
            ttl: Duration::from_secs(30 * 60),
        }
    }
}

/// Bounded, expiring message history keyed by (user, agent).
///
/// A conversation expires once it has been idle for longer than the
/// configured TTL. Expired conversations are dropped when read, when
/// written, and by the sweep that runs after every `add`.
pub struct ConversationMemory {
    records: HashMap<ConversationKey, ConversationRecord>,
    config: MemoryConfig,
    clock: Arc<dyn Clock>,
}

impl ConversationMemory {
    pub fn new(config: MemoryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: HashMap::new(),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Appends the user message and the assistant reply, trims the
    /// history and sweeps expired conversations.
    pub fn add(&mut self, user_id: &str, agent_id: &str, interaction: Interaction) {
        let now = self.clock.now();
        let timestamp = interaction.timestamp.unwrap_or(now);
        let max_history = self.config.max_history;

        let record = self.live_record_mut(ConversationKey::new(user_id, agent_id), now);
        record.push(Message::new(MessageRole::User, interaction.user, timestamp), now);
        record.push(
            Message::new(MessageRole::Assistant, interaction.assistant, timestamp),
            now,
        );
        record.trim(max_history);

        self.cleanup_expired();
    }

    /// Appends a system message. System messages are never trimmed.
    pub fn add_system(&mut self, user_id: &str, agent_id: &str, content: impl Into<String>) {
        let now = self.clock.now();
        let max_history = self.config.max_history;

        let record = self.live_record_mut(ConversationKey::new(user_id, agent_id), now);
        record.push(Message::new(MessageRole::System, content, now), now);
        record.trim(max_history);
    }

    pub fn get(&mut self, user_id: &str, agent_id: &str) -> Option<&ConversationRecord> {
        let key = ConversationKey::new(user_id, agent_id);
        let now = self.clock.now();

        if self.is_expired(self.records.get(&key)?, now) {
            tracing::debug!(conversation = %key, "conversation expired on read");
            self.records.remove(&key);
            return None;
        }

        self.records.get(&key)
    }

    pub fn clear(&mut self, user_id: &str, agent_id: &str) -> bool {
        self.records
            .remove(&ConversationKey::new(user_id, agent_id))
            .is_some()
    }

    pub fn clear_all(&mut self) {
        self.records.clear();
    }

    pub fn get_summary(&mut self, user_id: &str, agent_id: &str) -> ConversationSummary {
        let now = self.clock.now();
        let ttl = to_chrono(self.config.ttl);

        match self.get(user_id, agent_id) {
            Some(record) if !record.messages.is_empty() => ConversationSummary {
                exists: true,
                message_count: record.metadata.message_count,
                duration_seconds: record.duration_seconds(),
                created_at: Some(record.metadata.created_at),
                updated_at: Some(record.metadata.updated_at),
                active: now - record.metadata.updated_at <= ttl,
            },
            _ => ConversationSummary::missing(),
        }
    }

    /// Live conversations, most recently updated first. Does not prune.
    pub fn get_all_conversations(&self) -> Vec<ConversationOverview> {
        let now = self.clock.now();

        let mut all: Vec<ConversationOverview> = self
            .records
            .iter()
            .filter(|(_, record)| !self.is_expired(record, now))
            .map(|(key, record)| ConversationOverview {
                user_id: key.user_id.clone(),
                agent_id: key.agent_id.clone(),
                message_count: record.metadata.message_count,
                updated_at: record.metadata.updated_at,
            })
            .collect();

        all.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        all
    }

    /// Drops every expired conversation and returns how many were removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = self.clock.now();
        let ttl = to_chrono(self.config.ttl);
        let before = self.records.len();

        self.records
            .retain(|_, record| now - record.metadata.updated_at <= ttl);

        let removed = before - self.records.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.records.len(), "conversation sweep");
        }
        removed
    }

    /// Stored conversations, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn is_expired(&self, record: &ConversationRecord, now: DateTime<Utc>) -> bool {
        now - record.metadata.updated_at > to_chrono(self.config.ttl)
    }

    /// The record for `key`, replacing it with a fresh one if it expired.
    fn live_record_mut(&mut self, key: ConversationKey, now: DateTime<Utc>) -> &mut ConversationRecord {
        if self
            .records
            .get(&key)
            .is_some_and(|record| self.is_expired(record, now))
        {
            self.records.remove(&key);
        }

        self.records
            .entry(key)
            .or_insert_with(|| ConversationRecord::new(now))
    }
}
