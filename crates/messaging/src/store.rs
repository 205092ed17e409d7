//! In-memory private conversation history.
//!
//! Conversations are keyed by the normalised partner name and hold at most
//! `max_messages` entries; the oldest entry is evicted first. A global id
//! index gives direct access for status and reaction updates, and evicted
//! messages leave it together with their conversation slot.

use std::collections::{HashMap, VecDeque};

use parley_core::event::{ChatMessage, MessageStatus};
use parley_core::identity::normalize_name;
use tracing::{debug, trace};

pub const DEFAULT_MAX_MESSAGES: usize = 50;

#[derive(Debug)]
struct Conversation {
    partner: String,
    ids: VecDeque<String>,
}

#[derive(Debug)]
struct IndexedMessage {
    partner_key: String,
    message: ChatMessage,
}

#[derive(Debug)]
pub struct ConversationStore {
    max_messages: usize,
    conversations: HashMap<String, Conversation>,
    partner_order: Vec<String>,
    index: HashMap<String, IndexedMessage>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl ConversationStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
            conversations: HashMap::new(),
            partner_order: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Messages exchanged with `partner`, registering an empty conversation
    /// the first time a partner is asked for.
    pub fn get(&mut self, partner: &str) -> Vec<ChatMessage> {
        let key = self.ensure(partner);
        self.collect(&key)
    }

    /// Append to the partner's conversation.
    ///
    /// Returns `false` when a message with the same id is already stored.
    pub fn append(&mut self, partner: &str, message: ChatMessage) -> bool {
        if self.index.contains_key(&message.id) {
            debug!(id = %message.id, partner = %partner, "Ignored message with duplicate id");
            return false;
        }

        let key = self.ensure(partner);
        let max_messages = self.max_messages;
        let Some(conversation) = self.conversations.get_mut(&key) else {
            return false;
        };

        conversation.ids.push_back(message.id.clone());
        let mut evicted = Vec::new();
        while conversation.ids.len() > max_messages {
            if let Some(id) = conversation.ids.pop_front() {
                evicted.push(id);
            }
        }

        for id in &evicted {
            self.index.remove(id);
            trace!(id = %id, partner = %partner, "Evicted message");
        }

        self.index.insert(
            message.id.clone(),
            IndexedMessage {
                partner_key: key,
                message,
            },
        );
        true
    }

    pub fn find_by_id(&self, id: &str) -> Option<&ChatMessage> {
        self.index.get(id).map(|entry| &entry.message)
    }

    /// Display name of the partner whose conversation holds `id`.
    pub fn partner_of(&self, id: &str) -> Option<&str> {
        let entry = self.index.get(id)?;
        self.conversations
            .get(&entry.partner_key)
            .map(|conversation| conversation.partner.as_str())
    }

    /// Advance the status of a stored message. Never moves backward.
    pub fn update_status(&mut self, id: &str, status: MessageStatus) -> bool {
        self.index
            .get_mut(id)
            .is_some_and(|entry| entry.message.status.advance(status))
    }

    pub fn add_reaction(&mut self, id: &str, emoji: &str) -> bool {
        self.index
            .get_mut(id)
            .is_some_and(|entry| entry.message.reactions.insert(emoji.to_string()))
    }

    /// Snapshot of the partner's messages, oldest first.
    pub fn messages(&self, partner: &str) -> Vec<ChatMessage> {
        self.collect(&normalize_name(partner))
    }

    pub fn contains(&self, partner: &str) -> bool {
        self.conversations.contains_key(&normalize_name(partner))
    }

    /// Partners in the order their conversations were opened.
    pub fn partners(&self) -> Vec<String> {
        self.partner_order
            .iter()
            .filter_map(|key| self.conversations.get(key))
            .map(|conversation| conversation.partner.clone())
            .collect()
    }

    /// Mark every inbound message from `partner` that is still `Sent` as
    /// `Read`, returning their ids.
    pub fn mark_read_inbound(&mut self, partner: &str) -> Vec<String> {
        let key = normalize_name(partner);
        let Some(conversation) = self.conversations.get(&key) else {
            return Vec::new();
        };

        let mut marked = Vec::new();
        for id in &conversation.ids {
            let Some(entry) = self.index.get_mut(id) else {
                continue;
            };
            if !entry.message.is_me && entry.message.status.advance(MessageStatus::Read) {
                marked.push(id.clone());
            }
        }
        marked
    }

    fn ensure(&mut self, partner: &str) -> String {
        let key = normalize_name(partner);
        if !self.conversations.contains_key(&key) {
            self.conversations.insert(
                key.clone(),
                Conversation {
                    partner: partner.trim().to_string(),
                    ids: VecDeque::new(),
                },
            );
            self.partner_order.push(key.clone());
        }
        key
    }

    fn collect(&self, key: &str) -> Vec<ChatMessage> {
        let Some(conversation) = self.conversations.get(key) else {
            return Vec::new();
        };
        conversation
            .ids
            .iter()
            .filter_map(|id| self.index.get(id))
            .map(|entry| entry.message.clone())
            .collect()
    }
}
