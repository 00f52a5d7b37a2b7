//! Ordered, id-de-duplicated message store for one bound topic.

use std::collections::{HashSet, VecDeque};

use crate::data::models::{ChatMessage, Delivery};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message: ChatMessage,
    pub delivery: Delivery,
}

/// Outcome of [`MessageStore::apply_incoming`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Appended,
    /// The server relayed back one of our optimistic echoes.
    Confirmed,
    Duplicate,
}

/// Messages in arrival order. Ids are unique; nothing is ever re-sequenced.
#[derive(Debug, Default)]
pub struct MessageStore {
    entries: VecDeque<StoredMessage>,
    ids: HashSet<String>,
    max_messages: Option<usize>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that evicts its oldest entries beyond `max_messages`.
    pub fn with_capacity_limit(max_messages: Option<usize>) -> Self {
        Self {
            max_messages: max_messages.filter(|&n| n > 0),
            ..Self::default()
        }
    }

    /// Replace the whole store with a history snapshot.
    ///
    /// A duplicated id inside the snapshot keeps its first occurrence.
    pub fn apply_history(&mut self, snapshot: Vec<ChatMessage>) {
        self.entries.clear();
        self.ids.clear();
        for message in snapshot {
            if self.ids.insert(message.id.clone()) {
                self.entries.push_back(StoredMessage {
                    message,
                    delivery: Delivery::Confirmed,
                });
            }
        }
        self.evict();
    }

    /// Append a server-relayed message unless its id is already present.
    pub fn apply_incoming(&mut self, message: ChatMessage) -> Applied {
        if self.ids.contains(&message.id) {
            return match self.find_mut(&message.id) {
                Some(entry) if entry.delivery != Delivery::Confirmed => {
                    entry.delivery = Delivery::Confirmed;
                    Applied::Confirmed
                }
                _ => Applied::Duplicate,
            };
        }

        self.ids.insert(message.id.clone());
        self.entries.push_back(StoredMessage {
            message,
            delivery: Delivery::Confirmed,
        });
        self.evict();
        Applied::Appended
    }

    /// Append an optimistic local echo as pending. Returns false if the id
    /// is already taken.
    pub fn push_local(&mut self, message: ChatMessage) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.entries.push_back(StoredMessage {
            message,
            delivery: Delivery::Pending,
        });
        self.evict();
        true
    }

    /// Flag a pending echo as failed.
    pub fn mark_failed(&mut self, id: &str) -> bool {
        match self.find_mut(id) {
            Some(entry) if entry.delivery == Delivery::Pending => {
                entry.delivery = Delivery::Failed;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn delivery(&self, id: &str) -> Option<Delivery> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.message.id == id)
            .map(|e| e.delivery)
    }

    /// Messages in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> + '_ {
        self.entries.iter().map(|e| &e.message)
    }

    pub fn entries(&self) -> impl Iterator<Item = &StoredMessage> + '_ {
        self.entries.iter()
    }

    /// Owned copy of the current sequence.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.iter().cloned().collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.message.id.as_str()).collect()
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut StoredMessage> {
        // Echoes are confirmed shortly after they are sent, so search newest first.
        self.entries.iter_mut().rev().find(|e| e.message.id == id)
    }

    fn evict(&mut self) {
        let Some(max) = self.max_messages else {
            return;
        };
        while self.entries.len() > max {
            if let Some(old) = self.entries.pop_front() {
                self.ids.remove(&old.message.id);
            }
        }
    }
}
