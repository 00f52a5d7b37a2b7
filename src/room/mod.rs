//! Chat room view-model.
//!
//! A [`ChatRoom`] is what a mounted chat view owns: a [`RoomBinding`] to the
//! shared connection, the [`MessageStore`] for the bound topic, and a
//! [`Composer`]. Events reach the room through its own channel and are
//! applied one at a time by whoever owns the room, so the store is never
//! touched concurrently.

pub mod binding;
pub mod composer;
pub mod store;

use tokio::sync::mpsc;
use tracing::debug;

use crate::connection::ConnectionHandle;
use crate::data::models::{ChatMessage, TopicId};
use crate::protocol::ServerEvent;

pub use binding::{BindingState, RoomBinding, RoutedEvent};
pub use composer::Composer;
pub use store::{Applied, MessageStore, StoredMessage};

#[derive(Debug, Clone, Default)]
pub struct RoomConfig {
    /// Evict the oldest messages beyond this many. `None` keeps everything.
    pub max_messages: Option<usize>,
}

/// What applying one routed event did to the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomUpdate {
    HistoryLoaded { count: usize },
    /// A later backlog for the same bind (e.g. after a reconnect) was merged
    /// in; these are the messages it added.
    HistoryMerged(Vec<ChatMessage>),
    Appended(ChatMessage),
    /// One of our own messages came back from the server.
    Confirmed(String),
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Received under a previous bind.
    Stale,
    /// Message belongs to another topic.
    ForeignTopic,
    Duplicate,
}

pub struct ChatRoom {
    binding: RoomBinding,
    store: MessageStore,
    composer: Composer,
    events: mpsc::UnboundedReceiver<RoutedEvent>,
    history_applied: bool,
}

impl ChatRoom {
    pub fn new(handle: ConnectionHandle, author: impl Into<String>, config: RoomConfig) -> Self {
        let (route_tx, events) = mpsc::unbounded_channel();
        Self {
            binding: RoomBinding::new(handle, route_tx),
            store: MessageStore::with_capacity_limit(config.max_messages),
            composer: Composer::new(author),
            events,
            history_applied: false,
        }
    }

    /// Bind to a topic, leaving the previous one first. Binding to a new
    /// topic starts from an empty store.
    pub fn bind(&mut self, topic: impl Into<TopicId>) {
        if self.binding.bind(topic.into()) {
            self.store.clear();
            self.history_applied = false;
        }
    }

    /// Stop receiving events. Messages already shown stay in the store.
    pub fn unbind(&mut self) {
        self.binding.unbind();
    }

    pub fn topic(&self) -> Option<&TopicId> {
        self.binding.topic()
    }

    pub fn binding_state(&self) -> &BindingState {
        self.binding.state()
    }

    pub fn connection(&self) -> &ConnectionHandle {
        self.binding.handle()
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.store.messages()
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn composer_mut(&mut self) -> &mut Composer {
        &mut self.composer
    }

    /// Send `text` with an optimistic echo. `None` if nothing was sent
    /// (blank input, or no topic bound).
    pub fn submit(&mut self, text: &str) -> Option<ChatMessage> {
        let topic = self.binding.topic()?;
        self.composer
            .submit(text, topic, &mut self.store, self.binding.handle())
    }

    /// Send whatever is in the composer's input buffer.
    pub fn submit_input(&mut self) -> Option<ChatMessage> {
        let topic = self.binding.topic()?;
        self.composer
            .submit_input(topic, &mut self.store, self.binding.handle())
    }

    /// Wait for the next routed event and apply it.
    pub async fn recv(&mut self) -> Option<RoomUpdate> {
        let routed = self.events.recv().await?;
        Some(self.apply(routed))
    }

    /// Apply everything already queued without waiting.
    pub fn drain(&mut self) -> Vec<RoomUpdate> {
        let mut updates = Vec::new();
        while let Ok(routed) = self.events.try_recv() {
            updates.push(self.apply(routed));
        }
        updates
    }

    pub fn apply(&mut self, routed: RoutedEvent) -> RoomUpdate {
        if !self.binding.is_current(routed.generation) {
            debug!(generation = routed.generation, "Dropping event from a previous bind");
            return RoomUpdate::Ignored(IgnoreReason::Stale);
        }
        let Some(topic) = self.binding.topic() else {
            return RoomUpdate::Ignored(IgnoreReason::Stale);
        };

        match routed.event {
            ServerEvent::ChatHistory(history) => {
                let total = history.len();
                let backlog: Vec<ChatMessage> = history
                    .into_iter()
                    .filter(|m| &m.topic_id == topic)
                    .collect();
                if backlog.len() != total {
                    debug!(
                        topic = %topic,
                        dropped = total - backlog.len(),
                        "History contained messages for other topics"
                    );
                    if backlog.is_empty() {
                        return RoomUpdate::Ignored(IgnoreReason::ForeignTopic);
                    }
                }

                if !self.history_applied {
                    self.store.apply_history(backlog);
                    self.history_applied = true;
                    return RoomUpdate::HistoryLoaded {
                        count: self.store.len(),
                    };
                }

                let mut added = Vec::new();
                for message in backlog {
                    if self.store.apply_incoming(message.clone()) == Applied::Appended {
                        added.push(message);
                    }
                }
                debug!(topic = %topic, added = added.len(), "Merged repeated history");
                RoomUpdate::HistoryMerged(added)
            }
            ServerEvent::NewMessage(message) => {
                if &message.topic_id != topic {
                    return RoomUpdate::Ignored(IgnoreReason::ForeignTopic);
                }
                let id = message.id.clone();
                match self.store.apply_incoming(message.clone()) {
                    Applied::Appended => RoomUpdate::Appended(message),
                    Applied::Confirmed => RoomUpdate::Confirmed(id),
                    Applied::Duplicate => RoomUpdate::Ignored(IgnoreReason::Duplicate),
                }
            }
        }
    }
}
