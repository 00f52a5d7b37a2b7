//! Topic subscription lifecycle for one chat view.
//!
//! `Unbound -> Bound(topic)`. A rebind always passes through `Unbound`: the
//! old topic is unsubscribed and its handlers detached before the new topic
//! is subscribed. Every bind starts a new generation, and events reach the
//! room tagged with the generation they were received under, so anything
//! still in flight for the old topic is recognisably stale.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::{ConnectionHandle, HandlerId};
use crate::data::models::TopicId;
use crate::protocol::{EventKind, ServerEvent};

/// A server event as routed to a room.
#[derive(Debug, Clone)]
pub struct RoutedEvent {
    pub generation: u64,
    pub event: ServerEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    Bound(TopicId),
}

pub struct RoomBinding {
    handle: ConnectionHandle,
    route_tx: mpsc::UnboundedSender<RoutedEvent>,
    state: BindingState,
    generation: u64,
    handlers: Vec<HandlerId>,
}

impl RoomBinding {
    pub fn new(handle: ConnectionHandle, route_tx: mpsc::UnboundedSender<RoutedEvent>) -> Self {
        Self {
            handle,
            route_tx,
            state: BindingState::Unbound,
            generation: 0,
            handlers: Vec::new(),
        }
    }

    pub fn state(&self) -> &BindingState {
        &self.state
    }

    pub fn topic(&self) -> Option<&TopicId> {
        match &self.state {
            BindingState::Bound(topic) => Some(topic),
            BindingState::Unbound => None,
        }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// True if an event routed under `generation` belongs to the current bind.
    pub fn is_current(&self, generation: u64) -> bool {
        matches!(self.state, BindingState::Bound(_)) && generation == self.generation
    }

    /// Bind to `topic`. Returns false if already bound to it.
    pub fn bind(&mut self, topic: TopicId) -> bool {
        if self.topic() == Some(&topic) {
            return false;
        }
        self.unbind();

        self.generation += 1;
        let generation = self.generation;

        // Handlers go in before the subscribe so the backlog cannot slip past.
        for kind in [EventKind::ChatHistory, EventKind::NewMessage] {
            let tx = self.route_tx.clone();
            let id = self.handle.on(kind, move |event| {
                let _ = tx.send(RoutedEvent { generation, event });
            });
            self.handlers.push(id);
        }

        if let Err(e) = self.handle.subscribe_topic(&topic) {
            warn!(topic = %topic, error = %e, "Subscribe failed; room stays bound without live events");
        }

        debug!(topic = %topic, generation, "Room bound");
        self.state = BindingState::Bound(topic);
        true
    }

    /// Leave the current topic, if any.
    pub fn unbind(&mut self) {
        let BindingState::Bound(topic) = std::mem::replace(&mut self.state, BindingState::Unbound) else {
            return;
        };

        for id in self.handlers.drain(..) {
            self.handle.off(id);
        }
        if let Err(e) = self.handle.unsubscribe_topic(&topic) {
            debug!(topic = %topic, error = %e, "Unsubscribe not sent");
        }

        // Anything already queued under the old generation is now stale.
        self.generation += 1;
        debug!(topic = %topic, "Room unbound");
    }
}

impl Drop for RoomBinding {
    fn drop(&mut self) {
        self.unbind();
    }
}
