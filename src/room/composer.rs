//! Input buffer and optimistic send.

use tracing::{debug, warn};

use super::store::MessageStore;
use crate::connection::ConnectionHandle;
use crate::data::models::{ChatMessage, TopicId};
use crate::protocol::ClientEvent;

#[derive(Debug, Clone)]
pub struct Composer {
    author: String,
    input: String,
}

impl Composer {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            input: String::new(),
        }
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Echo `text` into the store, then send it.
    ///
    /// Empty or whitespace-only input does nothing. The echo is appended
    /// before the send is attempted; if the connection refuses the frame the
    /// echo stays in place, marked failed.
    pub fn submit(
        &self,
        text: &str,
        topic: &TopicId,
        store: &mut MessageStore,
        handle: &ConnectionHandle,
    ) -> Option<ChatMessage> {
        let body = text.trim();
        if body.is_empty() {
            return None;
        }

        let message = ChatMessage::local(topic.clone(), &self.author, body);
        store.push_local(message.clone());

        match handle.send(ClientEvent::ChatMessage(message.clone())) {
            Ok(()) => debug!(id = %message.id, topic = %topic, "Chat message queued"),
            Err(e) => {
                warn!(id = %message.id, error = %e, "Chat message not sent");
                store.mark_failed(&message.id);
            }
        }

        Some(message)
    }

    /// Submit the buffered input, clearing it if anything was sent.
    pub fn submit_input(
        &mut self,
        topic: &TopicId,
        store: &mut MessageStore,
        handle: &ConnectionHandle,
    ) -> Option<ChatMessage> {
        let text = std::mem::take(&mut self.input);
        let sent = self.submit(&text, topic, store, handle);
        if sent.is_none() {
            self.input = text;
        }
        sent
    }
}
