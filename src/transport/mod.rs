//! Frame transports for the real-time channel.
//!
//! A [`Connector`] dials the server and yields a boxed [`Transport`]; the
//! connection task redials through the same connector after a disconnect.
//! [`ws::WsConnector`] talks WebSocket, [`memory::MemoryConnector`] keeps
//! everything in-process so a fake server can drive the client in tests.

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::{MemoryConnector, MemoryPeer, MemoryServer};
pub use ws::WsConnector;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Connect timed out after {0}ms")]
    Timeout(u64),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Connection closed")]
    Closed,
}

/// A connected, bidirectional text-frame channel.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Next inbound frame. `None` means the peer closed the channel.
    ///
    /// Must be cancel-safe: the connection task drops this future whenever
    /// a command wins the race.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Establishes new transports, once at startup and again on every reconnect.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;
}
