//! The shared real-time connection.
//!
//! One [`ConnectionHandle`] is opened per client session and multiplexes
//! every topic subscription. It is constructed explicitly and injected into
//! the rooms that use it, so tests can open it over an in-memory transport.

pub mod handle;
pub mod handlers;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::Settings;
use crate::protocol::ProtocolError;
use crate::transport::TransportError;

pub use handle::ConnectionHandle;
pub use handlers::HandlerId;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Lifecycle of the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Waiting out the delay before reconnect attempt `attempt` (1-based).
    Reconnecting { attempt: u32 },
    /// Gave up after the retry cap, or closed. Terminal.
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Reconnect and shutdown tuning for a [`ConnectionHandle`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Reconnect attempts after a disconnect before giving up for good.
    pub reconnect_attempts: u32,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// How long `close` waits for the connection task before aborting it.
    pub shutdown_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&Settings> for ConnectionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            reconnect_attempts: settings.reconnect_attempts,
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
            ..Self::default()
        }
    }
}
