//! In-process transport.
//!
//! [`MemoryConnector`] hands every accepted connection to a [`MemoryServer`]
//! as a [`MemoryPeer`], which plays the real-time server: it reads the
//! client's events and pushes server events back. Dropping a peer looks like
//! a transport failure to the client.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Connector, Transport, TransportError};
use crate::protocol::{ClientEvent, ServerEvent};

/// Client side: dials the paired [`MemoryServer`].
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refuse: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

/// Server side: yields one [`MemoryPeer`] per successful connect.
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryConnector {
    pub fn pair() -> (Self, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let connector = Self {
            accept_tx,
            refuse: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        (connector, MemoryServer { accept_rx })
    }

    /// Make subsequent connects fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Connect attempts so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();

        self.accept_tx
            .send(MemoryPeer {
                tx: to_client,
                rx: from_client,
            })
            .map_err(|_| TransportError::Connect("server is gone".to_string()))?;

        Ok(Box::new(MemoryTransport {
            tx: to_server,
            rx: from_server,
        }))
    }
}

impl MemoryServer {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

/// One accepted connection, seen from the server.
pub struct MemoryPeer {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    pub fn push(&self, event: &ServerEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(frame) => self.push_raw(frame),
            Err(_) => false,
        }
    }

    /// Push an arbitrary frame, valid or not.
    pub fn push_raw(&self, frame: impl Into<String>) -> bool {
        self.tx.send(frame.into()).is_ok()
    }

    /// Next event from the client. `None` once the client hung up.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        while let Some(frame) = self.rx.recv().await {
            if let Ok(event) = serde_json::from_str::<ClientEvent>(&frame) {
                return Some(event);
            }
        }
        None
    }

    /// Non-blocking variant of [`Self::next_event`].
    pub fn try_next_event(&mut self) -> Option<ClientEvent> {
        while let Ok(frame) = self.rx.try_recv() {
            if let Ok(event) = serde_json::from_str::<ClientEvent>(&frame) {
                return Some(event);
            }
        }
        None
    }
}

struct MemoryTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.rx.close();
        Ok(())
    }
}
