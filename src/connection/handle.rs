//! Connection handle and its background task.
//!
//! The task is the only owner of the transport. Public methods queue a
//! [`Command`] over an unbounded channel and return immediately; inbound
//! frames are decoded and dispatched to registered handlers from the task.
//!
//! Lifecycle:
//! 1. Dial through the [`Connector`]
//! 2. Multiplex commands and inbound frames until the transport drops
//! 3. Wait `reconnect_delay`, redial, up to `reconnect_attempts` times
//! 4. On reconnect: re-subscribe every active topic, flush queued frames
//! 5. Past the cap: stay `Disconnected` for good

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handlers::{HandlerId, HandlerRegistry};
use super::{ChatError, ConnectionConfig, ConnectionState};
use crate::data::models::TopicId;
use crate::protocol::{self, ClientEvent, EventKind, ServerEvent};
use crate::transport::{Connector, Transport, TransportError};

#[derive(Debug)]
enum Command {
    Subscribe(TopicId),
    Unsubscribe(TopicId),
    Send(ClientEvent),
}

struct Shared {
    cmd_tx: mpsc::UnboundedSender<Command>,
    registry: Arc<HandlerRegistry>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

/// Cheap-to-clone handle to the shared real-time connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Spawn the connection task and return a handle to it.
    ///
    /// Must be called from within a Tokio runtime. The first dial happens in
    /// the background; watch [`Self::watch_state`] to know when it lands.
    pub fn open(connector: impl Connector + 'static, config: ConnectionConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let registry = Arc::new(HandlerRegistry::new());
        let cancel = CancellationToken::new();

        info!(
            reconnect_attempts = config.reconnect_attempts,
            reconnect_delay_ms = config.reconnect_delay.as_millis() as u64,
            "Opening chat connection"
        );

        let shutdown_timeout = config.shutdown_timeout;
        let task = ConnectionTask {
            connector: Box::new(connector),
            config,
            registry: Arc::clone(&registry),
            state_tx,
            cmd_rx,
            cancel: cancel.clone(),
            topics: BTreeMap::new(),
            outbox: VecDeque::new(),
        };
        let join = tokio::spawn(task.run());

        Self {
            shared: Arc::new(Shared {
                cmd_tx,
                registry,
                state_rx,
                cancel,
                task: Mutex::new(Some(join)),
                shutdown_timeout,
            }),
        }
    }

    /// Join a topic. Every call sends `subscribe_match`, so each subscriber
    /// gets a backlog; the topic stays active until its last subscriber leaves.
    pub fn subscribe_topic(&self, topic: &TopicId) -> Result<(), ChatError> {
        self.command(Command::Subscribe(topic.clone()))
    }

    /// Leave a topic. The last unsubscriber sends `unsubscribe_match`.
    pub fn unsubscribe_topic(&self, topic: &TopicId) -> Result<(), ChatError> {
        self.command(Command::Unsubscribe(topic.clone()))
    }

    /// Queue an outbound event. While reconnecting the frame is held and
    /// flushed once the connection is back.
    pub fn send(&self, event: ClientEvent) -> Result<(), ChatError> {
        self.command(Command::Send(event))
    }

    /// Register a handler for one inbound event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(ServerEvent) + Send + Sync + 'static,
    {
        self.shared.registry.add(kind, Arc::new(handler))
    }

    /// Detach a handler. Returns false if it was already gone.
    pub fn off(&self, id: HandlerId) -> bool {
        self.shared.registry.remove(id)
    }

    pub fn handler_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_rx.clone()
    }

    /// Unsubscribe everything, close the transport and stop the task.
    ///
    /// Waits up to the configured shutdown timeout, then aborts the task.
    pub async fn close(&self) {
        debug!("Chat connection close requested");
        self.shared.cancel.cancel();

        let task = self
            .shared
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(mut task) = task {
            match tokio::time::timeout(self.shared.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!(error = %join_err, "Connection task terminated with join error");
                }
                Err(_) => {
                    warn!("Connection task did not exit within timeout; aborting");
                    task.abort();
                }
            }
        }
    }

    fn command(&self, cmd: Command) -> Result<(), ChatError> {
        if self.shared.cancel.is_cancelled() || self.state() == ConnectionState::Disconnected {
            return Err(ChatError::NotConnected);
        }
        self.shared
            .cmd_tx
            .send(cmd)
            .map_err(|_| ChatError::NotConnected)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("state", &self.state())
            .field("handlers", &self.handler_count())
            .finish()
    }
}

// =============================================================================
// Connection task
// =============================================================================

enum Dial {
    Up(Box<dyn Transport>),
    Failed,
    Stop,
}

enum Step {
    Stop,
    Command(Command),
    Frame(Option<Result<String, TransportError>>),
}

struct ConnectionTask {
    connector: Box<dyn Connector>,
    config: ConnectionConfig,
    registry: Arc<HandlerRegistry>,
    state_tx: watch::Sender<ConnectionState>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    /// Active topics and how many subscribers each has.
    topics: BTreeMap<TopicId, usize>,
    /// Outbound events held while no transport is up.
    outbox: VecDeque<ClientEvent>,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut transport: Option<Box<dyn Transport>> = None;
        // Consecutive failed or lost connections since the last good one.
        let mut failures: u32 = 0;

        loop {
            if transport.is_none() {
                match self.dial(failures).await {
                    Dial::Up(fresh) => {
                        failures = 0;
                        transport = Some(fresh);
                    }
                    Dial::Failed => failures += 1,
                    Dial::Stop => {
                        self.set_state(ConnectionState::Disconnected);
                        return;
                    }
                }
                continue;
            }
            let Some(active) = transport.as_mut() else {
                continue;
            };

            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Stop,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => Step::Command(cmd),
                    None => Step::Stop,
                },
                frame = active.recv() => Step::Frame(frame),
            };

            match step {
                Step::Stop => {
                    self.shutdown(&mut **active).await;
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                Step::Command(cmd) => {
                    if let Err(e) = self.apply(&mut **active, cmd).await {
                        warn!(error = %e, "Chat connection lost while sending");
                        transport = None;
                        failures = 1;
                    }
                }
                Step::Frame(Some(Ok(text))) => self.dispatch(&text),
                Step::Frame(Some(Err(e))) => {
                    warn!(error = %e, "Chat connection lost");
                    transport = None;
                    failures = 1;
                }
                Step::Frame(None) => {
                    info!("Chat connection closed by server");
                    transport = None;
                    failures = 1;
                }
            }
        }
    }

    /// One connect attempt, preceded by the reconnect delay when `failures`
    /// is non-zero.
    async fn dial(&mut self, failures: u32) -> Dial {
        if failures > self.config.reconnect_attempts {
            error!(
                attempts = self.config.reconnect_attempts,
                "Chat connection lost; giving up on reconnect"
            );
            return Dial::Stop;
        }

        if failures > 0 {
            self.set_state(ConnectionState::Reconnecting { attempt: failures });
            if !self.wait_before_retry().await {
                return Dial::Stop;
            }
        }

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Dial::Stop,
            result = self.connector.connect() => result,
        };

        let mut fresh = match result {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(error = %e, failures, "Chat connect failed");
                return Dial::Failed;
            }
        };

        if let Err(e) = self.restore(&mut *fresh).await {
            warn!(error = %e, "Connection dropped while restoring subscriptions");
            return Dial::Failed;
        }

        info!(
            topics = self.topics.len(),
            after_failures = failures,
            "Chat connection established"
        );
        self.set_state(ConnectionState::Connected);
        Dial::Up(fresh)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    /// Sleep out the reconnect delay while still accepting commands.
    /// Returns false if the handle was closed in the meantime.
    async fn wait_before_retry(&mut self) -> bool {
        let sleep = tokio::time::sleep(self.config.reconnect_delay);
        tokio::pin!(sleep);

        loop {
            let cmd = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                cmd = self.cmd_rx.recv() => cmd,
            };
            match cmd {
                Some(cmd) => self.hold(cmd),
                None => return false,
            }
        }
    }

    /// Track a command while no transport is up.
    fn hold(&mut self, cmd: Command) {
        match cmd {
            Command::Subscribe(topic) => {
                *self.topics.entry(topic).or_insert(0) += 1;
            }
            Command::Unsubscribe(topic) => {
                self.release(&topic);
            }
            Command::Send(event) => {
                debug!(event = event.name(), queued = self.outbox.len() + 1, "Holding frame until reconnect");
                self.outbox.push_back(event);
            }
        }
    }

    /// Drop one subscriber. Returns true if that was the last one.
    fn release(&mut self, topic: &TopicId) -> bool {
        match self.topics.get_mut(topic) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.topics.remove(topic);
                true
            }
            None => {
                debug!(topic = %topic, "Unsubscribe for inactive topic ignored");
                false
            }
        }
    }

    async fn apply(&mut self, transport: &mut dyn Transport, cmd: Command) -> Result<(), TransportError> {
        match cmd {
            Command::Subscribe(topic) => {
                let count = self.topics.entry(topic.clone()).or_insert(0);
                *count += 1;
                // The server answers each subscribe with a backlog.
                debug!(topic = %topic, subscribers = *count, "Subscribing");
                write(transport, &ClientEvent::SubscribeMatch(topic)).await?;
            }
            Command::Unsubscribe(topic) => {
                if self.release(&topic) {
                    debug!(topic = %topic, "Unsubscribing");
                    write(transport, &ClientEvent::UnsubscribeMatch(topic)).await?;
                }
            }
            Command::Send(event) => {
                if let Err(e) = write(transport, &event).await {
                    // Keep it for the next connection.
                    self.outbox.push_front(event);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Re-subscribe active topics, then flush held frames in order.
    async fn restore(&mut self, transport: &mut dyn Transport) -> Result<(), TransportError> {
        for topic in self.topics.keys() {
            write(transport, &ClientEvent::SubscribeMatch(topic.clone())).await?;
        }
        while let Some(event) = self.outbox.front() {
            write(transport, event).await?;
            self.outbox.pop_front();
        }
        Ok(())
    }

    fn dispatch(&self, text: &str) {
        match protocol::decode_server_event(text) {
            Ok(event) => {
                let handlers = self.registry.dispatch(&event);
                debug!(event = %event.kind(), handlers, "Dispatched server event");
            }
            Err(e) => {
                warn!(error = %e, "Dropping invalid server frame");
            }
        }
    }

    async fn shutdown(&mut self, transport: &mut dyn Transport) {
        for topic in std::mem::take(&mut self.topics).into_keys() {
            if let Err(e) = write(transport, &ClientEvent::UnsubscribeMatch(topic)).await {
                debug!(error = %e, "Unsubscribe on shutdown failed");
                break;
            }
        }
        if let Err(e) = transport.close().await {
            debug!(error = %e, "Transport close failed");
        }
        info!("Chat connection closed");
    }
}

async fn write(transport: &mut dyn Transport, event: &ClientEvent) -> Result<(), TransportError> {
    let frame = protocol::encode_client_event(event).map_err(|e| TransportError::Send(e.to_string()))?;
    transport.send(frame).await
}
