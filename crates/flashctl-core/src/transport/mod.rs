//! One multiplexed channel to the backend.
//!
//! A background task owns the connection: it reconnects with backoff, flushes
//! the bounded outbound queue once connected, sends keepalive pings, and turns
//! inbound text into [`TransportEvent`]s for the single registered handler.
//! Job state is never touched here.

mod backoff;
pub mod memory;
mod queue;
mod run;
pub mod websocket;

pub use backoff::{ReconnectDecision, ReconnectPolicy};
pub use memory::{MemoryBackend, MemoryConnector};
pub use queue::OutboundQueue;
pub use websocket::WsConnector;

use async_trait::async_trait;
use futures::{Sink, Stream};
use serde::Serialize;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::frame::{ControlKind, InboundFrame, OutboundFrame};
use crate::job::JobId;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// An open text channel.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens connections to an endpoint. Websocket in production, in-memory in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Connection, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Connecting,
    Connected,
    Disconnected,
    /// Reconnect attempts exhausted; waits for an explicit `reconnect()`.
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub phase: Phase,
    pub reconnect_attempt: u32,
    pub next_backoff_ms: Option<u64>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: Phase::Disconnected,
            reconnect_attempt: 0,
            next_backoff_ms: None,
        }
    }
}

/// What the transport reports to its handler.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame(InboundFrame),
    Connected,
    Disconnected,
    Offline { attempts: u32 },
    /// A queued control frame was evicted while offline.
    FrameDropped { job_id: JobId, kind: ControlKind },
}

pub type FrameHandler = Box<dyn Fn(TransportEvent) + Send + Sync>;

#[derive(Debug)]
pub(crate) enum Command {
    Send(OutboundFrame),
    Reconnect,
    Disconnect,
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub policy: ReconnectPolicy,
    pub queue_capacity: usize,
    pub keepalive: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicy::default(),
            queue_capacity: 64,
            keepalive: Duration::from_secs(30),
        }
    }
}

pub struct Transport {
    connector: Arc<dyn Connector>,
    options: TransportOptions,
    handler: Arc<OnceLock<FrameHandler>>,
    state: Arc<watch::Sender<ConnectionState>>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
}

impl Transport {
    pub fn new(connector: Arc<dyn Connector>, options: TransportOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            connector,
            options,
            handler: Arc::new(OnceLock::new()),
            state: Arc::new(state),
            commands: None,
            task: None,
        }
    }

    /// Register the one consumer of inbound events.
    pub fn on_frame(&self, handler: FrameHandler) -> Result<(), TransportError> {
        self.handler
            .set(handler)
            .map_err(|_| TransportError::HandlerAlreadyRegistered)
    }

    /// Start the connection task. Progress is visible through [`Transport::state`].
    pub fn connect(&mut self, endpoint: &str) -> Result<(), TransportError> {
        if self.commands.as_ref().is_some_and(|tx| !tx.is_closed()) {
            tracing::debug!(endpoint, "transport already running");
            return Ok(());
        }
        if self.handler.get().is_none() {
            tracing::warn!("connecting without a frame handler; inbound frames will be dropped");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = run::Runner {
            connector: self.connector.clone(),
            endpoint: endpoint.to_string(),
            policy: self.options.policy,
            queue: OutboundQueue::new(self.options.queue_capacity),
            keepalive: self.options.keepalive,
            commands: rx,
            state: self.state.clone(),
            handler: self.handler.clone(),
        };
        self.task = Some(tokio::spawn(runner.run()));
        self.commands = Some(tx);
        Ok(())
    }

    /// Transmit now if connected, otherwise queue.
    pub fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        self.command(Command::Send(frame))
    }

    /// Leave the offline state (or skip the current backoff wait).
    pub fn reconnect(&self) -> Result<(), TransportError> {
        self.command(Command::Reconnect)
    }

    /// Close the channel and wait for the task to finish.
    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.commands.take() {
            let _ = tx.send(Command::Disconnect);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("transport task ended abnormally: {}", e);
            }
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    fn command(&self, cmd: Command) -> Result<(), TransportError> {
        let tx = self.commands.as_ref().ok_or(TransportError::Stopped)?;
        tx.send(cmd).map_err(|_| TransportError::Stopped)
    }
}
