//! Public operation surface of the orchestrator.
//!
//! [`Orchestrator::spawn`] starts a dispatch task that owns the registry and
//! the transport. [`JobController`] is a cheap cloneable handle: every call is
//! a message on the dispatch queue, so control calls and inbound frames are
//! applied one at a time in arrival order.

mod dispatch;
mod pending;

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::config::FlashConfig;
use crate::error::{FlashError, TransportError};
use crate::history::HistoryEntry;
use crate::job::{CapabilityLookup, FlashRequest, Job, JobAction, JobId};
use crate::registry::JobRegistry;
use crate::transport::{ConnectionState, Connector, Transport, TransportOptions};

use dispatch::{Dispatch, Dispatcher, Query};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// When a control call resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Confirmation {
    /// As soon as the optimistic transition is applied locally.
    #[default]
    Optimistic,
    /// Once the backend acknowledges the control frame.
    Acknowledged,
}

/// Snapshot published on every job change.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Changed(Job),
    /// Terminal; the job is now in history.
    Finalized(Job),
    /// Start refused by the backend; the job never existed server-side.
    Removed { job: Job, reason: String },
}

impl JobUpdate {
    pub fn job(&self) -> &Job {
        match self {
            JobUpdate::Changed(job) | JobUpdate::Finalized(job) => job,
            JobUpdate::Removed { job, .. } => job,
        }
    }
}

pub struct Orchestrator;

impl Orchestrator {
    /// Build the transport, registry and dispatch loop, and connect.
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: FlashConfig,
        connector: Arc<dyn Connector>,
        capabilities: Arc<dyn CapabilityLookup>,
    ) -> Result<JobController, FlashError> {
        config
            .validate()
            .map_err(|e| FlashError::Validation(format!("{e:#}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        let mut transport = Transport::new(
            connector,
            TransportOptions {
                policy: config.reconnect_policy(),
                queue_capacity: config.outbound_queue_capacity,
                keepalive: config.keepalive_interval(),
            },
        );
        let weak = tx.downgrade();
        transport.on_frame(Box::new(move |event| {
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(Dispatch::Transport(event));
            }
        }))?;
        let state = transport.state();
        transport.connect(&config.endpoint)?;

        let registry = JobRegistry::new(config.history_capacity)
            .with_timeouts(config.heartbeat_timeout(), config.reconnect_grace());
        let dispatcher = Dispatcher::new(
            registry,
            transport,
            capabilities,
            updates.clone(),
            tx.downgrade(),
            config.ack_timeout(),
        );
        tokio::spawn(dispatcher.run(rx));
        tracing::info!(endpoint = %config.endpoint, "orchestrator started");

        Ok(JobController { tx, updates, state })
    }
}

#[derive(Clone)]
pub struct JobController {
    tx: mpsc::UnboundedSender<Dispatch>,
    updates: broadcast::Sender<JobUpdate>,
    state: watch::Receiver<ConnectionState>,
}

impl JobController {
    /// Start a job. Resolves with the provisional id (optimistic) or the
    /// backend id (acknowledged).
    pub async fn start_flash(
        &self,
        request: FlashRequest,
        confirm: Confirmation,
    ) -> Result<JobId, FlashError> {
        self.call(|reply| Dispatch::Start {
            request,
            confirm,
            reply,
        })
        .await?
    }

    pub async fn pause_flash(&self, id: &JobId, confirm: Confirmation) -> Result<Job, FlashError> {
        self.control(id, JobAction::Pause, confirm).await
    }

    pub async fn resume_flash(&self, id: &JobId, confirm: Confirmation) -> Result<Job, FlashError> {
        self.control(id, JobAction::Resume, confirm).await
    }

    pub async fn cancel_flash(&self, id: &JobId, confirm: Confirmation) -> Result<Job, FlashError> {
        self.control(id, JobAction::Cancel, confirm).await
    }

    /// Active or archived job by either id.
    pub async fn job(&self, id: &JobId) -> Result<Option<Job>, FlashError> {
        let id = id.clone();
        self.call(|reply| Dispatch::Query(Query::Job(id, reply))).await
    }

    pub async fn active_jobs(&self) -> Result<Vec<Job>, FlashError> {
        self.call(|reply| Dispatch::Query(Query::Active(reply))).await
    }

    /// Up to `limit` finished jobs, most recent first.
    pub async fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>, FlashError> {
        self.call(|reply| Dispatch::Query(Query::History(limit, reply)))
            .await
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.updates.subscribe()
    }

    /// Leave the offline state and start reconnecting.
    pub async fn reconnect(&self) -> Result<(), FlashError> {
        self.call(Dispatch::Reconnect).await?
    }

    /// Close the channel and stop the dispatch loop. Pending waiters fail
    /// with `TransportError::Stopped`.
    pub async fn shutdown(&self) -> Result<(), FlashError> {
        self.call(Dispatch::Shutdown).await
    }

    async fn control(
        &self,
        id: &JobId,
        action: JobAction,
        confirm: Confirmation,
    ) -> Result<Job, FlashError> {
        let id = id.clone();
        self.call(|reply| Dispatch::Control {
            id,
            action,
            confirm,
            reply,
        })
        .await?
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Dispatch,
    ) -> Result<T, FlashError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| FlashError::Transport(TransportError::Stopped))?;
        rx.await
            .map_err(|_| FlashError::Transport(TransportError::Stopped))
    }
}
