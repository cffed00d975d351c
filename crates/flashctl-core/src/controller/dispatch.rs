//! The dispatch loop: the only task that touches the registry.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::error::{FlashError, TransportError};
use crate::frame::{ControlKind, ControlPayload, OutboundFrame};
use crate::history::HistoryEntry;
use crate::job::{CapabilityLookup, FlashRequest, Job, JobAction, JobId, JobStatus};
use crate::registry::{Effect, JobRegistry, Lookup, RegistryEvent};
use crate::transport::{Transport, TransportEvent};

use super::pending::{PendingAcks, Waiter};
use super::{Confirmation, JobUpdate};

/// How often silent jobs and reconnect deadlines are checked.
const HEARTBEAT_TICK: Duration = Duration::from_secs(1);

pub(crate) enum Dispatch {
    Start {
        request: FlashRequest,
        confirm: Confirmation,
        reply: oneshot::Sender<Result<JobId, FlashError>>,
    },
    Control {
        id: JobId,
        action: JobAction,
        confirm: Confirmation,
        reply: oneshot::Sender<Result<Job, FlashError>>,
    },
    Transport(TransportEvent),
    AckTimeout {
        origin: JobId,
        job_id: JobId,
        seq: u64,
    },
    Query(Query),
    Reconnect(oneshot::Sender<Result<(), FlashError>>),
    Shutdown(oneshot::Sender<()>),
}

pub(crate) enum Query {
    Job(JobId, oneshot::Sender<Option<Job>>),
    Active(oneshot::Sender<Vec<Job>>),
    History(usize, oneshot::Sender<Vec<HistoryEntry>>),
}

pub(super) struct Dispatcher {
    registry: JobRegistry,
    transport: Transport,
    capabilities: Arc<dyn CapabilityLookup>,
    updates: broadcast::Sender<JobUpdate>,
    pending: PendingAcks,
    timers: mpsc::WeakUnboundedSender<Dispatch>,
    ack_timeout: Duration,
}

impl Dispatcher {
    pub(super) fn new(
        registry: JobRegistry,
        transport: Transport,
        capabilities: Arc<dyn CapabilityLookup>,
        updates: broadcast::Sender<JobUpdate>,
        timers: mpsc::WeakUnboundedSender<Dispatch>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            transport,
            capabilities,
            updates,
            pending: PendingAcks::default(),
            timers,
            ack_timeout,
        }
    }

    pub(super) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Dispatch>) {
        let mut heartbeat = interval(HEARTBEAT_TICK);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(Dispatch::Shutdown(reply)) => {
                        self.stop().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(msg) => self.handle(msg),
                    None => break,
                },
                _ = heartbeat.tick() => {
                    let connected = self.transport.is_connected();
                    let effects = self.registry.apply(RegistryEvent::Heartbeat { connected }, Instant::now());
                    self.settle(effects);
                }
            }
        }
        tracing::debug!("all controller handles dropped");
        self.stop().await;
    }

    async fn stop(&mut self) {
        self.transport.disconnect().await;
        for waiter in self.pending.drain() {
            waiter.fail(FlashError::Transport(TransportError::Stopped));
        }
        tracing::info!(active = self.registry.jobs().count(), "orchestrator stopped");
    }

    fn handle(&mut self, msg: Dispatch) {
        match msg {
            Dispatch::Start {
                request,
                confirm,
                reply,
            } => self.start(request, confirm, reply),
            Dispatch::Control {
                id,
                action,
                confirm,
                reply,
            } => self.control(&id, action, confirm, reply),
            Dispatch::Transport(event) => self.transport_event(event),
            Dispatch::AckTimeout {
                origin,
                job_id,
                seq,
            } => {
                let effects = self.registry.apply(
                    RegistryEvent::AckTimeout {
                        origin: origin.clone(),
                        seq,
                    },
                    Instant::now(),
                );
                self.settle(effects);
                if let Some(waiter) = self.pending.take(&origin, seq) {
                    tracing::warn!(job_id = %job_id, seq, "acknowledgement timed out");
                    waiter.fail(TransportError::AckTimeout { job_id, seq }.into());
                }
            }
            Dispatch::Query(query) => self.query(query),
            Dispatch::Reconnect(reply) => {
                let _ = reply.send(self.transport.reconnect().map_err(FlashError::from));
            }
            Dispatch::Shutdown(reply) => {
                // Handled in `run`; reply so the caller is not left hanging.
                let _ = reply.send(());
            }
        }
    }

    fn start(
        &mut self,
        request: FlashRequest,
        confirm: Confirmation,
        reply: oneshot::Sender<Result<JobId, FlashError>>,
    ) {
        if let Err(e) = self.check_start(&request) {
            tracing::info!(serial = %request.device_serial, error = %e, "start refused");
            let _ = reply.send(Err(e));
            return;
        }
        let id = JobId::provisional();
        let effects = self.registry.apply(
            RegistryEvent::Created(Job::provisional(id.clone(), &request)),
            Instant::now(),
        );
        self.settle(effects);

        let frame = OutboundFrame {
            kind: ControlKind::Start,
            job_id: id.clone(),
            seq: 0,
            payload: ControlPayload {
                device_serial: request.device_serial.clone(),
                flash_method: Some(request.flash_method),
                device_brand: Some(request.device_brand),
                partitions: Some(request.partitions.clone()),
                verify_after_flash: request.verify_after_flash,
                auto_reboot: request.auto_reboot,
                wipe_user_data: request.wipe_user_data,
            },
        };
        self.send(frame);
        self.arm_ack_timer(id.clone(), id.clone(), 0);

        match confirm {
            Confirmation::Optimistic => {
                let _ = reply.send(Ok(id));
            }
            Confirmation::Acknowledged => self.pending.insert(id, 0, Waiter::Start(reply)),
        }
    }

    fn check_start(&self, request: &FlashRequest) -> Result<(), FlashError> {
        request.validate(self.capabilities.as_ref())?;
        self.registry.lock_table().ensure_free(&request.device_serial)
    }

    fn control(
        &mut self,
        id: &JobId,
        action: JobAction,
        confirm: Confirmation,
        reply: oneshot::Sender<Result<Job, FlashError>>,
    ) {
        let (origin, job_id, serial) = match self.check_control(id, action) {
            Ok(job) => (job.origin_id().clone(), job.id.clone(), job.device_serial.clone()),
            Err(e) => {
                tracing::info!(job_id = %id, %action, error = %e, "control refused");
                let _ = reply.send(Err(e));
                return;
            }
        };
        let Some(seq) = self.registry.next_seq(&origin) else {
            let _ = reply.send(Err(FlashError::UnknownJob(id.clone())));
            return;
        };

        let effects = self.registry.apply(
            RegistryEvent::Control {
                id: origin.clone(),
                action,
                seq,
            },
            Instant::now(),
        );
        let snapshot = effects.iter().find_map(|e| match e {
            Effect::Changed(job) | Effect::Finalized(job) => Some(job.clone()),
            _ => None,
        });
        self.settle(effects);

        self.send(OutboundFrame {
            kind: ControlKind::from(action),
            job_id: job_id.clone(),
            seq,
            payload: ControlPayload {
                device_serial: serial,
                flash_method: None,
                device_brand: None,
                partitions: None,
                verify_after_flash: false,
                auto_reboot: false,
                wipe_user_data: false,
            },
        });
        self.arm_ack_timer(origin.clone(), job_id.clone(), seq);

        match confirm {
            Confirmation::Optimistic => {
                let _ = reply.send(snapshot.ok_or(FlashError::UnknownJob(job_id)));
            }
            Confirmation::Acknowledged => {
                self.pending
                    .insert(origin, seq, Waiter::Control { action, reply });
            }
        }
    }

    /// Validate a control call against the job's current status and method.
    fn check_control(&self, id: &JobId, action: JobAction) -> Result<&Job, FlashError> {
        let job = match self.registry.lookup(id) {
            Lookup::Active(job) => job,
            Lookup::Archived(entry) => {
                return Err(FlashError::InvalidTransition {
                    job_id: entry.job.id.clone(),
                    status: entry.job.status,
                    action,
                })
            }
            Lookup::Unknown => return Err(FlashError::UnknownJob(id.clone())),
        };
        let allowed = match action {
            JobAction::Start => false,
            JobAction::Pause => job.can_pause(),
            JobAction::Resume => job.can_resume(),
            JobAction::Cancel => job.can_cancel(),
        };
        if !allowed {
            return Err(FlashError::InvalidTransition {
                job_id: job.id.clone(),
                status: job.status,
                action,
            });
        }
        Ok(job)
    }

    fn transport_event(&mut self, event: TransportEvent) {
        let now = Instant::now();
        let registry_event = match event {
            TransportEvent::Frame(frame) => RegistryEvent::Frame(frame),
            TransportEvent::Connected => RegistryEvent::ConnectionRestored,
            TransportEvent::Disconnected => RegistryEvent::ConnectionLost,
            TransportEvent::FrameDropped { job_id, kind } => {
                RegistryEvent::FrameDropped { job_id, kind }
            }
            TransportEvent::Offline { attempts } => {
                tracing::error!(
                    attempts,
                    active = self.registry.jobs().count(),
                    "backend unreachable; jobs stay stalled until reconnect"
                );
                return;
            }
        };
        let effects = self.registry.apply(registry_event, now);
        self.settle(effects);
    }

    fn query(&self, query: Query) {
        match query {
            Query::Job(id, reply) => {
                let job = match self.registry.lookup(&id) {
                    Lookup::Active(job) => Some(job.clone()),
                    Lookup::Archived(entry) => Some(entry.job.clone()),
                    Lookup::Unknown => None,
                };
                let _ = reply.send(job);
            }
            Query::Active(reply) => {
                let mut jobs: Vec<Job> = self.registry.jobs().cloned().collect();
                jobs.sort_by_key(|j| j.started_at);
                let _ = reply.send(jobs);
            }
            Query::History(limit, reply) => {
                let _ = reply.send(self.registry.archive().list(limit));
            }
        }
    }

    fn send(&self, frame: OutboundFrame) {
        let (job_id, seq) = (frame.job_id.clone(), frame.seq);
        if let Err(e) = self.transport.send(frame) {
            // The ack timer will surface this to waiters.
            tracing::error!(job_id = %job_id, seq, error = %e, "control frame not handed to transport");
        }
    }

    fn arm_ack_timer(&self, origin: JobId, job_id: JobId, seq: u64) {
        let Some(tx) = self.timers.upgrade() else {
            return;
        };
        let timeout = self.ack_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Dispatch::AckTimeout {
                origin,
                job_id,
                seq,
            });
        });
    }

    /// Publish effects and resolve the waiters they settle.
    fn settle(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Changed(job) => self.publish(JobUpdate::Changed(job)),
                Effect::Finalized(job) => {
                    let origin = job.origin_id().clone();
                    let outcome = match job.status {
                        JobStatus::Failed => Some(FlashError::ServerRejected {
                            job_id: job.id.clone(),
                            reason: job.error.clone().unwrap_or_default(),
                        }),
                        _ => None,
                    };
                    for (seq, waiter) in self
                        .pending
                        .take_where(&origin, |w| w.action() != JobAction::Cancel)
                    {
                        tracing::debug!(job_id = %job.id, seq, "waiter superseded by terminal status");
                        let err = outcome.clone().unwrap_or_else(|| FlashError::InvalidTransition {
                            job_id: job.id.clone(),
                            status: job.status,
                            action: waiter.action(),
                        });
                        waiter.fail(err);
                    }
                    self.publish(JobUpdate::Finalized(job));
                }
                Effect::Removed { job, reason } => {
                    for (_, waiter) in self.pending.take_where(job.origin_id(), |_| true) {
                        waiter.fail(FlashError::ServerRejected {
                            job_id: job.id.clone(),
                            reason: reason.clone(),
                        });
                    }
                    self.publish(JobUpdate::Removed { job, reason });
                }
                Effect::Acked {
                    origin,
                    seq,
                    job_id,
                } => {
                    let current = match self.registry.lookup(&origin) {
                        Lookup::Active(job) => Some(job.clone()),
                        Lookup::Archived(entry) => Some(entry.job.clone()),
                        Lookup::Unknown => None,
                    };
                    for (old, waiter) in self.pending.take_before(&origin, seq) {
                        tracing::debug!(job_id = %job_id, seq = old, superseded_by = seq, "waiter superseded");
                        let action = waiter.action();
                        waiter.fail(FlashError::InvalidTransition {
                            job_id: job_id.clone(),
                            status: current.as_ref().map_or(JobStatus::Preparing, |j| j.status),
                            action,
                        });
                    }
                    if let Some(waiter) = self.pending.take(&origin, seq) {
                        waiter.succeed(job_id, current);
                    }
                }
                Effect::RolledBack { origin, seq } => {
                    let job_id = self
                        .registry
                        .get(&origin)
                        .map_or_else(|| origin.clone(), |j| j.id.clone());
                    if let Some(waiter) = self.pending.take(&origin, seq) {
                        waiter.fail(TransportError::AckTimeout { job_id, seq }.into());
                    }
                }
                Effect::Discarded { reason } => {
                    tracing::trace!(reason, "event discarded");
                }
            }
        }
    }

    fn publish(&self, update: JobUpdate) {
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }
}
