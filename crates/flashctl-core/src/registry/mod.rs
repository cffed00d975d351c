//! Canonical in-memory job store and the only place job state is mutated.
//!
//! Every change, whether from an inbound frame, an optimistic control call,
//! a timer or a connection event, is a `RegistryEvent` passed to
//! [`JobRegistry::apply`]. The dispatch loop calls `apply` strictly in arrival
//! order; the returned [`Effect`]s tell it which waiters to resolve and which
//! updates to publish.

mod apply;

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::frame::{ControlKind, InboundFrame};
use crate::history::{HistoryArchive, HistoryEntry};
use crate::job::{now_millis, Job, JobAction, JobId, JobStatus, WarningKind};
use crate::lock_table::DeviceLockTable;

/// Reason recorded on jobs that stayed silent after a reconnect.
pub const LOST_AFTER_RECONNECT: &str = "lost-after-reconnect";

const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_RECONNECT_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// New client-started job (already validated and lock-checked).
    Created(Job),
    /// Optimistic transition for a control frame just issued with `seq`.
    Control {
        id: JobId,
        action: JobAction,
        seq: u64,
    },
    Frame(InboundFrame),
    /// No acknowledgement for `seq` within the ack window.
    AckTimeout { origin: JobId, seq: u64 },
    /// The transport dropped a queued control frame for this job.
    FrameDropped { job_id: JobId, kind: ControlKind },
    ConnectionLost,
    ConnectionRestored,
    /// Periodic staleness check.
    Heartbeat { connected: bool },
}

/// What an `apply` call changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Job still active, new snapshot.
    Changed(Job),
    /// Job reached a terminal status and moved to the archive.
    Finalized(Job),
    /// Provisional job dropped because the backend refused to start it.
    Removed { job: Job, reason: String },
    /// Control frame `seq` of the job keyed by `origin` was acknowledged.
    Acked { origin: JobId, seq: u64, job_id: JobId },
    /// Optimistic transition for `seq` was reverted after the ack window passed.
    RolledBack { origin: JobId, seq: u64 },
    /// Event had no effect.
    Discarded { reason: &'static str },
}

/// Optimistic transition awaiting acknowledgement.
#[derive(Debug, Clone, Copy)]
struct Rollback {
    seq: u64,
    previous: JobStatus,
}

#[derive(Debug)]
struct Tracking {
    last_issued_seq: u64,
    last_frame_at: Instant,
    /// Stalled by a disconnect; must report again after reconnect.
    lost: bool,
    reconnect_deadline: Option<Instant>,
    rollback: Option<Rollback>,
}

impl Tracking {
    fn new(now: Instant, last_issued_seq: u64) -> Self {
        Self {
            last_issued_seq,
            last_frame_at: now,
            lost: false,
            reconnect_deadline: None,
            rollback: None,
        }
    }
}

#[derive(Debug)]
struct Entry {
    job: Job,
    track: Tracking,
}

/// Where an id resolves to.
#[derive(Debug)]
pub enum Lookup<'a> {
    Active(&'a Job),
    Archived(&'a HistoryEntry),
    Unknown,
}

#[derive(Debug)]
pub struct JobRegistry {
    /// Active jobs keyed by origin id.
    entries: HashMap<JobId, Entry>,
    /// Every id an active job answers to → its origin id.
    index: HashMap<JobId, JobId>,
    archive: HistoryArchive,
    heartbeat_timeout: Duration,
    reconnect_grace: Duration,
}

impl JobRegistry {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            index: HashMap::new(),
            archive: HistoryArchive::new(history_capacity),
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            reconnect_grace: DEFAULT_RECONNECT_GRACE,
        }
    }

    pub fn with_timeouts(mut self, heartbeat_timeout: Duration, reconnect_grace: Duration) -> Self {
        self.heartbeat_timeout = heartbeat_timeout;
        self.reconnect_grace = reconnect_grace;
        self
    }

    /// Active jobs.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.entries.values().map(|e| &e.job)
    }

    /// Active job by backend or provisional id.
    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.index
            .get(id)
            .and_then(|origin| self.entries.get(origin))
            .map(|e| &e.job)
    }

    pub fn lookup(&self, id: &JobId) -> Lookup<'_> {
        if let Some(job) = self.get(id) {
            return Lookup::Active(job);
        }
        match self.archive.get(id) {
            Some(entry) => Lookup::Archived(entry),
            None => Lookup::Unknown,
        }
    }

    pub fn archive(&self) -> &HistoryArchive {
        &self.archive
    }

    pub fn lock_table(&self) -> DeviceLockTable<'_> {
        DeviceLockTable::new(self)
    }

    /// Sequence number for the next control frame of an active job.
    pub fn next_seq(&self, id: &JobId) -> Option<u64> {
        let entry = self.entry(id)?;
        let floor = entry.track.last_issued_seq.max(entry.job.last_acked_seq.unwrap_or(0));
        Some(floor + 1)
    }

    fn entry(&self, id: &JobId) -> Option<&Entry> {
        self.index.get(id).and_then(|origin| self.entries.get(origin))
    }

    fn origin_of(&self, id: &JobId) -> Option<JobId> {
        self.index.get(id).cloned()
    }

    /// Apply one event. The single mutation point for job state.
    pub fn apply(&mut self, event: RegistryEvent, now: Instant) -> Vec<Effect> {
        match event {
            RegistryEvent::Created(job) => self.insert_created(job, now),
            RegistryEvent::Control { id, action, seq } => self.apply_control(&id, action, seq, now),
            RegistryEvent::Frame(frame) => self.apply_frame(frame, now),
            RegistryEvent::AckTimeout { origin, seq } => self.apply_ack_timeout(&origin, seq),
            RegistryEvent::FrameDropped { job_id, kind } => self.apply_frame_dropped(&job_id, kind),
            RegistryEvent::ConnectionLost => self.apply_connection_lost(),
            RegistryEvent::ConnectionRestored => self.apply_connection_restored(now),
            RegistryEvent::Heartbeat { connected } => self.apply_heartbeat(connected, now),
        }
    }

    fn insert_created(&mut self, job: Job, now: Instant) -> Vec<Effect> {
        if let Err(e) = self.lock_table().ensure_free(&job.device_serial) {
            tracing::warn!(job_id = %job.id, "refusing to register job: {}", e);
            return vec![Effect::Discarded {
                reason: "device busy",
            }];
        }
        let origin = job.origin_id().clone();
        tracing::info!(
            job_id = %job.id,
            serial = %job.device_serial,
            method = ?job.flash_method,
            "job created"
        );
        self.index.insert(job.id.clone(), origin.clone());
        let snapshot = job.clone();
        self.entries.insert(
            origin,
            Entry {
                job,
                track: Tracking::new(now, 0),
            },
        );
        vec![Effect::Changed(snapshot)]
    }

    fn apply_control(&mut self, id: &JobId, action: JobAction, seq: u64, now: Instant) -> Vec<Effect> {
        let Some(origin) = self.origin_of(id) else {
            return vec![Effect::Discarded {
                reason: "control for inactive job",
            }];
        };
        let Some(entry) = self.entries.get_mut(&origin) else {
            return vec![Effect::Discarded {
                reason: "control for inactive job",
            }];
        };
        let next = match action {
            JobAction::Pause => JobStatus::Paused,
            JobAction::Resume => JobStatus::Flashing,
            JobAction::Cancel => JobStatus::Cancelled,
            JobAction::Start => {
                return vec![Effect::Discarded {
                    reason: "start is not a transition",
                }]
            }
        };
        let previous = entry.job.status;
        if !previous.can_transition_to(next) {
            return vec![Effect::Discarded {
                reason: "transition not allowed",
            }];
        }
        entry.track.last_issued_seq = entry.track.last_issued_seq.max(seq);
        entry.job.status = next;
        tracing::info!(job_id = %entry.job.id, seq, from = %previous, to = %next, "optimistic {}", action);

        if next.is_terminal() {
            entry.track.rollback = None;
            entry.job.completed_at = Some(now_millis());
            return self.finalize(&origin).into_iter().collect();
        }
        entry.track.rollback = Some(Rollback { seq, previous });
        if next == JobStatus::Flashing {
            // A resumed run starts its own silence window.
            entry.track.last_frame_at = now;
        }
        vec![Effect::Changed(entry.job.clone())]
    }

    fn apply_ack_timeout(&mut self, origin: &JobId, seq: u64) -> Vec<Effect> {
        let Some(entry) = self.entries.get_mut(origin) else {
            return Vec::new();
        };
        let acked = entry.job.last_acked_seq.is_some_and(|l| l >= seq);
        match entry.track.rollback {
            Some(rb) if rb.seq == seq && !acked => {
                tracing::warn!(
                    job_id = %entry.job.id,
                    seq,
                    restored = %rb.previous,
                    "no acknowledgement, reverting optimistic {}",
                    entry.job.status
                );
                entry.job.status = rb.previous;
                entry.track.rollback = None;
                vec![
                    Effect::RolledBack {
                        origin: origin.clone(),
                        seq,
                    },
                    Effect::Changed(entry.job.clone()),
                ]
            }
            _ => Vec::new(),
        }
    }

    fn apply_frame_dropped(&mut self, job_id: &JobId, kind: ControlKind) -> Vec<Effect> {
        let Some(entry) = self.origin_of(job_id).and_then(|o| self.entries.get_mut(&o)) else {
            return vec![Effect::Discarded {
                reason: "dropped frame for inactive job",
            }];
        };
        entry.job.add_warning(
            WarningKind::FrameDropped,
            format!("{:?} frame dropped from the offline queue", kind).to_lowercase(),
        );
        vec![Effect::Changed(entry.job.clone())]
    }

    fn apply_connection_lost(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        for entry in self.entries.values_mut() {
            // Any grace window restarts at the next reconnect.
            entry.track.reconnect_deadline = None;
            if entry.job.status != JobStatus::Flashing {
                continue;
            }
            entry.track.lost = true;
            entry.job.add_warning(WarningKind::Stalled, "connection lost");
            tracing::warn!(job_id = %entry.job.id, "job stalled: connection lost");
            effects.push(Effect::Changed(entry.job.clone()));
        }
        effects
    }

    fn apply_connection_restored(&mut self, now: Instant) -> Vec<Effect> {
        for entry in self.entries.values_mut() {
            entry.track.last_frame_at = now;
            if entry.track.lost {
                entry.track.reconnect_deadline = Some(now + self.reconnect_grace);
            }
        }
        Vec::new()
    }

    fn apply_heartbeat(&mut self, connected: bool, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        let mut lost = Vec::new();
        for (origin, entry) in self.entries.iter_mut() {
            if let Some(deadline) = entry.track.reconnect_deadline.filter(|_| connected) {
                if now >= deadline && entry.job.is_stalled() {
                    lost.push(origin.clone());
                    continue;
                }
            }
            let watched = matches!(entry.job.status, JobStatus::Flashing | JobStatus::Paused);
            if connected
                && watched
                && !entry.job.is_stalled()
                && now.duration_since(entry.track.last_frame_at) >= self.heartbeat_timeout
            {
                entry.job.add_warning(
                    WarningKind::Stalled,
                    format!("no frame for {}s", self.heartbeat_timeout.as_secs()),
                );
                tracing::warn!(job_id = %entry.job.id, "job stalled: heartbeat window elapsed");
                effects.push(Effect::Changed(entry.job.clone()));
            }
        }
        for origin in lost {
            if let Some(entry) = self.entries.get_mut(&origin) {
                tracing::error!(job_id = %entry.job.id, "no progress after reconnect, failing job");
                entry.job.status = JobStatus::Failed;
                entry.job.error = Some(LOST_AFTER_RECONNECT.to_string());
                entry.job.completed_at = Some(now_millis());
            }
            effects.extend(self.finalize(&origin));
        }
        effects
    }

    /// Move a terminal job from the active map to the archive.
    fn finalize(&mut self, origin: &JobId) -> Option<Effect> {
        let entry = self.entries.remove(origin)?;
        self.index.retain(|_, o| o != origin);
        let job = entry.job;
        match self.archive.finalize(job.clone()) {
            Ok(Some(evicted)) => {
                tracing::debug!(job_id = %evicted.job.id, "history full, evicted oldest entry");
            }
            Ok(None) => {}
            Err(job) => {
                tracing::error!(job_id = %job.id, status = %job.status, "finalize on non-terminal job");
            }
        }
        Some(Effect::Finalized(job))
    }
}
