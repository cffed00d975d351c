use std::collections::BTreeMap;
use tokio::sync::oneshot;

use crate::error::FlashError;
use crate::job::{Job, JobAction, JobId};

/// Caller waiting for a control frame to be acknowledged.
#[derive(Debug)]
pub(super) enum Waiter {
    Start(oneshot::Sender<Result<JobId, FlashError>>),
    Control {
        action: JobAction,
        reply: oneshot::Sender<Result<Job, FlashError>>,
    },
}

impl Waiter {
    pub(super) fn action(&self) -> JobAction {
        match self {
            Waiter::Start(_) => JobAction::Start,
            Waiter::Control { action, .. } => *action,
        }
    }

    /// Resolve successfully. Start waiters get the confirmed id; control
    /// waiters get the job snapshot, or `UnknownJob` if it has vanished.
    pub(super) fn succeed(self, job_id: JobId, job: Option<Job>) {
        match self {
            Waiter::Start(reply) => {
                let _ = reply.send(Ok(job_id));
            }
            Waiter::Control { reply, .. } => {
                let _ = reply.send(job.ok_or(FlashError::UnknownJob(job_id)));
            }
        }
    }

    pub(super) fn fail(self, err: FlashError) {
        match self {
            Waiter::Start(reply) => {
                let _ = reply.send(Err(err));
            }
            Waiter::Control { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// Waiters keyed by (origin id, seq).
#[derive(Debug, Default)]
pub(super) struct PendingAcks {
    waiters: BTreeMap<(JobId, u64), Waiter>,
}

impl PendingAcks {
    pub(super) fn insert(&mut self, origin: JobId, seq: u64, waiter: Waiter) {
        if let Some(old) = self.waiters.insert((origin.clone(), seq), waiter) {
            tracing::error!(job_id = %origin, seq, "duplicate waiter for seq");
            old.fail(FlashError::Protocol(format!("seq {seq} reused for job {origin}")));
        }
    }

    pub(super) fn take(&mut self, origin: &JobId, seq: u64) -> Option<Waiter> {
        self.waiters.remove(&(origin.clone(), seq))
    }

    /// Waiters for `origin` with a seq strictly below `seq`.
    pub(super) fn take_before(&mut self, origin: &JobId, seq: u64) -> Vec<(u64, Waiter)> {
        let keys: Vec<_> = self
            .waiters
            .range((origin.clone(), 0)..(origin.clone(), seq))
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter()
            .filter_map(|k| self.waiters.remove(&k).map(|w| (k.1, w)))
            .collect()
    }

    /// Every waiter for `origin` matching `pred`.
    pub(super) fn take_where(
        &mut self,
        origin: &JobId,
        pred: impl Fn(&Waiter) -> bool,
    ) -> Vec<(u64, Waiter)> {
        let keys: Vec<_> = self
            .waiters
            .range((origin.clone(), 0)..=(origin.clone(), u64::MAX))
            .filter(|(_, w)| pred(w))
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter()
            .filter_map(|k| self.waiters.remove(&k).map(|w| (k.1, w)))
            .collect()
    }

    pub(super) fn drain(&mut self) -> Vec<Waiter> {
        std::mem::take(&mut self.waiters).into_values().collect()
    }

    pub(super) fn len(&self) -> usize {
        self.waiters.len()
    }
}
