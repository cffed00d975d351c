//! Bounded archive of finished jobs, most recent first.
//!
//! Jobs enter only through `finalize` when they reach a terminal status; past
//! `capacity` the oldest entry is evicted. The only later change is recording
//! the backend id of a job that finished before its start was acknowledged.

use serde::Serialize;
use std::collections::VecDeque;

use crate::job::{Job, JobId};

/// Archived job plus derived run statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub job: Job,
    pub duration_ms: u64,
    pub average_speed_bytes_per_sec: u64,
}

impl HistoryEntry {
    fn from_job(job: Job) -> Self {
        let duration_ms = job.duration_ms();
        let average_speed_bytes_per_sec = if duration_ms == 0 {
            0
        } else {
            job.bytes_transferred.saturating_mul(1000) / duration_ms
        };
        Self {
            job,
            duration_ms,
            average_speed_bytes_per_sec,
        }
    }
}

#[derive(Debug)]
pub struct HistoryArchive {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryArchive {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Archive a terminal job. Returns the evicted entry, if any.
    /// Non-terminal jobs are refused and handed back.
    pub fn finalize(&mut self, job: Job) -> Result<Option<HistoryEntry>, Job> {
        if !job.status.is_terminal() {
            return Err(job);
        }
        tracing::debug!(job_id = %job.id, status = %job.status, "archiving job");
        self.entries.push_front(HistoryEntry::from_job(job));
        if self.entries.len() > self.capacity {
            Ok(self.entries.pop_back())
        } else {
            Ok(None)
        }
    }

    /// Look up by backend or provisional id.
    pub fn get(&self, id: &JobId) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.job.answers_to(id))
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.get(id).is_some()
    }

    /// Up to `limit` entries, most recent first.
    pub fn list(&self, limit: usize) -> Vec<HistoryEntry> {
        self.entries.iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attach `backend_id` to an unconfirmed client-started entry known as
    /// `provisional`, so later frames under either id resolve to it.
    pub fn confirm(&mut self, provisional: &JobId, backend_id: &JobId) -> Option<&HistoryEntry> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| !e.job.confirmed && e.job.provisional_id.as_ref() == Some(provisional))?;
        entry.job.confirmed = true;
        if &entry.job.id != backend_id {
            tracing::info!(
                provisional = %provisional,
                job_id = %backend_id,
                status = %entry.job.status,
                "backend confirmed finished job"
            );
            entry.job.id = backend_id.clone();
        }
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;

    fn finished(id: &str, status: JobStatus) -> Job {
        let mut job = Job::shadow(JobId::from(id), format!("SER-{id}"), status);
        job.completed_at = Some(job.started_at + 2_000);
        job.bytes_transferred = 4_000;
        job
    }

    #[test]
    fn newest_first_and_evicts_oldest() {
        let mut archive = HistoryArchive::new(2);
        assert!(archive.finalize(finished("a", JobStatus::Completed)).unwrap().is_none());
        assert!(archive.finalize(finished("b", JobStatus::Failed)).unwrap().is_none());
        let evicted = archive
            .finalize(finished("c", JobStatus::Cancelled))
            .unwrap()
            .expect("oldest evicted");
        assert_eq!(evicted.job.id, JobId::from("a"));
        let ids: Vec<_> = archive.list(10).into_iter().map(|e| e.job.id).collect();
        assert_eq!(ids, vec![JobId::from("c"), JobId::from("b")]);
        assert!(!archive.contains(&JobId::from("a")));
    }

    #[test]
    fn refuses_active_jobs() {
        let mut archive = HistoryArchive::new(4);
        let job = Job::shadow(JobId::from("x"), "SER".into(), JobStatus::Flashing);
        assert!(archive.finalize(job).is_err());
        assert!(archive.is_empty());
    }

    #[test]
    fn entry_stats() {
        let mut archive = HistoryArchive::new(4);
        archive.finalize(finished("a", JobStatus::Completed)).unwrap();
        let entry = archive.get(&JobId::from("a")).unwrap();
        assert_eq!(entry.duration_ms, 2_000);
        assert_eq!(entry.average_speed_bytes_per_sec, 2_000);
    }

    #[test]
    fn late_backend_id_resolves_to_finished_job() {
        let mut archive = HistoryArchive::new(4);
        let local = JobId::from("local-1");
        let mut job = finished("local-1", JobStatus::Cancelled);
        job.provisional_id = Some(local.clone());
        job.confirmed = false;
        job.shadow = false;
        archive.finalize(job).unwrap();

        let backend = JobId::from("srv-1");
        assert!(archive.get(&backend).is_none());
        let entry = archive.confirm(&local, &backend).expect("entry");
        assert_eq!(entry.job.id, backend);
        assert_eq!(archive.get(&backend).map(|e| e.job.status), Some(JobStatus::Cancelled));
        assert!(archive.contains(&local));
        assert!(archive.confirm(&local, &JobId::from("srv-2")).is_none());
        assert_eq!(archive.len(), 1);
    }
}
