use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use super::method::{DeviceBrand, FlashMethod};
use super::request::FlashRequest;
use super::status::JobStatus;

/// Lines of backend log kept per job.
pub const MAX_LOG_LINES: usize = 500;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Opaque job identifier. Client-assigned ids are prefixed `local-` until the
/// backend confirms the job under its own id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn provisional() -> Self {
        JobId(format!("local-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_provisional(&self) -> bool {
        self.0.starts_with("local-")
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        JobId(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningKind {
    /// No progress despite a live (or recently live) connection.
    Stalled,
    /// An outbound control frame for this job was dropped from the offline queue.
    FrameDropped,
    /// Warning-level log line from the backend.
    Backend,
}

/// Non-fatal notice attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobWarning {
    pub kind: WarningKind,
    pub message: String,
    pub at: u64,
}

/// Derived control capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub can_pause: bool,
    pub can_resume: bool,
    pub can_cancel: bool,
}

/// One flashing operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    /// Client-assigned id; kept as an alias after the backend confirms.
    pub provisional_id: Option<JobId>,
    /// Backend has acknowledged the job (or created it).
    pub confirmed: bool,
    /// Created from an inbound frame for a job this client never started.
    pub shadow: bool,
    pub device_serial: String,
    pub device_brand: DeviceBrand,
    pub flash_method: Option<FlashMethod>,
    pub partitions: Vec<String>,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub current_stage: String,
    pub current_partition: Option<String>,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub transfer_speed_bytes_per_sec: u64,
    pub warnings: Vec<JobWarning>,
    pub logs: Vec<String>,
    pub error: Option<String>,
    pub started_at: u64,
    pub completed_at: Option<u64>,
    pub last_acked_seq: Option<u64>,
}

impl Job {
    /// Job as created by `startFlash`, before any acknowledgement.
    pub fn provisional(id: JobId, request: &FlashRequest) -> Self {
        let mut job = Self::blank(id.clone(), request.device_serial.clone(), JobStatus::Preparing);
        job.provisional_id = Some(id);
        job.device_brand = request.device_brand;
        job.flash_method = Some(request.flash_method);
        job.partitions = request.partition_names();
        job.current_stage = "Preparing".to_string();
        job
    }

    /// Job learned about from the backend only.
    pub fn shadow(id: JobId, device_serial: String, status: JobStatus) -> Self {
        let mut job = Self::blank(id, device_serial, status);
        job.confirmed = true;
        job.shadow = true;
        job
    }

    fn blank(id: JobId, device_serial: String, status: JobStatus) -> Self {
        Self {
            id,
            provisional_id: None,
            confirmed: false,
            shadow: false,
            device_serial,
            device_brand: DeviceBrand::Unknown,
            flash_method: None,
            partitions: Vec::new(),
            status,
            progress_percent: 0,
            current_stage: String::new(),
            current_partition: None,
            bytes_transferred: 0,
            total_bytes: 0,
            transfer_speed_bytes_per_sec: 0,
            warnings: Vec::new(),
            logs: Vec::new(),
            error: None,
            started_at: now_millis(),
            completed_at: None,
            last_acked_seq: None,
        }
    }

    /// Stable key for the job's whole life: the provisional id when the client
    /// started it, otherwise the backend id.
    pub fn origin_id(&self) -> &JobId {
        self.provisional_id.as_ref().unwrap_or(&self.id)
    }

    /// True if `id` is this job's current or provisional id.
    pub fn answers_to(&self, id: &JobId) -> bool {
        &self.id == id || self.provisional_id.as_ref() == Some(id)
    }

    fn interruptible(&self) -> bool {
        self.flash_method.is_some_and(FlashMethod::interruptible)
    }

    pub fn can_pause(&self) -> bool {
        self.status == JobStatus::Flashing && self.interruptible()
    }

    pub fn can_resume(&self) -> bool {
        self.status == JobStatus::Paused && self.interruptible()
    }

    pub fn can_cancel(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            can_pause: self.can_pause(),
            can_resume: self.can_resume(),
            can_cancel: self.can_cancel(),
        }
    }

    pub fn is_stalled(&self) -> bool {
        self.warnings.iter().any(|w| w.kind == WarningKind::Stalled)
    }

    /// Attach a warning. A job carries at most one stalled warning.
    pub fn add_warning(&mut self, kind: WarningKind, message: impl Into<String>) {
        if kind == WarningKind::Stalled && self.is_stalled() {
            return;
        }
        self.warnings.push(JobWarning {
            kind,
            message: message.into(),
            at: now_millis(),
        });
    }

    /// Drop the stalled warning; returns whether one was present.
    pub fn clear_stalled(&mut self) -> bool {
        let before = self.warnings.len();
        self.warnings.retain(|w| w.kind != WarningKind::Stalled);
        before != self.warnings.len()
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        if self.logs.len() >= MAX_LOG_LINES {
            self.logs.remove(0);
        }
        self.logs.push(line.into());
    }

    /// Wall-clock run time, up to completion or now.
    pub fn duration_ms(&self) -> u64 {
        self.completed_at
            .unwrap_or_else(now_millis)
            .saturating_sub(self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> FlashRequest {
        FlashRequest::new("SER1", DeviceBrand::Google, FlashMethod::Fastboot, &["boot"])
    }

    #[test]
    fn provisional_job_starts_preparing_and_answers_to_its_id() {
        let id = JobId::provisional();
        let job = Job::provisional(id.clone(), &request());
        assert!(id.is_provisional());
        assert_eq!(job.status, JobStatus::Preparing);
        assert_eq!(job.origin_id(), &id);
        assert!(job.answers_to(&id));
        assert!(!job.confirmed);
        assert_eq!(
            job.capabilities(),
            Capabilities {
                can_pause: false,
                can_resume: false,
                can_cancel: true
            }
        );
    }

    #[test]
    fn stalled_warning_is_deduplicated_and_clearable() {
        let mut job = Job::provisional(JobId::provisional(), &request());
        job.add_warning(WarningKind::Stalled, "no progress");
        job.add_warning(WarningKind::Stalled, "no progress again");
        job.add_warning(WarningKind::Backend, "low battery");
        assert_eq!(job.warnings.len(), 2);
        assert!(job.clear_stalled());
        assert!(!job.is_stalled());
        assert_eq!(job.warnings.len(), 1);
        assert!(!job.clear_stalled());
    }

    #[test]
    fn log_is_bounded() {
        let mut job = Job::provisional(JobId::provisional(), &request());
        for i in 0..(MAX_LOG_LINES + 10) {
            job.push_log(format!("line {i}"));
        }
        assert_eq!(job.logs.len(), MAX_LOG_LINES);
        assert_eq!(job.logs[0], "line 10");
    }

    #[test]
    fn shadow_job_without_method_cannot_pause() {
        let mut job = Job::shadow(JobId::from("srv-1"), "SER".into(), JobStatus::Flashing);
        assert!(!job.can_pause());
        job.flash_method = Some(FlashMethod::Odin);
        assert!(job.can_pause());
    }
}
