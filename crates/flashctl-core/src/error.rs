//! Error taxonomy for the orchestrator.
//!
//! Local errors (`Validation`, `DeviceBusy`, `InvalidTransition`, `UnknownJob`)
//! are returned before anything touches the network. `Transport` never fails a
//! job by itself; only `ServerRejected` or the reconnect grace period does.

use thiserror::Error;

use crate::job::{JobAction, JobId, JobStatus};

/// Failures of the backend channel. Kept separate so the transport task can
/// report them without knowing about jobs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connecting to the endpoint failed.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Writing a frame to an open channel failed.
    #[error("send failed: {0}")]
    Send(String),
    /// The channel closed underneath us.
    #[error("connection closed")]
    Closed,
    /// No acknowledgement for a control frame within the ack window.
    #[error("no acknowledgement for job {job_id} seq {seq}")]
    AckTimeout { job_id: JobId, seq: u64 },
    /// Reconnect attempts exhausted; the channel stays offline until asked to reconnect.
    #[error("offline after {attempts} reconnect attempts")]
    Offline { attempts: u32 },
    /// A second frame handler was registered on the same transport.
    #[error("a frame handler is already registered")]
    HandlerAlreadyRegistered,
    /// The orchestrator task is gone.
    #[error("orchestrator stopped")]
    Stopped,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
            other => TransportError::Send(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlashError {
    /// Bad request, caught before any network call.
    #[error("invalid flash request: {0}")]
    Validation(String),
    /// A non-terminal job already owns the device serial.
    #[error("device {serial} is busy with job {job_id}")]
    DeviceBusy { serial: String, job_id: JobId },
    /// The requested operation is not valid from the job's current status.
    #[error("cannot {action} job {job_id} while {status}")]
    InvalidTransition {
        job_id: JobId,
        status: JobStatus,
        action: JobAction,
    },
    /// No active or archived job with this id.
    #[error("unknown job {0}")]
    UnknownJob(JobId),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Malformed frame or a frame that cannot be attributed to a job.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Explicit error frame from the backend.
    #[error("server rejected job {job_id}: {reason}")]
    ServerRejected { job_id: JobId, reason: String },
}

impl FlashError {
    /// True for errors raised locally without a round trip.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            FlashError::Validation(_)
                | FlashError::DeviceBusy { .. }
                | FlashError::InvalidTransition { .. }
                | FlashError::UnknownJob(_)
        )
    }
}
