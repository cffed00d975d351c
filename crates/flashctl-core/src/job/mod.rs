//! Flash job data model.
//!
//! `Job` is plain data; all mutation goes through `registry::JobRegistry`.
//! Methods, brands and pipelines are modeled as data so the state machine
//! stays brand-agnostic.

mod capability;
mod method;
pub mod pipeline;
mod request;
mod status;
mod types;

pub use capability::{BuiltinCapabilities, CapabilityLookup, DeviceCapabilities, DeviceMode};
pub use method::{DeviceBrand, FlashMethod};
pub use request::{FlashRequest, PartitionImage};
pub use status::{JobAction, JobStatus};
pub use types::{now_millis, Capabilities, Job, JobId, JobWarning, WarningKind, MAX_LOG_LINES};
