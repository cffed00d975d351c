pub mod config;
pub mod error;
pub mod logging;

// Orchestrator layers, leaves first.
pub mod controller;
pub mod frame;
pub mod history;
pub mod job;
pub mod lock_table;
pub mod registry;
pub mod transport;

pub use controller::{Confirmation, JobController, JobUpdate, Orchestrator};
pub use error::{FlashError, TransportError};
pub use job::{FlashMethod, FlashRequest, Job, JobId, JobStatus};
