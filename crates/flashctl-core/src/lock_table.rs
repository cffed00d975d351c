//! Per-device exclusivity, derived from the registry.
//!
//! The table holds no state of its own: it is a borrowed view over the
//! active jobs, so it cannot drift from job status. Jobs without a serial
//! (shadow jobs the backend did not attribute to a device) claim nothing.

use std::collections::BTreeMap;

use crate::error::FlashError;
use crate::job::{Job, JobId};
use crate::registry::JobRegistry;

pub struct DeviceLockTable<'a> {
    registry: &'a JobRegistry,
}

impl<'a> DeviceLockTable<'a> {
    pub fn new(registry: &'a JobRegistry) -> Self {
        Self { registry }
    }

    /// The non-terminal job holding `serial`, if any.
    pub fn holder(&self, serial: &str) -> Option<&'a Job> {
        if serial.is_empty() {
            return None;
        }
        self.registry
            .jobs()
            .find(|j| j.device_serial == serial && !j.status.is_terminal())
    }

    /// Fails fast with `DeviceBusy` when another job owns `serial`.
    pub fn ensure_free(&self, serial: &str) -> Result<(), FlashError> {
        match self.holder(serial) {
            Some(job) => Err(FlashError::DeviceBusy {
                serial: serial.to_string(),
                job_id: job.id.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Serial → owning job id for every locked device.
    pub fn locks(&self) -> BTreeMap<String, JobId> {
        self.registry
            .jobs()
            .filter(|j| !j.device_serial.is_empty() && !j.status.is_terminal())
            .map(|j| (j.device_serial.clone(), j.id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{DeviceBrand, FlashMethod, FlashRequest};
    use crate::registry::RegistryEvent;
    use tokio::time::Instant;

    #[test]
    fn busy_serial_is_reported_with_owner() {
        let mut registry = JobRegistry::new(8);
        let req = FlashRequest::new("SER-A", DeviceBrand::Google, FlashMethod::Fastboot, &["boot"]);
        let id = JobId::provisional();
        registry.apply(
            RegistryEvent::Created(Job::provisional(id.clone(), &req)),
            Instant::now(),
        );

        let table = registry.lock_table();
        assert_eq!(table.holder("SER-A").map(|j| j.id.clone()), Some(id.clone()));
        assert!(table.ensure_free("SER-B").is_ok());
        assert_eq!(
            table.ensure_free("SER-A"),
            Err(FlashError::DeviceBusy {
                serial: "SER-A".to_string(),
                job_id: id.clone(),
            })
        );
        assert_eq!(table.locks().get("SER-A"), Some(&id));
        assert!(table.holder("").is_none());
    }
}
