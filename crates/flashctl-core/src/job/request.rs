use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::FlashError;

use super::capability::CapabilityLookup;
use super::method::{DeviceBrand, FlashMethod};

/// One partition to write, with the image the backend should use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionImage {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl PartitionImage {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_path: None,
            size: None,
        }
    }
}

/// Parameters of `startFlash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashRequest {
    pub device_serial: String,
    pub device_brand: DeviceBrand,
    pub flash_method: FlashMethod,
    pub partitions: Vec<PartitionImage>,
    #[serde(default)]
    pub verify_after_flash: bool,
    #[serde(default)]
    pub auto_reboot: bool,
    #[serde(default)]
    pub wipe_user_data: bool,
}

impl FlashRequest {
    pub fn new(
        device_serial: impl Into<String>,
        device_brand: DeviceBrand,
        flash_method: FlashMethod,
        partitions: &[&str],
    ) -> Self {
        Self {
            device_serial: device_serial.into(),
            device_brand,
            flash_method,
            partitions: partitions.iter().map(|p| PartitionImage::named(*p)).collect(),
            verify_after_flash: false,
            auto_reboot: false,
            wipe_user_data: false,
        }
    }

    pub fn partition_names(&self) -> Vec<String> {
        self.partitions.iter().map(|p| p.name.clone()).collect()
    }

    /// Local checks that run before any frame is sent.
    pub fn validate(&self, lookup: &dyn CapabilityLookup) -> Result<(), FlashError> {
        if self.device_serial.trim().is_empty() {
            return Err(FlashError::Validation("device serial is empty".to_string()));
        }
        if self.partitions.is_empty() {
            return Err(FlashError::Validation(
                "at least one partition is required".to_string(),
            ));
        }
        if let Some(p) = self.partitions.iter().find(|p| p.name.trim().is_empty()) {
            return Err(FlashError::Validation(format!(
                "partition with empty name (image {:?})",
                p.image_path
            )));
        }
        let caps = lookup.capabilities(self.device_brand).ok_or_else(|| {
            FlashError::Validation(format!("no capability entry for brand {}", self.device_brand))
        })?;
        if !caps.supports(self.flash_method) {
            return Err(FlashError::Validation(format!(
                "{} does not support {}",
                self.device_brand, self.flash_method
            )));
        }
        if let Some(p) = self
            .partitions
            .iter()
            .find(|p| !caps.supports_partition(&p.name))
        {
            return Err(FlashError::Validation(format!(
                "partition {} is not supported on {}",
                p.name, self.device_brand
            )));
        }
        Ok(())
    }
}
