//! Device capability lookup: which methods and partitions a brand supports.
//!
//! The real table belongs to the device layer; `BuiltinCapabilities` is the
//! default used when no collaborator is supplied.

use serde::Serialize;

use super::method::{DeviceBrand, FlashMethod};

/// Mode the device must be in before the backend can start a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    Normal,
    Fastboot,
    Recovery,
    Download,
    Edl,
    Dfu,
    Brom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    pub brand: DeviceBrand,
    pub supported_methods: Vec<FlashMethod>,
    pub required_device_state: DeviceMode,
    /// Partitions the brand accepts. Empty means unrestricted.
    pub partition_support: Vec<String>,
    pub bootloader_unlock_required: bool,
}

impl DeviceCapabilities {
    pub fn supports(&self, method: FlashMethod) -> bool {
        self.supported_methods.contains(&method)
    }

    pub fn supports_partition(&self, name: &str) -> bool {
        self.partition_support.is_empty() || self.partition_support.iter().any(|p| p == name)
    }
}

/// Collaborator seam for the per-brand capability table.
pub trait CapabilityLookup: Send + Sync {
    fn capabilities(&self, brand: DeviceBrand) -> Option<DeviceCapabilities>;
}

/// Static capability table.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCapabilities;

const ANDROID_BASE: &[&str] = &["boot", "system", "recovery", "userdata", "cache"];

fn entry(
    brand: DeviceBrand,
    methods: &[FlashMethod],
    mode: DeviceMode,
    extra: &[&str],
    unlock: bool,
) -> DeviceCapabilities {
    let partition_support = if mode == DeviceMode::Dfu {
        Vec::new()
    } else {
        ANDROID_BASE
            .iter()
            .chain(extra.iter())
            .map(|s| s.to_string())
            .collect()
    };
    DeviceCapabilities {
        brand,
        supported_methods: methods.to_vec(),
        required_device_state: mode,
        partition_support,
        bootloader_unlock_required: unlock,
    }
}

impl CapabilityLookup for BuiltinCapabilities {
    fn capabilities(&self, brand: DeviceBrand) -> Option<DeviceCapabilities> {
        use DeviceBrand as B;
        use FlashMethod as M;
        let caps = match brand {
            B::Samsung => entry(
                brand,
                &[M::Odin, M::Fastboot],
                DeviceMode::Download,
                &["vendor", "modem", "bootloader"],
                true,
            ),
            B::Google => entry(
                brand,
                &[M::Fastboot, M::AdbSideload],
                DeviceMode::Fastboot,
                &["vendor", "product", "dtbo", "vbmeta"],
                true,
            ),
            B::Xiaomi => entry(
                brand,
                &[M::Fastboot, M::Edl],
                DeviceMode::Fastboot,
                &["vendor", "cust"],
                true,
            ),
            B::Zte => entry(brand, &[M::Fastboot, M::Edl], DeviceMode::Fastboot, &[], true),
            B::Oneplus | B::Asus => entry(
                brand,
                &[M::Fastboot, M::AdbSideload],
                DeviceMode::Fastboot,
                &["vendor", "modem"],
                true,
            ),
            B::Fairphone => entry(
                brand,
                &[M::Fastboot, M::AdbSideload],
                DeviceMode::Fastboot,
                &["vendor"],
                false,
            ),
            B::Lg | B::Oppo | B::Vivo => entry(
                brand,
                &[M::Fastboot, M::Recovery],
                DeviceMode::Fastboot,
                &["vendor"],
                true,
            ),
            B::Motorola => entry(brand, &[M::Fastboot], DeviceMode::Fastboot, &["vendor", "logo"], true),
            B::Sony => entry(brand, &[M::Fastboot], DeviceMode::Fastboot, &["vendor", "fota"], true),
            B::Nothing => entry(
                brand,
                &[M::Fastboot],
                DeviceMode::Fastboot,
                &["vendor", "dtbo", "vbmeta"],
                true,
            ),
            B::Huawei | B::Realme | B::Nokia | B::Htc | B::Lenovo | B::Tcl | B::Honor => {
                entry(brand, &[M::Fastboot], DeviceMode::Fastboot, &["vendor"], true)
            }
            B::Mediatek => entry(
                brand,
                &[M::SpFlash, M::Fastboot],
                DeviceMode::Brom,
                &["preloader", "lk", "vendor", "md1img"],
                false,
            ),
            B::Apple => entry(brand, &[M::Dfu, M::Recovery], DeviceMode::Dfu, &[], false),
            B::Unknown => return None,
        };
        Some(caps)
    }
}
