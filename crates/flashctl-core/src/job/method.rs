use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Flashing protocol driven by the backend for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlashMethod {
    Fastboot,
    Odin,
    Edl,
    Dfu,
    SpFlash,
    AdbSideload,
    Recovery,
}

impl FlashMethod {
    pub const ALL: [FlashMethod; 7] = [
        FlashMethod::Fastboot,
        FlashMethod::Odin,
        FlashMethod::Edl,
        FlashMethod::Dfu,
        FlashMethod::SpFlash,
        FlashMethod::AdbSideload,
        FlashMethod::Recovery,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FlashMethod::Fastboot => "fastboot",
            FlashMethod::Odin => "odin",
            FlashMethod::Edl => "edl",
            FlashMethod::Dfu => "dfu",
            FlashMethod::SpFlash => "sp-flash",
            FlashMethod::AdbSideload => "adb-sideload",
            FlashMethod::Recovery => "recovery",
        }
    }

    /// Whether the backend can stop this method between partitions and pick
    /// up again. EDL, DFU and recovery sideloads are single-shot writes.
    pub fn interruptible(self) -> bool {
        match self {
            FlashMethod::Fastboot
            | FlashMethod::Odin
            | FlashMethod::SpFlash
            | FlashMethod::AdbSideload => true,
            FlashMethod::Edl | FlashMethod::Dfu | FlashMethod::Recovery => false,
        }
    }
}

impl fmt::Display for FlashMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for FlashMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        FlashMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown flash method: {s}"))
    }
}

/// Device vendor; selects the capability entry used for validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceBrand {
    Samsung,
    Google,
    Xiaomi,
    Oneplus,
    Motorola,
    Lg,
    Huawei,
    Oppo,
    Vivo,
    Realme,
    Asus,
    Sony,
    Nokia,
    Htc,
    Zte,
    Lenovo,
    Tcl,
    Honor,
    Nothing,
    Fairphone,
    Mediatek,
    Apple,
    Unknown,
}

impl DeviceBrand {
    pub const ALL: [DeviceBrand; 23] = [
        DeviceBrand::Samsung,
        DeviceBrand::Google,
        DeviceBrand::Xiaomi,
        DeviceBrand::Oneplus,
        DeviceBrand::Motorola,
        DeviceBrand::Lg,
        DeviceBrand::Huawei,
        DeviceBrand::Oppo,
        DeviceBrand::Vivo,
        DeviceBrand::Realme,
        DeviceBrand::Asus,
        DeviceBrand::Sony,
        DeviceBrand::Nokia,
        DeviceBrand::Htc,
        DeviceBrand::Zte,
        DeviceBrand::Lenovo,
        DeviceBrand::Tcl,
        DeviceBrand::Honor,
        DeviceBrand::Nothing,
        DeviceBrand::Fairphone,
        DeviceBrand::Mediatek,
        DeviceBrand::Apple,
        DeviceBrand::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceBrand::Samsung => "samsung",
            DeviceBrand::Google => "google",
            DeviceBrand::Xiaomi => "xiaomi",
            DeviceBrand::Oneplus => "oneplus",
            DeviceBrand::Motorola => "motorola",
            DeviceBrand::Lg => "lg",
            DeviceBrand::Huawei => "huawei",
            DeviceBrand::Oppo => "oppo",
            DeviceBrand::Vivo => "vivo",
            DeviceBrand::Realme => "realme",
            DeviceBrand::Asus => "asus",
            DeviceBrand::Sony => "sony",
            DeviceBrand::Nokia => "nokia",
            DeviceBrand::Htc => "htc",
            DeviceBrand::Zte => "zte",
            DeviceBrand::Lenovo => "lenovo",
            DeviceBrand::Tcl => "tcl",
            DeviceBrand::Honor => "honor",
            DeviceBrand::Nothing => "nothing",
            DeviceBrand::Fairphone => "fairphone",
            DeviceBrand::Mediatek => "mediatek",
            DeviceBrand::Apple => "apple",
            DeviceBrand::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceBrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for DeviceBrand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        DeviceBrand::ALL
            .into_iter()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| format!("unknown device brand: {s}"))
    }
}
