//! Per-method flashing pipelines as data: ordered named stages with byte weights.
//!
//! Used to label progress when the backend reports a percent without a stage.

use serde::Serialize;

use super::method::FlashMethod;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub name: String,
    /// Relative share of the job's bytes.
    pub weight: u32,
}

impl Stage {
    fn new(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pipeline {
    pub method: FlashMethod,
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn total_weight(&self) -> u32 {
        self.stages.iter().map(|s| s.weight).sum()
    }

    /// Stage active at `percent` of overall progress.
    pub fn stage_at(&self, percent: u8) -> Option<&Stage> {
        let total = self.total_weight();
        if total == 0 {
            return self.stages.first();
        }
        let point = (percent.min(100) as u64) * total as u64;
        let mut upper = 0u64;
        for stage in &self.stages {
            upper += stage.weight as u64 * 100;
            if point < upper {
                return Some(stage);
            }
        }
        self.stages.last()
    }
}

/// Pipeline for `method`. Fastboot-style methods get one stage per partition.
pub fn stages_for(method: FlashMethod, partitions: &[String]) -> Pipeline {
    let stages = match method {
        FlashMethod::Odin => vec![
            Stage::new("Setup connection", 2),
            Stage::new("BL (bootloader)", 5),
            Stage::new("AP (system)", 70),
            Stage::new("CP (modem)", 8),
            Stage::new("CSC (carrier)", 12),
            Stage::new("Reboot", 3),
        ],
        FlashMethod::Edl => vec![
            Stage::new("Sahara handshake", 2),
            Stage::new("Upload Firehose programmer", 8),
            Stage::new("Configure storage", 2),
            Stage::new("Program partitions", 78),
            Stage::new("Verify", 8),
            Stage::new("Reset", 2),
        ],
        FlashMethod::SpFlash => vec![
            Stage::new("Parse scatter file", 2),
            Stage::new("Connect BROM", 3),
            Stage::new("Download agent", 5),
            Stage::new("Download images", 82),
            Stage::new("Checksum", 8),
        ],
        FlashMethod::Dfu => vec![
            Stage::new("Send iBSS", 3),
            Stage::new("Send iBEC", 3),
            Stage::new("Restore ramdisk", 10),
            Stage::new("Restore filesystem", 78),
            Stage::new("Finalize", 6),
        ],
        FlashMethod::AdbSideload | FlashMethod::Recovery => vec![
            Stage::new("Transfer package", 60),
            Stage::new("Verify package", 10),
            Stage::new("Install", 30),
        ],
        FlashMethod::Fastboot => {
            let mut stages: Vec<Stage> = partitions
                .iter()
                .map(|p| Stage::new(format!("Flash {p}"), 10))
                .collect();
            if stages.is_empty() {
                stages.push(Stage::new("Flash", 10));
            }
            stages.push(Stage::new("Reboot", 1));
            stages
        }
    };
    Pipeline { method, stages }
}
