//! `flashctl stages` – print a method's pipeline.

use flashctl_core::job::{pipeline, FlashMethod};

pub fn run_stages(method: FlashMethod, partitions: &[String]) {
    let pipeline = pipeline::stages_for(method, partitions);
    let total = pipeline.total_weight().max(1);
    println!("{:<4} {:<28} {:>6}", "#", "STAGE", "SHARE");
    for (i, stage) in pipeline.stages.iter().enumerate() {
        let share = stage.weight as f64 * 100.0 / total as f64;
        println!("{:<4} {:<28} {:>5.1}%", i + 1, stage.name, share);
    }
}
