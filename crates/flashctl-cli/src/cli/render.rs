//! Plain-text rendering of jobs and connection state.

use flashctl_core::job::Job;
use flashctl_core::transport::{ConnectionState, Phase};
use flashctl_core::JobStatus;

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// One status line for a running job.
pub fn progress_line(job: &Job) -> String {
    let mut line = format!(
        "{:<20} {:<10} {:>3}%  {}",
        job.id, job.status, job.progress_percent, job.current_stage
    );
    if let Some(partition) = &job.current_partition {
        line.push_str(&format!(" [{partition}]"));
    }
    if job.total_bytes > 0 {
        line.push_str(&format!(
            "  {}/{}",
            format_bytes(job.bytes_transferred),
            format_bytes(job.total_bytes)
        ));
    }
    if job.transfer_speed_bytes_per_sec > 0 {
        line.push_str(&format!("  {}/s", format_bytes(job.transfer_speed_bytes_per_sec)));
    }
    if job.is_stalled() {
        line.push_str("  (stalled)");
    }
    line
}

/// Final line for a finished job.
pub fn summary(job: &Job) -> String {
    let secs = job.duration_ms() as f64 / 1000.0;
    match job.status {
        JobStatus::Completed => format!(
            "{} completed in {secs:.1}s ({} written)",
            job.id,
            format_bytes(job.bytes_transferred)
        ),
        JobStatus::Failed => format!(
            "{} failed after {secs:.1}s: {}",
            job.id,
            job.error.as_deref().unwrap_or("unknown error")
        ),
        status => format!("{} {status} after {secs:.1}s at {}%", job.id, job.progress_percent),
    }
}

pub fn connection(state: &ConnectionState) -> String {
    match state.phase {
        Phase::Connected => "connection: connected".to_string(),
        Phase::Connecting => format!("connection: connecting (attempt {})", state.reconnect_attempt),
        Phase::Disconnected => match state.next_backoff_ms {
            Some(ms) => format!(
                "connection: lost, retry {} in {ms} ms",
                state.reconnect_attempt
            ),
            None => "connection: disconnected".to_string(),
        },
        Phase::Offline => format!(
            "connection: offline after {} attempts",
            state.reconnect_attempt
        ),
    }
}
