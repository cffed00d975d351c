//! `flashctl config` – show where config lives and what is in effect.

use anyhow::Result;
use flashctl_core::config;

pub fn run_config() -> Result<()> {
    let path = config::config_path()?;
    let cfg = config::load_or_init_at(&path)?;
    let policy = cfg.reconnect_policy();
    println!("config file:        {}", path.display());
    println!("endpoint:           {}", cfg.endpoint);
    println!("outbound queue:     {} frames", cfg.outbound_queue_capacity);
    println!("history:            {} jobs", cfg.history_capacity);
    println!("ack timeout:        {} ms", cfg.ack_timeout_ms);
    println!("heartbeat timeout:  {} ms", cfg.heartbeat_timeout_ms);
    println!("reconnect grace:    {} ms", cfg.reconnect_grace_ms);
    println!("keepalive:          {} ms", cfg.keepalive_interval_ms);
    println!(
        "reconnect backoff:  base {} ms x{} (cap {} ms, jitter {:.0}%), {} attempts",
        policy.base_delay.as_millis(),
        policy.factor,
        policy.max_delay.as_millis(),
        policy.jitter * 100.0,
        policy.max_attempts
    );
    Ok(())
}
