//! Shared harness: an orchestrator wired to an in-memory backend.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use flashctl_core::config::{FlashConfig, ReconnectConfig};
use flashctl_core::frame::{FrameKind, FramePayload, InboundFrame};
use flashctl_core::job::{BuiltinCapabilities, DeviceBrand, FlashMethod, FlashRequest, JobId};
use flashctl_core::transport::memory::{memory_pair, MemoryBackend};
use flashctl_core::transport::Phase;
use flashctl_core::{Confirmation, JobController, JobStatus, Orchestrator};

/// Defaults with deterministic backoff (500ms, 1s, 2s, then offline).
pub fn config() -> FlashConfig {
    FlashConfig {
        reconnect: Some(ReconnectConfig {
            jitter: 0.0,
            max_attempts: 3,
            ..ReconnectConfig::default()
        }),
        ..FlashConfig::default()
    }
}

pub fn spawn() -> (JobController, MemoryBackend) {
    spawn_with(config())
}

pub fn spawn_with(config: FlashConfig) -> (JobController, MemoryBackend) {
    let (connector, backend) = memory_pair();
    let ctl = Orchestrator::spawn(config, Arc::new(connector), Arc::new(BuiltinCapabilities))
        .expect("spawn orchestrator");
    (ctl, backend)
}

/// Let every ready task run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub async fn wait_for_phase(ctl: &JobController, phase: Phase) {
    let mut state = ctl.connection_state();
    state
        .wait_for(|s| s.phase == phase)
        .await
        .expect("transport state channel closed");
}

pub async fn wait_connected(ctl: &JobController) {
    wait_for_phase(ctl, Phase::Connected).await;
}

pub fn fastboot_request(serial: &str) -> FlashRequest {
    FlashRequest::new(
        serial,
        DeviceBrand::Google,
        FlashMethod::Fastboot,
        &["boot", "system"],
    )
}

pub fn started(provisional: &JobId, server_id: &str) -> InboundFrame {
    InboundFrame::new(FrameKind::Started, server_id, 0).with_payload(FramePayload {
        client_job_id: Some(provisional.clone()),
        ..FramePayload::default()
    })
}

pub fn progress(id: &str, seq: u64, percent: f64) -> InboundFrame {
    InboundFrame::new(FrameKind::Progress, id, seq).with_payload(FramePayload {
        progress_percent: Some(percent),
        ..FramePayload::default()
    })
}

/// Start a fastboot job and confirm it as `server_id`. Consumes the start frame.
pub async fn flashing_job(
    ctl: &JobController,
    backend: &mut MemoryBackend,
    serial: &str,
    server_id: &str,
) -> JobId {
    wait_connected(ctl).await;
    let id = ctl
        .start_flash(fastboot_request(serial), Confirmation::Optimistic)
        .await
        .expect("start");
    let sent = backend.next_sent().await.expect("start frame");
    assert_eq!(sent["type"], "flash.start");
    assert!(backend.push(&started(&id, server_id)));
    settle().await;
    let job = ctl.job(&id).await.unwrap().expect("job");
    assert_eq!(job.status, JobStatus::Flashing);
    JobId::from(server_id)
}
