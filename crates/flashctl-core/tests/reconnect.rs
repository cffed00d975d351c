//! Integration tests: disconnects, stalls, backoff, offline queueing.

mod common;

use std::time::Duration;

use flashctl_core::config::FlashConfig;
use flashctl_core::job::WarningKind;
use flashctl_core::registry::LOST_AFTER_RECONNECT;
use flashctl_core::transport::Phase;
use flashctl_core::{Confirmation, JobStatus};

use common::{flashing_job, progress, settle, wait_connected, wait_for_phase};

#[tokio::test(start_paused = true)]
async fn disconnect_stalls_and_fresh_progress_recovers() {
    let (ctl, mut backend) = common::spawn();
    let id = flashing_job(&ctl, &mut backend, "SER1", "srv-1").await;

    backend.drop_connection();
    settle().await;
    let job = ctl.job(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Flashing);
    assert!(job.is_stalled());

    wait_connected(&ctl).await;
    assert_eq!(backend.connect_count(), 2);
    backend.push(&progress("srv-1", 0, 40.0));
    settle().await;

    let job = ctl.job(&id).await.unwrap().unwrap();
    assert!(!job.is_stalled());
    assert_eq!(job.status, JobStatus::Flashing);
    assert_eq!(job.progress_percent, 40);

    // Well past the grace window; the job keeps running.
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(
        ctl.job(&id).await.unwrap().unwrap().status,
        JobStatus::Flashing
    );
}

#[tokio::test(start_paused = true)]
async fn silence_after_reconnect_fails_job() {
    let (ctl, mut backend) = common::spawn();
    let id = flashing_job(&ctl, &mut backend, "SER1", "srv-1").await;

    backend.drop_connection();
    settle().await;
    wait_connected(&ctl).await;

    tokio::time::sleep(Duration::from_secs(12)).await;
    let job = ctl.job(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some(LOST_AFTER_RECONNECT));
    assert_eq!(ctl.history(5).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_silence_marks_stalled_not_failed() {
    let (ctl, mut backend) = common::spawn();
    let id = flashing_job(&ctl, &mut backend, "SER1", "srv-1").await;

    tokio::time::sleep(Duration::from_secs(17)).await;
    let job = ctl.job(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Flashing);
    assert!(job.warnings.iter().any(|w| w.kind == WarningKind::Stalled));

    backend.push(&progress("srv-1", 0, 5.0));
    settle().await;
    assert!(!ctl.job(&id).await.unwrap().unwrap().is_stalled());
}

#[tokio::test(start_paused = true)]
async fn frames_sent_while_offline_are_flushed_on_reconnect() {
    let (ctl, mut backend) = common::spawn();
    let id = flashing_job(&ctl, &mut backend, "SER1", "srv-1").await;

    backend.refuse_connections(true);
    backend.drop_connection();
    settle().await;

    let job = ctl.pause_flash(&id, Confirmation::Optimistic).await.unwrap();
    assert_eq!(job.status, JobStatus::Paused);
    settle().await;
    assert!(backend.try_next_sent().is_none());

    backend.refuse_connections(false);
    wait_connected(&ctl).await;
    let sent = backend.next_sent().await.unwrap();
    assert_eq!(sent["type"], "flash.pause");
    assert_eq!(sent["seq"], 1);
}

#[tokio::test(start_paused = true)]
async fn queue_overflow_drops_oldest_and_warns() {
    let config = FlashConfig {
        outbound_queue_capacity: 1,
        ..common::config()
    };
    let (ctl, mut backend) = common::spawn_with(config);
    let id = flashing_job(&ctl, &mut backend, "SER1", "srv-1").await;

    backend.refuse_connections(true);
    backend.drop_connection();
    settle().await;

    ctl.pause_flash(&id, Confirmation::Optimistic).await.unwrap();
    ctl.resume_flash(&id, Confirmation::Optimistic).await.unwrap();
    settle().await;

    let job = ctl.job(&id).await.unwrap().unwrap();
    assert!(job.warnings.iter().any(|w| w.kind == WarningKind::FrameDropped));

    backend.refuse_connections(false);
    wait_connected(&ctl).await;
    let sent = backend.next_sent().await.unwrap();
    assert_eq!(sent["type"], "flash.resume");
    assert_eq!(sent["seq"], 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_backoff_goes_offline_until_reconnect() {
    let (ctl, mut backend) = common::spawn();
    flashing_job(&ctl, &mut backend, "SER1", "srv-1").await;

    backend.refuse_connections(true);
    backend.drop_connection();
    wait_for_phase(&ctl, Phase::Offline).await;
    let state = ctl.connection_state().borrow().clone();
    assert_eq!(state.reconnect_attempt, 3);
    assert_eq!(backend.connect_count(), 1);

    // Offline is sticky: no further attempts without an explicit reconnect.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(ctl.connection_state().borrow().phase, Phase::Offline);

    backend.refuse_connections(false);
    ctl.reconnect().await.unwrap();
    wait_connected(&ctl).await;
    assert_eq!(backend.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn keepalive_pings_while_connected() {
    let (ctl, mut backend) = common::spawn();
    wait_connected(&ctl).await;
    tokio::time::sleep(Duration::from_secs(65)).await;
    assert_eq!(backend.drain_pings(), 2);
}
