//! Integration tests: job lifecycle through the controller against an
//! in-memory backend, on tokio's paused clock.

mod common;

use flashctl_core::frame::{FrameKind, FramePayload, InboundFrame};
use flashctl_core::job::{DeviceBrand, FlashMethod, FlashRequest, JobId};
use flashctl_core::{Confirmation, FlashError, JobStatus, JobUpdate, TransportError};

use common::{flashing_job, progress, settle, started, wait_connected};

#[tokio::test(start_paused = true)]
async fn fastboot_job_runs_to_completion() {
    let (ctl, mut backend) = common::spawn();
    wait_connected(&ctl).await;
    let mut updates = ctl.subscribe();

    let id = ctl
        .start_flash(
            common::fastboot_request("R58M1234ABC"),
            Confirmation::Optimistic,
        )
        .await
        .unwrap();
    assert!(id.is_provisional());
    assert_eq!(
        ctl.job(&id).await.unwrap().unwrap().status,
        JobStatus::Preparing
    );

    let sent = backend.next_sent().await.unwrap();
    assert_eq!(sent["type"], "flash.start");
    assert_eq!(sent["seq"], 0);
    assert_eq!(sent["jobId"], id.as_str());
    assert_eq!(sent["payload"]["deviceSerial"], "R58M1234ABC");
    assert_eq!(sent["payload"]["partitions"][1]["name"], "system");

    backend.push(&started(&id, "srv-1"));
    settle().await;
    let job = ctl.job(&JobId::from("srv-1")).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Flashing);
    assert_eq!(job.progress_percent, 0);

    let mut last = 0;
    for pct in [25.0, 50.0, 75.0, 100.0] {
        backend.push(&progress("srv-1", 0, pct));
        settle().await;
        let p = ctl.job(&id).await.unwrap().unwrap().progress_percent;
        assert!(p > last, "progress must increase: {p} after {last}");
        last = p;
    }

    backend.push(&InboundFrame::new(FrameKind::Done, "srv-1", 0));
    settle().await;

    let job = ctl.job(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let caps = job.capabilities();
    assert!(!caps.can_pause && !caps.can_resume && !caps.can_cancel);
    assert!(ctl.active_jobs().await.unwrap().is_empty());
    let history = ctl.history(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].job.id, JobId::from("srv-1"));

    let mut saw_finalized = false;
    while let Ok(update) = updates.try_recv() {
        if let JobUpdate::Finalized(job) = update {
            assert_eq!(job.status, JobStatus::Completed);
            saw_finalized = true;
        }
    }
    assert!(saw_finalized);
}

#[tokio::test(start_paused = true)]
async fn busy_device_fails_fast_without_sending() {
    let (ctl, mut backend) = common::spawn();
    flashing_job(&ctl, &mut backend, "SER1", "srv-1").await;

    let err = ctl
        .start_flash(common::fastboot_request("SER1"), Confirmation::Acknowledged)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        FlashError::DeviceBusy {
            serial: "SER1".to_string(),
            job_id: JobId::from("srv-1"),
        }
    );
    settle().await;
    assert!(backend.try_next_sent().is_none());
}

#[tokio::test(start_paused = true)]
async fn invalid_requests_are_rejected_locally() {
    let (ctl, mut backend) = common::spawn();
    wait_connected(&ctl).await;

    let no_partitions = FlashRequest::new("SER1", DeviceBrand::Google, FlashMethod::Fastboot, &[]);
    assert!(matches!(
        ctl.start_flash(no_partitions, Confirmation::Optimistic).await,
        Err(FlashError::Validation(_))
    ));
    let wrong_method = FlashRequest::new("SER1", DeviceBrand::Google, FlashMethod::Odin, &["boot"]);
    assert!(matches!(
        ctl.start_flash(wrong_method, Confirmation::Optimistic).await,
        Err(FlashError::Validation(_))
    ));
    assert!(matches!(
        ctl.pause_flash(&JobId::from("nope"), Confirmation::Optimistic).await,
        Err(FlashError::UnknownJob(_))
    ));
    settle().await;
    assert!(backend.try_next_sent().is_none());
}

#[tokio::test(start_paused = true)]
async fn acknowledged_start_resolves_with_server_id() {
    let (ctl, mut backend) = common::spawn();
    wait_connected(&ctl).await;

    let caller = ctl.clone();
    let start = tokio::spawn(async move {
        caller
            .start_flash(common::fastboot_request("SER1"), Confirmation::Acknowledged)
            .await
    });
    let sent = backend.next_sent().await.unwrap();
    let provisional = JobId::from(sent["jobId"].as_str().unwrap());
    backend.push(&started(&provisional, "srv-7"));

    assert_eq!(start.await.unwrap(), Ok(JobId::from("srv-7")));
}

#[tokio::test(start_paused = true)]
async fn rejected_start_surfaces_server_reason() {
    let (ctl, mut backend) = common::spawn();
    wait_connected(&ctl).await;

    let caller = ctl.clone();
    let start = tokio::spawn(async move {
        caller
            .start_flash(common::fastboot_request("SER1"), Confirmation::Acknowledged)
            .await
    });
    let sent = backend.next_sent().await.unwrap();
    let provisional = sent["jobId"].as_str().unwrap().to_string();
    backend.push(
        &InboundFrame::new(FrameKind::Error, provisional.as_str(), 0).with_payload(FramePayload {
            error: Some("bootloader locked".to_string()),
            ..FramePayload::default()
        }),
    );

    let err = start.await.unwrap().unwrap_err();
    assert!(matches!(err, FlashError::ServerRejected { ref reason, .. } if reason == "bootloader locked"));
    assert!(ctl.job(&JobId::from(provisional)).await.unwrap().is_none());
    assert!(ctl.active_jobs().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume_keep_progress() {
    let (ctl, mut backend) = common::spawn();
    let id = flashing_job(&ctl, &mut backend, "SER1", "srv-1").await;
    backend.push(&progress("srv-1", 0, 40.0));
    settle().await;

    let job = ctl.pause_flash(&id, Confirmation::Optimistic).await.unwrap();
    assert_eq!(job.status, JobStatus::Paused);
    let sent = backend.next_sent().await.unwrap();
    assert_eq!(sent["type"], "flash.pause");
    assert_eq!(sent["seq"], 1);
    assert_eq!(sent["jobId"], "srv-1");
    backend.push(&InboundFrame::new(FrameKind::Paused, "srv-1", 1));
    settle().await;

    let caller = ctl.clone();
    let resume_id = id.clone();
    let resume = tokio::spawn(async move {
        caller
            .resume_flash(&resume_id, Confirmation::Acknowledged)
            .await
    });
    let sent = backend.next_sent().await.unwrap();
    assert_eq!(sent["type"], "flash.resume");
    assert_eq!(sent["seq"], 2);
    backend.push(&InboundFrame::new(FrameKind::Resumed, "srv-1", 2));
    let job = resume.await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Flashing);

    backend.push(&progress("srv-1", 2, 35.0));
    settle().await;
    assert_eq!(ctl.job(&id).await.unwrap().unwrap().progress_percent, 40);
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_pause_rolls_back_with_transport_error() {
    let (ctl, mut backend) = common::spawn();
    let id = flashing_job(&ctl, &mut backend, "SER1", "srv-1").await;

    let caller = ctl.clone();
    let pause_id = id.clone();
    let pause = tokio::spawn(async move {
        caller.pause_flash(&pause_id, Confirmation::Acknowledged).await
    });
    assert_eq!(backend.next_sent().await.unwrap()["type"], "flash.pause");

    let err = pause.await.unwrap().unwrap_err();
    assert_eq!(
        err,
        FlashError::Transport(TransportError::AckTimeout {
            job_id: id.clone(),
            seq: 1,
        })
    );
    assert_eq!(
        ctl.job(&id).await.unwrap().unwrap().status,
        JobStatus::Flashing
    );
}

#[tokio::test(start_paused = true)]
async fn single_shot_methods_cannot_pause() {
    let (ctl, mut backend) = common::spawn();
    wait_connected(&ctl).await;
    let req = FlashRequest::new("EDL1", DeviceBrand::Xiaomi, FlashMethod::Edl, &["boot"]);
    let id = ctl.start_flash(req, Confirmation::Optimistic).await.unwrap();
    backend.next_sent().await.unwrap();
    backend.push(&started(&id, "srv-edl"));
    settle().await;

    let err = ctl
        .pause_flash(&id, Confirmation::Optimistic)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlashError::InvalidTransition {
            status: JobStatus::Flashing,
            ..
        }
    ));
    let job = ctl.cancel_flash(&id, Confirmation::Optimistic).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn stale_pause_ack_after_cancel_leaves_job_cancelled() {
    let (ctl, mut backend) = common::spawn();
    let id = flashing_job(&ctl, &mut backend, "SER1", "srv-1").await;

    ctl.pause_flash(&id, Confirmation::Optimistic).await.unwrap();
    let caller = ctl.clone();
    let cancel_id = id.clone();
    let cancel = tokio::spawn(async move {
        caller.cancel_flash(&cancel_id, Confirmation::Acknowledged).await
    });
    assert_eq!(backend.next_sent().await.unwrap()["seq"], 1);
    let sent = backend.next_sent().await.unwrap();
    assert_eq!(sent["type"], "flash.cancel");
    assert_eq!(sent["seq"], 2);

    backend.push(&InboundFrame::new(FrameKind::Cancelled, "srv-1", 2));
    let job = cancel.await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);

    backend.push(&InboundFrame::new(FrameKind::Paused, "srv-1", 1));
    backend.push(&InboundFrame::new(FrameKind::Done, "srv-1", 2));
    settle().await;
    let job = ctl.job(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(ctl.active_jobs().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_before_start_ack_stays_cancelled() {
    let (ctl, mut backend) = common::spawn();
    wait_connected(&ctl).await;
    let id = ctl
        .start_flash(common::fastboot_request("SERX"), Confirmation::Optimistic)
        .await
        .unwrap();
    assert_eq!(backend.next_sent().await.unwrap()["type"], "flash.start");

    let job = ctl.cancel_flash(&id, Confirmation::Optimistic).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    let sent = backend.next_sent().await.unwrap();
    assert_eq!(sent["type"], "flash.cancel");
    assert_eq!(sent["seq"], 1);

    backend.push(&started(&id, "srv-X"));
    backend.push(
        &InboundFrame::new(FrameKind::Progress, "srv-X", 0).with_payload(FramePayload {
            progress_percent: Some(50.0),
            device_serial: Some("SERX".to_string()),
            ..FramePayload::default()
        }),
    );
    backend.push(&InboundFrame::new(FrameKind::Done, "srv-X", 0));
    settle().await;

    let job = ctl.job(&JobId::from("srv-X")).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(ctl.active_jobs().await.unwrap().is_empty());
    let history = ctl.history(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].job.status, JobStatus::Cancelled);

    // The device is free for the next job.
    ctl.start_flash(common::fastboot_request("SERX"), Confirmation::Optimistic)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn control_on_finished_job_is_invalid() {
    let (ctl, mut backend) = common::spawn();
    let id = flashing_job(&ctl, &mut backend, "SER1", "srv-1").await;
    backend.push(&InboundFrame::new(FrameKind::Done, "srv-1", 0));
    settle().await;

    for result in [
        ctl.pause_flash(&id, Confirmation::Optimistic).await,
        ctl.resume_flash(&id, Confirmation::Optimistic).await,
        ctl.cancel_flash(&id, Confirmation::Optimistic).await,
    ] {
        assert!(matches!(
            result,
            Err(FlashError::InvalidTransition {
                status: JobStatus::Completed,
                ..
            })
        ));
    }
}

#[tokio::test(start_paused = true)]
async fn backend_initiated_job_is_visible_and_locks_device() {
    let (ctl, backend) = common::spawn();
    wait_connected(&ctl).await;
    let frame = InboundFrame::new(FrameKind::Progress, "srv-ext", 4).with_payload(FramePayload {
        progress_percent: Some(12.0),
        device_serial: Some("SER-EXT".to_string()),
        flash_method: Some(FlashMethod::Odin),
        device_brand: Some(DeviceBrand::Samsung),
        ..FramePayload::default()
    });
    backend.push(&frame);
    settle().await;

    let active = ctl.active_jobs().await.unwrap();
    assert_eq!(active.len(), 1);
    assert!(active[0].shadow);
    assert_eq!(active[0].progress_percent, 12);

    let req = FlashRequest::new("SER-EXT", DeviceBrand::Samsung, FlashMethod::Odin, &["boot"]);
    assert!(matches!(
        ctl.start_flash(req, Confirmation::Optimistic).await,
        Err(FlashError::DeviceBusy { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn shutdown_fails_pending_waiters() {
    let (ctl, mut backend) = common::spawn();
    let id = flashing_job(&ctl, &mut backend, "SER1", "srv-1").await;

    let caller = ctl.clone();
    let pause = tokio::spawn(async move { caller.pause_flash(&id, Confirmation::Acknowledged).await });
    backend.next_sent().await.unwrap();

    ctl.shutdown().await.unwrap();
    assert_eq!(
        pause.await.unwrap(),
        Err(FlashError::Transport(TransportError::Stopped))
    );
    assert!(ctl.active_jobs().await.is_err());
}
