//! Inbound frame application: acknowledgements, progress, terminal events,
//! stale-frame discard, and shadow jobs.

use tokio::time::Instant;

use crate::frame::{FrameKind, InboundFrame};
use crate::job::{now_millis, pipeline, Job, JobId, JobStatus, WarningKind};

use super::{Effect, Entry, JobRegistry, Tracking};

impl JobRegistry {
    pub(super) fn apply_frame(&mut self, frame: InboundFrame, now: Instant) -> Vec<Effect> {
        let origin = self.origin_of(&frame.job_id).or_else(|| {
            frame
                .payload
                .client_job_id
                .as_ref()
                .and_then(|client| self.origin_of(client))
        });
        match origin {
            Some(origin) => self.apply_to_active(&origin, frame, now),
            None => self.apply_to_inactive(frame, now),
        }
    }

    fn apply_to_inactive(&mut self, frame: InboundFrame, now: Instant) -> Vec<Effect> {
        if frame.kind == FrameKind::Started {
            if let Some(client) = frame.payload.client_job_id.as_ref() {
                self.archive.confirm(client, &frame.job_id);
            }
        }
        let archived = self.archive.get(&frame.job_id).or_else(|| {
            frame
                .payload
                .client_job_id
                .as_ref()
                .and_then(|client| self.archive.get(client))
        });
        if let Some(entry) = archived {
            tracing::debug!(
                job_id = %frame.job_id,
                seq = frame.seq,
                kind = frame.kind.as_str(),
                status = %entry.job.status,
                "frame for finished job ignored"
            );
            if frame.kind.is_ack() {
                return vec![Effect::Acked {
                    origin: entry.job.origin_id().clone(),
                    seq: frame.seq,
                    job_id: entry.job.id.clone(),
                }];
            }
            return vec![Effect::Discarded {
                reason: "job already finished",
            }];
        }
        self.create_shadow(frame, now)
    }

    fn apply_to_active(&mut self, origin: &JobId, frame: InboundFrame, now: Instant) -> Vec<Effect> {
        let Some(entry) = self.entries.get_mut(origin) else {
            return vec![Effect::Discarded {
                reason: "job already finished",
            }];
        };

        if frame.kind.is_ack() {
            if let Some(last) = entry.job.last_acked_seq {
                if frame.seq <= last {
                    tracing::debug!(
                        job_id = %entry.job.id,
                        seq = frame.seq,
                        last_acked = last,
                        kind = frame.kind.as_str(),
                        "stale acknowledgement discarded"
                    );
                    return vec![Effect::Discarded {
                        reason: "stale acknowledgement",
                    }];
                }
            }
        } else if entry.job.last_acked_seq.is_some_and(|last| frame.seq < last) {
            tracing::debug!(
                job_id = %entry.job.id,
                seq = frame.seq,
                kind = frame.kind.as_str(),
                "frame predates last acknowledged control, discarded"
            );
            return vec![Effect::Discarded {
                reason: "stale frame",
            }];
        }

        mark_fresh(entry, now);

        let mut effects = Vec::new();
        if frame.kind.is_ack() {
            effects.push(self.acknowledge(origin, &frame));
        }

        let Some(entry) = self.entries.get_mut(origin) else {
            return effects;
        };
        let latest = frame.seq >= entry.track.last_issued_seq;
        let job = &mut entry.job;
        let terminal = match frame.kind {
            FrameKind::Started => {
                if latest && job.status == JobStatus::Preparing {
                    job.status = JobStatus::Flashing;
                    job.progress_percent = 0;
                    job.current_stage = frame
                        .payload
                        .stage
                        .clone()
                        .unwrap_or_else(|| "Started".to_string());
                    tracing::info!(job_id = %job.id, "job flashing");
                }
                false
            }
            FrameKind::Paused => {
                if latest && job.status.can_transition_to(JobStatus::Paused) {
                    job.status = JobStatus::Paused;
                }
                false
            }
            FrameKind::Resumed => {
                if latest && job.status.can_transition_to(JobStatus::Flashing) {
                    job.status = JobStatus::Flashing;
                }
                false
            }
            FrameKind::Cancelled => {
                if latest {
                    job.status = JobStatus::Cancelled;
                    job.completed_at = Some(now_millis());
                }
                latest
            }
            FrameKind::Progress => {
                apply_progress(job, &frame);
                false
            }
            FrameKind::Log => {
                apply_log(job, &frame);
                false
            }
            FrameKind::Done => {
                if !job.status.can_transition_to(JobStatus::Completed) {
                    tracing::debug!(job_id = %job.id, status = %job.status, "backend completion overrides local status");
                }
                apply_progress(job, &frame);
                job.status = JobStatus::Completed;
                job.progress_percent = 100;
                job.current_stage = "Completed".to_string();
                job.completed_at = Some(now_millis());
                tracing::info!(job_id = %job.id, "job completed");
                true
            }
            FrameKind::Error => {
                let reason = error_reason(&frame);
                if !job.confirmed && job.status == JobStatus::Preparing {
                    tracing::warn!(job_id = %job.id, %reason, "backend rejected job start");
                    let origin = origin.clone();
                    if let Some(entry) = self.entries.remove(&origin) {
                        self.index.retain(|_, o| o != &origin);
                        effects.push(Effect::Removed {
                            job: entry.job,
                            reason,
                        });
                    }
                    return effects;
                }
                tracing::error!(job_id = %job.id, %reason, "job failed");
                job.status = JobStatus::Failed;
                job.error = Some(reason);
                job.completed_at = Some(now_millis());
                true
            }
        };

        if terminal {
            effects.extend(self.finalize(origin));
        } else {
            effects.push(Effect::Changed(entry.job.clone()));
        }
        effects
    }

    /// Record an acknowledgement: advance `last_acked_seq`, settle any
    /// optimistic transition it covers, and confirm the backend id.
    fn acknowledge(&mut self, origin: &JobId, frame: &InboundFrame) -> Effect {
        let mut alias = None;
        let effect = {
            let Some(entry) = self.entries.get_mut(origin) else {
                return Effect::Discarded {
                    reason: "job already finished",
                };
            };
            entry.job.last_acked_seq = Some(frame.seq);
            if entry.track.rollback.is_some_and(|rb| rb.seq <= frame.seq) {
                entry.track.rollback = None;
            }
            if frame.kind == FrameKind::Started && !entry.job.confirmed {
                entry.job.confirmed = true;
                if frame.job_id != entry.job.id {
                    tracing::info!(
                        provisional = %entry.job.id,
                        job_id = %frame.job_id,
                        "backend confirmed job"
                    );
                    entry.job.id = frame.job_id.clone();
                    alias = Some(frame.job_id.clone());
                }
            }
            // Server-originated controls on shadow jobs advance the issued floor.
            entry.track.last_issued_seq = entry.track.last_issued_seq.max(frame.seq);
            Effect::Acked {
                origin: origin.clone(),
                seq: frame.seq,
                job_id: entry.job.id.clone(),
            }
        };
        if let Some(id) = alias {
            self.index.insert(id, origin.clone());
        }
        effect
    }

    fn create_shadow(&mut self, frame: InboundFrame, now: Instant) -> Vec<Effect> {
        let serial = frame.payload.device_serial.clone().unwrap_or_default();
        if let Some(holder) = self.lock_table().holder(&serial) {
            tracing::warn!(
                job_id = %frame.job_id,
                serial = %serial,
                holder = %holder.id,
                "protocol error: unknown job for a device owned by another job, frame dropped"
            );
            return vec![Effect::Discarded {
                reason: "device already claimed",
            }];
        }

        let status = match frame.kind {
            FrameKind::Started | FrameKind::Progress | FrameKind::Log | FrameKind::Resumed => {
                JobStatus::Flashing
            }
            FrameKind::Paused => JobStatus::Paused,
            FrameKind::Done => JobStatus::Completed,
            FrameKind::Error => JobStatus::Failed,
            FrameKind::Cancelled => JobStatus::Cancelled,
        };
        let mut job = Job::shadow(frame.job_id.clone(), serial, status);
        if let Some(brand) = frame.payload.device_brand {
            job.device_brand = brand;
        }
        job.flash_method = frame.payload.flash_method;
        if frame.kind.is_ack() {
            job.last_acked_seq = Some(frame.seq);
        }
        match frame.kind {
            FrameKind::Log => apply_log(&mut job, &frame),
            FrameKind::Error => job.error = Some(error_reason(&frame)),
            _ => apply_progress(&mut job, &frame),
        }
        if status == JobStatus::Completed {
            job.progress_percent = 100;
        }
        tracing::info!(
            job_id = %job.id,
            serial = %job.device_serial,
            status = %job.status,
            "shadow job from backend"
        );

        let origin = job.origin_id().clone();
        self.index.insert(job.id.clone(), origin.clone());
        self.entries.insert(
            origin.clone(),
            Entry {
                job,
                track: Tracking::new(now, frame.seq),
            },
        );
        if status.is_terminal() {
            if let Some(entry) = self.entries.get_mut(&origin) {
                entry.job.completed_at = Some(now_millis());
            }
            return self.finalize(&origin).into_iter().collect();
        }
        self.entries
            .get(&origin)
            .map(|e| vec![Effect::Changed(e.job.clone())])
            .unwrap_or_default()
    }
}

/// Any accepted frame proves the job is alive.
fn mark_fresh(entry: &mut Entry, now: Instant) {
    entry.track.last_frame_at = now;
    entry.track.lost = false;
    entry.track.reconnect_deadline = None;
    if entry.job.clear_stalled() {
        tracing::info!(job_id = %entry.job.id, "stall cleared");
    }
}

fn error_reason(frame: &InboundFrame) -> String {
    frame
        .payload
        .error
        .clone()
        .or_else(|| frame.payload.message.clone())
        .unwrap_or_else(|| "unspecified backend error".to_string())
}

fn apply_log(job: &mut Job, frame: &InboundFrame) {
    let Some(message) = frame.payload.message.as_deref() else {
        return;
    };
    job.push_log(message);
    if frame
        .payload
        .level
        .as_deref()
        .is_some_and(|l| l.eq_ignore_ascii_case("warning") || l.eq_ignore_ascii_case("warn"))
    {
        job.add_warning(WarningKind::Backend, message);
    }
}

/// Progress never moves backwards: a lower percent keeps the current value.
fn apply_progress(job: &mut Job, frame: &InboundFrame) {
    let p = &frame.payload;
    if let Some(percent) = frame.percent() {
        if percent < job.progress_percent {
            tracing::debug!(
                job_id = %job.id,
                reported = percent,
                current = job.progress_percent,
                "progress regression ignored"
            );
        } else {
            job.progress_percent = percent;
        }
    }
    if let Some(stage) = &p.stage {
        job.current_stage = stage.clone();
    } else if p.progress_percent.is_some() {
        if let Some(method) = job.flash_method {
            let pipeline = pipeline::stages_for(method, &job.partitions);
            if let Some(stage) = pipeline.stage_at(job.progress_percent) {
                job.current_stage = stage.name.clone();
            }
        }
    }
    if let Some(partition) = &p.partition {
        job.current_partition = Some(partition.clone());
    }
    if let Some(bytes) = p.bytes_transferred {
        job.bytes_transferred = bytes;
    }
    if let Some(total) = p.total_bytes {
        job.total_bytes = total;
    }
    if let Some(speed) = p.transfer_speed {
        job.transfer_speed_bytes_per_sec = speed;
    }
}
