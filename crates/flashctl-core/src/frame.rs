//! Wire frames exchanged with the backend over the multiplexed channel.
//!
//! Every frame is a JSON object carrying `type`, `jobId`, `seq` and `payload`.
//! Control frames flow client → backend; event frames flow back.

use serde::{Deserialize, Serialize};

use crate::error::FlashError;
use crate::job::{DeviceBrand, FlashMethod, JobAction, JobId, PartitionImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlKind {
    #[serde(rename = "flash.start")]
    Start,
    #[serde(rename = "flash.pause")]
    Pause,
    #[serde(rename = "flash.resume")]
    Resume,
    #[serde(rename = "flash.cancel")]
    Cancel,
}

impl From<JobAction> for ControlKind {
    fn from(action: JobAction) -> Self {
        match action {
            JobAction::Start => ControlKind::Start,
            JobAction::Pause => ControlKind::Pause,
            JobAction::Resume => ControlKind::Resume,
            JobAction::Cancel => ControlKind::Cancel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPayload {
    pub device_serial: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash_method: Option<FlashMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_brand: Option<DeviceBrand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<Vec<PartitionImage>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub verify_after_flash: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_reboot: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wipe_user_data: bool,
}

/// Client → backend control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub kind: ControlKind,
    pub job_id: JobId,
    pub seq: u64,
    pub payload: ControlPayload,
}

impl OutboundFrame {
    pub fn encode(&self) -> Result<String, FlashError> {
        serde_json::to_string(self).map_err(|e| FlashError::Protocol(format!("encode frame: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    #[serde(rename = "flash.started")]
    Started,
    #[serde(rename = "flash.progress")]
    Progress,
    #[serde(rename = "flash.log")]
    Log,
    #[serde(rename = "flash.paused")]
    Paused,
    #[serde(rename = "flash.resumed")]
    Resumed,
    #[serde(rename = "flash.done")]
    Done,
    #[serde(rename = "flash.error")]
    Error,
    #[serde(rename = "flash.cancelled")]
    Cancelled,
}

impl FrameKind {
    /// Frames that acknowledge a control frame and carry its `seq`.
    pub fn is_ack(self) -> bool {
        matches!(
            self,
            FrameKind::Started | FrameKind::Paused | FrameKind::Resumed | FrameKind::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Started => "flash.started",
            FrameKind::Progress => "flash.progress",
            FrameKind::Log => "flash.log",
            FrameKind::Paused => "flash.paused",
            FrameKind::Resumed => "flash.resumed",
            FrameKind::Done => "flash.done",
            FrameKind::Error => "flash.error",
            FrameKind::Cancelled => "flash.cancelled",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_transferred: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_speed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Echo of the provisional id on `flash.started`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_serial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_brand: Option<DeviceBrand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash_method: Option<FlashMethod>,
}

/// Backend → client event frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub job_id: JobId,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub payload: FramePayload,
}

impl InboundFrame {
    pub fn new(kind: FrameKind, job_id: impl Into<JobId>, seq: u64) -> Self {
        Self {
            kind,
            job_id: job_id.into(),
            seq,
            payload: FramePayload::default(),
        }
    }

    pub fn with_payload(mut self, payload: FramePayload) -> Self {
        self.payload = payload;
        self
    }

    /// Percent clamped to 0..=100.
    pub fn percent(&self) -> Option<u8> {
        self.payload
            .progress_percent
            .filter(|p| p.is_finite())
            .map(|p| p.clamp(0.0, 100.0).floor() as u8)
    }
}

/// Result of decoding one text message from the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Frame(InboundFrame),
    /// Keepalive reply; carries no job state.
    Pong,
}

/// Parse a text message. Malformed frames are `FlashError::Protocol`.
pub fn decode(text: &str) -> Result<Decoded, FlashError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| FlashError::Protocol(format!("invalid json: {e}")))?;
    match value.get("type").and_then(|t| t.as_str()) {
        Some("pong") => return Ok(Decoded::Pong),
        Some(_) => {}
        None => return Err(FlashError::Protocol("frame without type".to_string())),
    }
    let frame: InboundFrame = serde_json::from_value(value)
        .map_err(|e| FlashError::Protocol(format!("invalid frame: {e}")))?;
    if frame.job_id.as_str().is_empty() {
        return Err(FlashError::Protocol(format!(
            "{} without jobId",
            frame.kind.as_str()
        )));
    }
    Ok(Decoded::Frame(frame))
}

/// Keepalive ping text.
pub fn ping(timestamp_ms: u64) -> String {
    serde_json::json!({ "type": "ping", "timestamp": timestamp_ms }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_start_frame_shape() {
        let frame = OutboundFrame {
            kind: ControlKind::Start,
            job_id: JobId::from("local-1"),
            seq: 0,
            payload: ControlPayload {
                device_serial: "R58M1234ABC".to_string(),
                flash_method: Some(FlashMethod::Fastboot),
                device_brand: None,
                partitions: Some(vec![PartitionImage::named("boot")]),
                verify_after_flash: false,
                auto_reboot: true,
                wipe_user_data: false,
            },
        };
        let v: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(v["type"], "flash.start");
        assert_eq!(v["jobId"], "local-1");
        assert_eq!(v["seq"], 0);
        assert_eq!(v["payload"]["deviceSerial"], "R58M1234ABC");
        assert_eq!(v["payload"]["flashMethod"], "fastboot");
        assert_eq!(v["payload"]["autoReboot"], true);
        assert!(v["payload"].get("verifyAfterFlash").is_none());
    }

    #[test]
    fn decode_progress_frame() {
        let text = r#"{"type":"flash.progress","jobId":"srv-9","seq":3,
            "payload":{"progressPercent":42.7,"stage":"Flash system","bytesTransferred":1024,"transferSpeed":512}}"#;
        let Decoded::Frame(frame) = decode(text).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(frame.kind, FrameKind::Progress);
        assert_eq!(frame.job_id, JobId::from("srv-9"));
        assert_eq!(frame.seq, 3);
        assert_eq!(frame.percent(), Some(42));
        assert_eq!(frame.payload.transfer_speed, Some(512));
    }

    #[test]
    fn decode_pong_and_reject_garbage() {
        assert_eq!(decode(r#"{"type":"pong","timestamp":1}"#).unwrap(), Decoded::Pong);
        assert!(matches!(decode("not json"), Err(FlashError::Protocol(_))));
        assert!(matches!(
            decode(r#"{"type":"flash.bogus","jobId":"a"}"#),
            Err(FlashError::Protocol(_))
        ));
        assert!(matches!(
            decode(r#"{"type":"flash.done","jobId":""}"#),
            Err(FlashError::Protocol(_))
        ));
    }

    #[test]
    fn percent_is_clamped() {
        let mut frame = InboundFrame::new(FrameKind::Progress, "a", 0);
        frame.payload.progress_percent = Some(140.0);
        assert_eq!(frame.percent(), Some(100));
        frame.payload.progress_percent = Some(-3.0);
        assert_eq!(frame.percent(), Some(0));
    }
}
