use crate::error::Error;
use crate::runner::JobSummary;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

pub const PIPELINE: &str = "BingAds";

#[derive(Deserialize)]
struct PushEnvelope {
    message: PushMessage,
}

#[derive(Deserialize)]
struct PushMessage {
    data: String,
}

/// Date bounds requested by the triggering event.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ReportWindow {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct JobResponse {
    pub pipelines: &'static str,
    pub results: JobSummary,
}

impl JobResponse {
    pub fn new(results: JobSummary) -> Self {
        JobResponse {
            pipelines: PIPELINE,
            results,
        }
    }
}

/// Decodes a push envelope `{"message": {"data": "<base64 json>"}}` into the
/// requested window.
pub fn decode_trigger(body: &[u8]) -> Result<ReportWindow, Error> {
    let envelope: PushEnvelope = serde_json::from_slice(body).map_err(|e| Error::InvalidEvent {
        message: format!("malformed envelope: {}", e),
    })?;

    let payload = BASE64
        .decode(envelope.message.data.trim())
        .map_err(|e| Error::InvalidEvent {
            message: format!("message data is not base64: {}", e),
        })?;

    let payload = String::from_utf8(payload).map_err(|e| Error::InvalidEvent {
        message: format!("message data is not UTF-8: {}", e),
    })?;

    serde_json::from_str(&payload).map_err(|e| Error::InvalidEvent {
        message: format!("message data is not a JSON object: {}", e),
    })
}
