//! The upload-event taxonomy streamed over SSE and consumed by the bulk
//! client (§4.5, §6 "SSE framing").

use serde::{Deserialize, Serialize};

use crate::object::Object;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartPayload {
    pub files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePayload {
    pub index: usize,
    pub path: String,
    pub written: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub index: usize,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonePayload {
    pub files: usize,
    pub bytes: u64,
}

/// One frame of the upload SSE stream. `event:` is the tag, `data:` is the
/// JSON-encoded payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum UploadEvent {
    Start(StartPayload),
    File(FilePayload),
    Complete(Box<Object>),
    Error(ErrorPayload),
    Done(DonePayload),
}

impl UploadEvent {
    /// The SSE `event:` field name.
    pub fn name(&self) -> &'static str {
        match self {
            UploadEvent::Start(_) => "start",
            UploadEvent::File(_) => "file",
            UploadEvent::Complete(_) => "complete",
            UploadEvent::Error(_) => "error",
            UploadEvent::Done(_) => "done",
        }
    }

    /// The JSON payload, without the `event` wrapper (what goes after
    /// `data: `).
    pub fn payload_json(&self) -> Result<String, serde_json::Error> {
        match self {
            UploadEvent::Start(p) => serde_json::to_string(p),
            UploadEvent::File(p) => serde_json::to_string(p),
            UploadEvent::Complete(obj) => serde_json::to_string(obj),
            UploadEvent::Error(p) => serde_json::to_string(p),
            UploadEvent::Done(p) => serde_json::to_string(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_sse_frame_names() {
        assert_eq!(UploadEvent::Start(StartPayload { files: 1, bytes: None }).name(), "start");
        assert_eq!(
            UploadEvent::File(FilePayload { index: 0, path: "/a".into(), written: 0, bytes: None }).name(),
            "file"
        );
        assert_eq!(
            UploadEvent::Error(ErrorPayload { index: 0, path: "/a".into(), message: "x".into() }).name(),
            "error"
        );
        assert_eq!(UploadEvent::Done(DonePayload { files: 1, bytes: 5 }).name(), "done");
    }

    #[test]
    fn payload_json_round_trips_file_event() {
        let ev = UploadEvent::File(FilePayload {
            index: 2,
            path: "/sub/b.txt".into(),
            written: 4096,
            bytes: Some(8192),
        });
        let json = ev.payload_json().unwrap();
        let decoded: FilePayload = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.index, 2);
        assert_eq!(decoded.written, 4096);
        assert_eq!(decoded.bytes, Some(8192));
    }
}
