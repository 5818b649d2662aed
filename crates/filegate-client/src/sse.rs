//! SSE consumption (§4.4 operation 4, §6 "SSE framing"): parses
//! `event: <name>\ndata: <json>\n\n` frames off the response body stream
//! and dispatches each to a callback as it arrives — never buffering the
//! whole stream, since an upload of many files may run long enough that a
//! naive byte-for-byte assembly would hold every event in memory at once.

use bytes::{Buf, Bytes, BytesMut};
use filegate_schema::{DonePayload, ErrorPayload, FilePayload, Object, StartPayload, UploadEvent};
use futures::{Stream, StreamExt};

use crate::error::ClientError;

/// One raw `event:`/`data:` frame, before it's been typed into an
/// [`UploadEvent`].
struct RawFrame {
    event: String,
    data: String,
}

fn parse_frame(block: &str) -> Option<RawFrame> {
    let mut event = None;
    let mut data_lines = Vec::new();
    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start().to_string());
        }
    }
    Some(RawFrame {
        event: event?,
        data: data_lines.join("\n"),
    })
}

fn frame_to_event(frame: RawFrame) -> Result<UploadEvent, ClientError> {
    let parse_err = |e: serde_json::Error| ClientError::Joined(format!("malformed `{}` SSE payload: {e}", frame.event));
    match frame.event.as_str() {
        "start" => Ok(UploadEvent::Start(serde_json::from_str::<StartPayload>(&frame.data).map_err(parse_err)?)),
        "file" => Ok(UploadEvent::File(serde_json::from_str::<FilePayload>(&frame.data).map_err(parse_err)?)),
        "complete" => Ok(UploadEvent::Complete(Box::new(
            serde_json::from_str::<Object>(&frame.data).map_err(parse_err)?,
        ))),
        "error" => Ok(UploadEvent::Error(serde_json::from_str::<ErrorPayload>(&frame.data).map_err(parse_err)?)),
        "done" => Ok(UploadEvent::Done(serde_json::from_str::<DonePayload>(&frame.data).map_err(parse_err)?)),
        other => Err(ClientError::Joined(format!("unknown SSE event `{other}`"))),
    }
}

/// Reads `body` to completion, calling `on_event` for every frame as soon
/// as it is fully received. Stops at the first transport error.
pub async fn consume<S>(mut body: S, mut on_event: impl FnMut(UploadEvent)) -> Result<(), ClientError>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        buf.extend_from_slice(&chunk);

        loop {
            let Some(boundary) = find_double_newline(&buf) else { break };
            let frame_bytes = buf.split_to(boundary);
            buf.advance(2);
            let text = String::from_utf8_lossy(&frame_bytes);
            if let Some(frame) = parse_frame(&text) {
                on_event(frame_to_event(frame)?);
            }
        }
    }
    Ok(())
}

fn find_double_newline(buf: &BytesMut) -> Option<usize> {
    let s = buf.as_ref();
    for i in 0..s.len().saturating_sub(1) {
        if &s[i..i + 2] == b"\n\n" {
            return Some(i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_frame() {
        let frame = parse_frame("event: start\ndata: {\"files\":2}").unwrap();
        assert_eq!(frame.event, "start");
        let ev = frame_to_event(frame).unwrap();
        assert!(matches!(ev, UploadEvent::Start(p) if p.files == 2));
    }

    #[test]
    fn parses_multiline_data() {
        let frame = parse_frame("event: done\ndata: {\"files\":1,\n\"bytes\":5}").unwrap();
        let ev = frame_to_event(frame).unwrap();
        match ev {
            UploadEvent::Done(p) => {
                assert_eq!(p.files, 1);
                assert_eq!(p.bytes, 5);
            }
            _ => panic!("expected done event"),
        }
    }

    #[tokio::test]
    async fn consume_dispatches_multiple_frames_across_chunks() {
        let raw = "event: start\ndata: {\"files\":1}\n\nevent: done\ndata: {\"files\":1,\"bytes\":3}\n\n";
        let chunks: Vec<reqwest::Result<Bytes>> = raw
            .as_bytes()
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let stream = futures::stream::iter(chunks);

        let mut seen = Vec::new();
        consume(stream, |ev| seen.push(ev.name().to_string())).await.unwrap();
        assert_eq!(seen, vec!["start", "done"]);
    }
}
