//! SSE decoding shared by the streaming clients.
//!
//! Frames arrive as `event:`/`data:` blocks delimited by a blank line.
//! [`drain_frames`] pulls complete blocks out of a rolling buffer,
//! leaving any trailing partial block for the next chunk;
//! [`frame_stream`] turns a `reqwest::Response` into a stream of
//! `(event_name, data)` pairs.

use ms_domain::error::{Error, Result};

/// A decoded SSE frame: the `event:` name (empty when the server sent
/// none) and the joined `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Drain complete frames out of the buffer, in order. Consumed bytes
/// are removed; a trailing partial block stays put.
pub(crate) fn drain_frames(buffer: &mut String) -> Vec<SseFrame> {
    let mut frames = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        let mut event = String::new();
        let mut data_lines: Vec<&str> = Vec::new();
        for line in block.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(name) = line.strip_prefix("event:") {
                event = name.trim().to_owned();
            } else if let Some(payload) = line.strip_prefix("data:") {
                data_lines.push(payload.trim());
            }
        }
        let data = data_lines.join("\n");
        if !data.is_empty() || !event.is_empty() {
            frames.push(SseFrame { event, data });
        }
    }

    frames
}

/// Read a streaming response chunk by chunk and yield decoded frames.
/// The body's trailing partial block (a server that closed without the
/// final blank line) is flushed at end of stream.
pub(crate) fn frame_stream(
    response: reqwest::Response,
) -> impl futures_core::Stream<Item = Result<SseFrame>> + Send {
    async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for frame in drain_frames(&mut buffer) {
                        yield Ok(frame);
                    }
                }
                Ok(None) => {
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for frame in drain_frames(&mut buffer) {
                            yield Ok(frame);
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Error::Http(e.to_string()));
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_named_frame() {
        let mut buf = String::from("event: message\ndata: {\"seq\":1}\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "message".into(),
                data: "{\"seq\":1}".into()
            }]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn drains_multiple_frames_in_order() {
        let mut buf = String::from("data: one\n\nevent: ping\ndata: {}\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "");
        assert_eq!(frames[0].data, "one");
        assert_eq!(frames[1].event, "ping");
    }

    #[test]
    fn partial_frame_stays_buffered() {
        let mut buf = String::from("data: done\n\nevent: tok");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(buf, "event: tok");

        buf.push_str("en\ndata: x\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames[0].event, "token");
        assert_eq!(frames[0].data, "x");
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut buf = String::from("data: line1\ndata: line2\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames[0].data, "line1\nline2");
    }

    #[test]
    fn crlf_lines_are_tolerated() {
        let mut buf = String::from("event: token\r\ndata: hi\r\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames[0].event, "token");
        assert_eq!(frames[0].data, "hi");
    }

    #[test]
    fn comment_only_blocks_are_skipped() {
        let mut buf = String::from(": keepalive\n\ndata: real\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "real");
    }
}
