//! SSE writer: turns the controller's frame channel into an
//! `text/event-stream` response with idle heartbeats.
//!
//! The channel buffers one frame at a time, so a slow client backs it
//! up immediately; the sending side (`turn::FrameSender`) enforces the
//! per-frame write deadline and the disconnect grace. Past the
//! deadline the response is aborted while the session itself stays
//! untouched (a new request resumes it).

use std::time::Duration;

use axum::response::sse::{Event, Sse};
use futures_util::stream::Stream;
use tokio::sync::mpsc;

use super::frames::ChatFrame;

/// Convert one frame to the wire event (`event: <name>\ndata: <json>`).
pub fn frame_event(frame: &ChatFrame) -> Event {
    Event::default()
        .event(frame.event_name())
        .data(frame.data().to_string())
}

/// The response body: controller frames in channel order, with a `ping`
/// injected whenever `heartbeat` elapses and nothing else was sent.
/// Ends when the controller drops its sender (always after `done`).
pub fn frame_stream(
    rx: mpsc::Receiver<ChatFrame>,
    heartbeat: Duration,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> + Send {
    async_stream::stream! {
        let mut rx = rx;
        loop {
            match tokio::time::timeout(heartbeat, rx.recv()).await {
                Ok(Some(frame)) => yield Ok(frame_event(&frame)),
                Ok(None) => break,
                Err(_elapsed) => {
                    yield Ok(frame_event(&ChatFrame::Ping {
                        ts: chrono::Utc::now().timestamp_millis(),
                    }));
                }
            }
        }
    }
}

pub fn sse_response(
    rx: mpsc::Receiver<ChatFrame>,
    heartbeat: Duration,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>> + Send> {
    Sse::new(frame_stream(rx, heartbeat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn frames_pass_through_in_channel_order() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(ChatFrame::SessionInit {
            session_id: "s1".into(),
        })
        .await
        .unwrap();
        tx.send(ChatFrame::Done {
            session_id: "s1".into(),
        })
        .await
        .unwrap();
        drop(tx);

        let stream = frame_stream(rx, Duration::from_secs(15));
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn heartbeat_fires_when_idle() {
        let (tx, rx) = mpsc::channel(8);
        let stream = frame_stream(rx, Duration::from_millis(20));
        futures_util::pin_mut!(stream);

        let first = tokio::time::timeout(Duration::from_millis(500), stream.next())
            .await
            .expect("a ping must arrive while idle");
        assert!(first.is_some());
        drop(tx);
    }

    #[tokio::test]
    async fn stream_ends_when_controller_hangs_up() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(ChatFrame::Done {
            session_id: "s".into(),
        })
        .await
        .unwrap();
        drop(tx);

        let stream = frame_stream(rx, Duration::from_secs(15));
        futures_util::pin_mut!(stream);
        assert!(stream.next().await.is_some()); // the done frame
        assert!(stream.next().await.is_none()); // then EOF
    }
}
