//! Framing of the `text/event-stream` comment feed.
//!
//! The server only ever emits two shapes of frames: a reconnect hint at the
//! start of the stream, and named events carrying an id and a text payload.
//! [`FrameDecoder`] is lenient and understands any well-formed event stream.

use std::{fmt, time::Duration};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Frame {
    /// Advisory delay before a disconnected client should reconnect
    Retry(Duration),

    Event {
        event: String,
        id: Option<EventId>,
        data: String,
    },
}

impl Frame {
    pub fn event(event: &str, id: EventId, data: String) -> Frame {
        Frame::Event {
            event: String::from(event),
            id: Some(id),
            data,
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Retry(delay) => writeln!(f, "retry: {}", delay.as_millis()),
            Frame::Event { event, id, data } => {
                writeln!(f, "event: {event}")?;
                if let Some(id) = id {
                    writeln!(f, "id: {id}")?;
                }
                for line in data.split('\n') {
                    writeln!(f, "data: {line}")?;
                }
                writeln!(f)
            }
        }
    }
}

/// Incremental parser turning arbitrary byte chunks back into frames
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    id: Option<EventId>,
    data: Vec<String>,
}

impl FrameDecoder {
    pub fn new() -> FrameDecoder {
        FrameDecoder::default()
    }

    /// Feed a chunk of the stream, returning every frame it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.drain(..=pos).collect::<Vec<u8>>();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.handle_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn handle_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match name {
            "event" => self.event = Some(String::from(value)),
            "id" => self.id = value.parse().ok().map(EventId),
            "data" => self.data.push(String::from(value)),
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    return value
                        .parse()
                        .ok()
                        .map(|ms| Frame::Retry(Duration::from_millis(ms)));
                }
            }
            _ => (),
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        if self.event.is_none() && self.data.is_empty() {
            self.id = None;
            return None;
        }
        let data = self.data.drain(..).collect::<Vec<_>>().join("\n");
        Some(Frame::Event {
            event: self
                .event
                .take()
                .unwrap_or_else(|| String::from("message")),
            id: self.id.take(),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_the_feed_wire_format() {
        assert_eq!(
            Frame::Retry(Duration::from_millis(5000)).encode(),
            "retry: 5000\n"
        );
        assert_eq!(
            Frame::event("other", EventId(7), String::from("new data")).encode(),
            "event: other\nid: 7\ndata: new data\n\n"
        );
        assert_eq!(
            Frame::event("comment", EventId(0), String::from("a\nb")).encode(),
            "event: comment\nid: 0\ndata: a\ndata: b\n\n"
        );
    }

    #[test]
    fn decodes_across_arbitrary_chunk_boundaries() {
        let wire = "retry: 5000\nevent: comment\nid: 0\ndata: {\"id\":1}\n\nevent: other\nid: 1\ndata:new data\n\n";
        for split in 0..wire.len() {
            let (a, b) = wire.as_bytes().split_at(split);
            let mut dec = FrameDecoder::new();
            let mut frames = dec.push(a);
            frames.extend(dec.push(b));
            assert_eq!(
                frames,
                vec![
                    Frame::Retry(Duration::from_millis(5000)),
                    Frame::event("comment", EventId(0), String::from("{\"id\":1}")),
                    Frame::event("other", EventId(1), String::from("new data")),
                ],
                "split at {split}"
            );
        }
    }

    #[test]
    fn decodes_crlf_comments_and_unnamed_events() {
        let mut dec = FrameDecoder::new();
        let frames = dec.push(b": keepalive\r\ndata: one\r\ndata: two\r\nunknown: x\r\n\r\n\n");
        assert_eq!(
            frames,
            vec![Frame::Event {
                event: String::from("message"),
                id: None,
                data: String::from("one\ntwo"),
            }]
        );
    }

    #[test]
    fn ignores_invalid_retry_and_id() {
        let mut dec = FrameDecoder::new();
        let frames = dec.push(b"retry: soon\nretry:\nid: abc\nevent: x\n\n");
        assert_eq!(
            frames,
            vec![Frame::Event {
                event: String::from("x"),
                id: None,
                data: String::new(),
            }]
        );
    }

    #[test]
    fn keeps_partial_lines_buffered() {
        let mut dec = FrameDecoder::new();
        assert!(dec.push(b"event: comment\nda").is_empty());
        assert!(dec.push(b"ta: hi\n").is_empty());
        assert_eq!(
            dec.push(b"\n"),
            vec![Frame::Event {
                event: String::from("comment"),
                id: None,
                data: String::from("hi"),
            }]
        );
    }
}
