//! SSE wire framing: `data: <json>\n\n` per event, comment lines for
//! heartbeats. The decoder is incremental so a record split across read
//! chunks is buffered until its blank-line terminator arrives.

use bytes::Bytes;
use thiserror::Error;

use crate::ChangeEvent;

/// Upper bound on a single buffered record. A stream that exceeds this
/// without a record boundary is producing garbage, not events.
pub const MAX_RECORD_BYTES: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("malformed event payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("record exceeded {MAX_RECORD_BYTES} bytes without a boundary")]
    RecordTooLong,
}

/// Serialize an event into its wire frame. Done once per broadcast; the
/// resulting bytes are shared across every connection.
pub fn encode_event(event: &ChangeEvent) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    let mut out = String::with_capacity(json.len() + 8);
    out.push_str("data: ");
    out.push_str(&json);
    out.push_str("\n\n");
    Ok(Bytes::from(out))
}

/// The no-op keepalive frame. A comment line carries no `data:` prefix and
/// is skipped by decoders.
pub fn heartbeat_frame() -> Bytes {
    Bytes::from_static(b": keepalive\n\n")
}

/// One fully-delimited record as seen by the decoder.
#[derive(Debug)]
pub enum DecodedFrame {
    Event(ChangeEvent),
    /// Heartbeat or other comment-only record.
    Comment,
    /// A record that could not be parsed. The stream continues; the caller
    /// decides whether to log it.
    Invalid(FrameError),
}

/// Incremental decoder for the event stream.
///
/// Chunks may split a record anywhere, including mid-codepoint, so the
/// buffer holds raw bytes and records are only interpreted once a `\n\n`
/// boundary is seen.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every record completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodedFrame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(end) = find_boundary(&self.buf) {
            let record: Vec<u8> = self.buf.drain(..end + 2).collect();
            if let Some(frame) = parse_record(&record[..end]) {
                frames.push(frame);
            }
        }

        if self.buf.len() > MAX_RECORD_BYTES {
            self.buf.clear();
            frames.push(DecodedFrame::Invalid(FrameError::RecordTooLong));
        }

        frames
    }
}

fn find_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// Interpret one record. Lines starting with `data:` contribute payload,
/// comment lines and unknown fields are skipped. Returns `None` for an
/// empty record.
fn parse_record(record: &[u8]) -> Option<DecodedFrame> {
    let text = String::from_utf8_lossy(record);
    let mut data: Option<String> = None;
    let mut saw_comment = false;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(rest);
                }
                None => data = Some(rest.to_string()),
            }
        } else if line.starts_with(':') {
            saw_comment = true;
        }
    }

    match data {
        Some(payload) => Some(match serde_json::from_str(&payload) {
            Ok(event) => DecodedFrame::Event(event),
            Err(e) => DecodedFrame::Invalid(FrameError::InvalidJson(e)),
        }),
        None if saw_comment => Some(DecodedFrame::Comment),
        None => None,
    }
}
