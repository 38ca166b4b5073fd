//! Binary batch-frame codec.
//!
//! The backend batches messages that accumulate between websocket
//! flushes into one binary frame instead of many text frames:
//!
//! ```text
//! [count: u32 LE][len0: u32 LE][msg0 bytes][len1: u32 LE][msg1 bytes]...
//! ```
//!
//! Each record is a UTF-8 JSON message identical to what a text frame
//! would carry. Decoding is deliberately lenient: a frame shorter than
//! the count prefix is ignored, and a record whose declared length runs
//! past the end of the buffer terminates decoding of that frame without
//! error. Frames are never buffered across websocket messages, so a
//! truncated trailing record is dropped, not resumed.

use tracing::warn;

use super::WsEnvelope;

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("batch record {index} is not valid JSON: {source}")]
    BadRecord {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Encode messages into one batch frame (the backend batcher format).
pub fn encode_batch_frame(messages: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = messages.iter().map(|m| 4 + m.len()).sum();
    let mut buf = Vec::with_capacity(4 + total);
    buf.extend_from_slice(&(messages.len() as u32).to_le_bytes());
    for msg in messages {
        buf.extend_from_slice(&(msg.len() as u32).to_le_bytes());
        buf.extend_from_slice(msg);
    }
    buf
}

/// Split a batch frame into its complete leading records.
pub fn split_batch_frame(buf: &[u8]) -> Vec<&[u8]> {
    let mut records = Vec::new();
    if buf.len() < 4 {
        return records;
    }
    let count = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let mut offset = 4;
    for _ in 0..count {
        if offset + 4 > buf.len() {
            break;
        }
        let len = u32::from_le_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]) as usize;
        offset += 4;
        if offset + len > buf.len() {
            break;
        }
        records.push(&buf[offset..offset + len]);
        offset += len;
    }
    records
}

/// Decode a batch frame into envelopes, in record order. A record that
/// fails to parse is logged and skipped; the rest of the batch is still
/// delivered.
pub fn decode_batch_frame(buf: &[u8]) -> Vec<WsEnvelope> {
    let records = split_batch_frame(buf);
    let mut envelopes = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        match serde_json::from_slice::<WsEnvelope>(record) {
            Ok(envelope) => envelopes.push(envelope),
            Err(source) => {
                let err = FrameDecodeError::BadRecord { index, source };
                warn!("{err}");
            }
        }
    }
    envelopes
}
