//! Output coalescing with renderer backpressure.
//!
//! PTY output arrives as many small chunks, often thousands per second
//! under heavy load. [`BatchedWriter`] buffers them and flushes merged
//! writes aligned to the display refresh: the session drives
//! [`BatchedWriter::frame_tick`] once per refresh interval, so any
//! number of `write` calls inside one interval collapse to at most one
//! renderer write. Size thresholds force an earlier flush so neither
//! flush latency nor write size grows without bound. When the renderer
//! already has [`crate::config::MAX_PENDING_WRITES`] writes in flight,
//! a flush is deferred to a later tick instead; data is delayed, never
//! dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::{MAX_BATCH_BYTES, MAX_BATCH_CHUNKS, MAX_PENDING_WRITES};

use super::{OutputChunk, Renderer};

pub struct BatchedWriter {
    renderer: Arc<Mutex<dyn Renderer>>,
    buffer: Vec<OutputChunk>,
    buffer_bytes: usize,
    flush_scheduled: bool,
    pending: Arc<AtomicUsize>,
}

impl BatchedWriter {
    pub fn new(renderer: Arc<Mutex<dyn Renderer>>) -> Self {
        Self {
            renderer,
            buffer: Vec::new(),
            buffer_bytes: 0,
            flush_scheduled: false,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Buffer one chunk. Flushes immediately once the chunk or byte
    /// threshold is hit; otherwise arms (at most) one flush for the
    /// next frame tick.
    pub fn write(&mut self, chunk: OutputChunk) {
        self.buffer_bytes += chunk.len();
        self.buffer.push(chunk);
        if self.buffer.len() >= MAX_BATCH_CHUNKS || self.buffer_bytes >= MAX_BATCH_BYTES {
            self.flush();
        } else {
            self.flush_scheduled = true;
        }
    }

    /// Called by the owner once per display-refresh interval.
    pub fn frame_tick(&mut self) {
        if self.flush_scheduled {
            self.flush_scheduled = false;
            self.flush();
        }
    }

    pub fn flush_scheduled(&self) -> bool {
        self.flush_scheduled
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Merge and submit everything buffered as one renderer write,
    /// unless the pending-write ceiling forces a deferral to a later
    /// tick.
    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            self.flush_scheduled = false;
            return;
        }
        if self.pending.load(Ordering::Acquire) >= MAX_PENDING_WRITES {
            debug!(
                pending = self.pending.load(Ordering::Acquire),
                "renderer busy, deferring flush"
            );
            self.flush_scheduled = true;
            return;
        }
        let merged = merge_chunks(std::mem::take(&mut self.buffer));
        self.buffer_bytes = 0;
        self.flush_scheduled = false;
        self.pending.fetch_add(1, Ordering::AcqRel);
        let pending = self.pending.clone();
        self.renderer.lock().write(
            merged,
            Box::new(move || {
                pending.fetch_sub(1, Ordering::AcqRel);
            }),
        );
    }

    /// Drop any buffered output without writing it. Used when the
    /// stream itself is truncated, never on the normal path.
    pub fn discard_buffered(&mut self) {
        self.buffer.clear();
        self.buffer_bytes = 0;
        self.flush_scheduled = false;
    }

    /// Final flush on disposal: bypasses the pending-write ceiling so
    /// no buffered output is lost.
    pub fn dispose(&mut self) {
        self.flush_scheduled = false;
        if self.buffer.is_empty() {
            return;
        }
        let merged = merge_chunks(std::mem::take(&mut self.buffer));
        self.buffer_bytes = 0;
        self.renderer.lock().write(merged, Box::new(|| {}));
    }
}

/// Merge buffered chunks into a single write payload. A lone chunk
/// passes through untouched; mixed chunks become one text payload, with
/// binary chunks run through a streaming UTF-8 decode so a multi-byte
/// sequence split across chunk boundaries survives the merge.
fn merge_chunks(mut chunks: Vec<OutputChunk>) -> OutputChunk {
    if chunks.len() == 1 {
        return chunks.pop().expect("non-empty");
    }
    let total: usize = chunks.iter().map(OutputChunk::len).sum();
    let mut out = String::with_capacity(total);
    let mut decoder = Utf8Stream::default();
    for chunk in chunks {
        match chunk {
            OutputChunk::Text(s) => {
                decoder.finish_into(&mut out);
                out.push_str(&s);
            }
            OutputChunk::Bytes(b) => decoder.decode_into(&b, &mut out),
        }
    }
    decoder.finish_into(&mut out);
    OutputChunk::Text(out)
}

/// Incremental UTF-8 decoder: carries an incomplete trailing sequence
/// (at most 3 bytes) to the next call, replaces invalid sequences with
/// U+FFFD.
#[derive(Default)]
struct Utf8Stream {
    carry: Vec<u8>,
}

impl Utf8Stream {
    fn decode_into(&mut self, bytes: &[u8], out: &mut String) {
        if self.carry.is_empty() {
            self.decode_slice(bytes, out);
        } else {
            let mut joined = std::mem::take(&mut self.carry);
            joined.extend_from_slice(bytes);
            self.decode_slice(&joined, out);
        }
    }

    fn decode_slice(&mut self, mut rest: &[u8], out: &mut String) {
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    // safe: from_utf8 validated this prefix
                    out.push_str(std::str::from_utf8(&rest[..valid]).expect("validated prefix"));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + bad..];
                        }
                        None => {
                            // incomplete trailing sequence, keep for next chunk
                            self.carry = rest[valid..].to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    fn finish_into(&mut self, out: &mut String) {
        if !self.carry.is_empty() {
            out.push(char::REPLACEMENT_CHARACTER);
            self.carry.clear();
        }
    }
}
