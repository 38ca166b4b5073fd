//! Terminal-renderer seam and output chunk model.
//!
//! Glyph rendering is owned by an external terminal-rendering library;
//! this crate only drives it through the [`Renderer`] trait.

use bytes::Bytes;

use crate::protocol::TermSize;

pub mod coalesce;
pub mod input;

pub use coalesce::BatchedWriter;
pub use input::{InputDecision, InputGate};

/// Completion callback for a renderer write. Fires once the renderer
/// has finished processing the data; used for backpressure accounting.
pub type WriteDone = Box<dyn FnOnce() + Send>;

/// One span of PTY output. Chunks are never reordered or dropped; the
/// coalescer may only merge several of them into one renderer write.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputChunk {
    Text(String),
    Bytes(Bytes),
}

impl OutputChunk {
    pub fn len(&self) -> usize {
        match self {
            OutputChunk::Text(s) => s.len(),
            OutputChunk::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for OutputChunk {
    fn from(s: String) -> Self {
        OutputChunk::Text(s)
    }
}

impl From<&str> for OutputChunk {
    fn from(s: &str) -> Self {
        OutputChunk::Text(s.to_string())
    }
}

impl From<Bytes> for OutputChunk {
    fn from(b: Bytes) -> Self {
        OutputChunk::Bytes(b)
    }
}

/// External terminal renderer. Single-threaded contract: all calls are
/// made from the session's event loop.
pub trait Renderer: Send {
    /// Write output data; `done` fires when the renderer has processed
    /// it. Data must be applied in call order.
    fn write(&mut self, data: OutputChunk, done: WriteDone);

    fn resize(&mut self, size: TermSize);

    fn size(&self) -> TermSize;

    /// Clear all screen and scrollback content.
    fn clear(&mut self);

    /// Serialize full renderer state for snapshotting.
    fn serialize(&mut self) -> String;

    /// Current selection text. The pipeline never reads it; it exists
    /// for embedders wiring up copy-on-select.
    fn get_selection(&self) -> String;

    fn dispose(&mut self) {}
}
