//! Shared test doubles: a recording renderer and a stub backend RPC.

use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;

use crate::protocol::TermSize;
use crate::session::{BackendRpc, SessionSnapshot};
use crate::term::{OutputChunk, Renderer, WriteDone};

/// Renderer that records every call. Write completions fire
/// immediately unless `hold_completions` is set, in which case the test
/// releases them one at a time with [`RecordingRenderer::complete_one`].
pub struct RecordingRenderer {
    pub writes: Vec<String>,
    pub raw_writes: Vec<OutputChunk>,
    pub write_sizes: Vec<TermSize>,
    /// Concatenated text view of everything written.
    pub content: String,
    pub resizes: Vec<TermSize>,
    pub clears: usize,
    pub disposed: bool,
    pub hold_completions: bool,
    completions: VecDeque<WriteDone>,
    size: TermSize,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::with_size(TermSize { rows: 24, cols: 80 })
    }

    pub fn with_size(size: TermSize) -> Self {
        Self {
            writes: Vec::new(),
            raw_writes: Vec::new(),
            write_sizes: Vec::new(),
            content: String::new(),
            resizes: Vec::new(),
            clears: 0,
            disposed: false,
            hold_completions: false,
            completions: VecDeque::new(),
            size,
        }
    }

    pub fn take_writes(&mut self) -> Vec<String> {
        std::mem::take(&mut self.writes)
    }

    /// Fire the oldest held completion.
    pub fn complete_one(&mut self) {
        if let Some(done) = self.completions.pop_front() {
            done();
        }
    }
}

impl Renderer for RecordingRenderer {
    fn write(&mut self, data: OutputChunk, done: WriteDone) {
        let text = match &data {
            OutputChunk::Text(s) => s.clone(),
            OutputChunk::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        };
        self.content.push_str(&text);
        self.writes.push(text);
        self.raw_writes.push(data);
        self.write_sizes.push(self.size);
        if self.hold_completions {
            self.completions.push_back(done);
        } else {
            done();
        }
    }

    fn resize(&mut self, size: TermSize) {
        self.size = size;
        self.resizes.push(size);
    }

    fn size(&self) -> TermSize {
        self.size
    }

    fn clear(&mut self) {
        self.content.clear();
        self.clears += 1;
    }

    fn serialize(&mut self) -> String {
        self.content.clone()
    }

    fn get_selection(&self) -> String {
        String::new()
    }

    fn dispose(&mut self) {
        self.disposed = true;
    }
}

/// Backend stub backed by one in-memory logical PTY stream.
pub struct StubRpc {
    pub snapshot: Mutex<Option<SessionSnapshot>>,
    pub pty_stream: Mutex<Bytes>,
    pub rt_info: Mutex<Option<Value>>,
    pub saved: Mutex<Vec<SessionSnapshot>>,
    pub resyncs: Mutex<Vec<TermSize>>,
    pub fail_all: bool,
}

impl StubRpc {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(None),
            pty_stream: Mutex::new(Bytes::new()),
            rt_info: Mutex::new(None),
            saved: Mutex::new(Vec::new()),
            resyncs: Mutex::new(Vec::new()),
            fail_all: false,
        }
    }

    /// Every call fails, as when the backend is unreachable.
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::new()
        }
    }

    pub fn set_pty_stream(&self, data: &[u8]) {
        *self.pty_stream.lock() = Bytes::copy_from_slice(data);
    }

    fn check(&self) -> Result<()> {
        if self.fail_all {
            Err(anyhow!("backend unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BackendRpc for StubRpc {
    async fn load_snapshot(&self, _session_id: &str) -> Result<Option<SessionSnapshot>> {
        self.check()?;
        Ok(self.snapshot.lock().clone())
    }

    async fn save_snapshot(&self, _session_id: &str, snapshot: SessionSnapshot) -> Result<()> {
        self.check()?;
        self.saved.lock().push(snapshot);
        Ok(())
    }

    async fn fetch_pty_output(&self, _session_id: &str, offset: u64) -> Result<Bytes> {
        self.check()?;
        let stream = self.pty_stream.lock().clone();
        let start = (offset as usize).min(stream.len());
        Ok(stream.slice(start..))
    }

    async fn runtime_info(&self, _session_id: &str) -> Result<Option<Value>> {
        self.check()?;
        Ok(self.rt_info.lock().clone())
    }

    async fn resync(&self, _session_id: &str, size: TermSize) -> Result<()> {
        self.check()?;
        self.resyncs.lock().push(size);
        Ok(())
    }
}
