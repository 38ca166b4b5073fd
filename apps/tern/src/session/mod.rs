//! Session controller: binds one transport, one output coalescer, and
//! one input gate to one logical PTY session.
//!
//! Cold start replays the cached snapshot (temporarily resizing the
//! renderer to the captured size), then appends live PTY output from
//! the snapshot's byte offset. Output arriving before loading completes
//! is held and replayed in order once loading finishes. While the
//! session is idle, renderer state is periodically serialized and
//! persisted together with the current offset and terminal size.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::{
    FRAME_INTERVAL, MIN_BYTES_FOR_SNAPSHOT, RESIZE_DEFER_WINDOW, SNAPSHOT_ACTIVE_WINDOW,
    SNAPSHOT_INTERVAL, SNAPSHOT_INTERVAL_BUSY,
};
use crate::protocol::{FileEvent, FileOp, RpcMessage, TermSize, WsCommand};
use crate::term::{BatchedWriter, InputDecision, InputGate, OutputChunk, Renderer};
use crate::transport::{WsControl, WsEvent};

pub mod snapshot;

pub use snapshot::SessionSnapshot;

/// Callback for input generated by paste operations.
pub type MultiInputCallback = Box<dyn FnMut(&str) + Send>;

/// Backend RPC collaborator. All calls are best-effort: a failure is
/// logged and treated as "no data available", never surfaced as fatal.
#[async_trait]
pub trait BackendRpc: Send + Sync {
    /// Cached snapshot for this session, if one exists.
    async fn load_snapshot(&self, session_id: &str) -> Result<Option<SessionSnapshot>>;

    async fn save_snapshot(&self, session_id: &str, snapshot: SessionSnapshot) -> Result<()>;

    /// Live PTY output starting at `offset`.
    async fn fetch_pty_output(&self, session_id: &str, offset: u64) -> Result<Bytes>;

    /// Opaque session metadata (shell integration state and the like).
    async fn runtime_info(&self, session_id: &str) -> Result<Option<Value>>;

    /// Ask the backend controller to resync at the given size.
    async fn resync(&self, session_id: &str, size: TermSize) -> Result<()>;
}

pub struct SessionController {
    session_id: String,
    renderer: Arc<Mutex<dyn Renderer>>,
    writer: BatchedWriter,
    gate: InputGate,
    rpc: Arc<dyn BackendRpc>,
    transport: WsControl,
    multi_input: Option<MultiInputCallback>,
    loaded: bool,
    held: Vec<OutputChunk>,
    pty_offset: u64,
    bytes_processed: u64,
    last_output: Instant,
    has_resized: bool,
    runtime_info: Option<Value>,
    disposed: bool,
}

impl SessionController {
    pub fn new(
        session_id: String,
        renderer: Arc<Mutex<dyn Renderer>>,
        rpc: Arc<dyn BackendRpc>,
        transport: WsControl,
    ) -> Self {
        let writer = BatchedWriter::new(renderer.clone());
        Self {
            session_id,
            renderer,
            writer,
            gate: InputGate::new(),
            rpc,
            transport,
            multi_input: None,
            loaded: false,
            held: Vec::new(),
            pty_offset: 0,
            bytes_processed: 0,
            last_output: Instant::now(),
            has_resized: false,
            runtime_info: None,
            disposed: false,
        }
    }

    pub fn set_multi_input(&mut self, callback: MultiInputCallback) {
        self.multi_input = Some(callback);
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn pty_offset(&self) -> u64 {
        self.pty_offset
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    pub fn runtime_info(&self) -> Option<&Value> {
        self.runtime_info.as_ref()
    }

    /// Cold start: fetch runtime metadata and replay cached state
    /// concurrently, then mark the session loaded and replay any output
    /// held in the meantime, in receipt order.
    pub async fn init(&mut self) {
        let rpc = self.rpc.clone();
        let session_id = self.session_id.clone();
        let (rt_info, _) = tokio::join!(
            async move {
                match rpc.runtime_info(&session_id).await {
                    Ok(info) => info,
                    Err(err) => {
                        warn!("error loading runtime info: {err}");
                        None
                    }
                }
            },
            self.load_initial(),
        );
        self.runtime_info = rt_info;
        self.loaded = true;
        let held = std::mem::take(&mut self.held);
        let now = Instant::now();
        for chunk in held {
            self.write_output(chunk, None, now);
        }
    }

    async fn load_initial(&mut self) {
        let mut offset = 0u64;
        match self.rpc.load_snapshot(&self.session_id).await {
            Ok(Some(snap)) => {
                offset = snap.pty_offset;
                self.pty_offset = offset;
                if !snap.serialized_state.is_empty() {
                    let current = self.renderer.lock().size();
                    let captured = snap.term_size;
                    let resized = captured != current;
                    if resized {
                        debug!(?captured, ?current, "snapshot size mismatch, temporary resize");
                        self.renderer.lock().resize(captured);
                    }
                    let now = Instant::now();
                    self.write_output(OutputChunk::Text(snap.serialized_state), Some(offset), now);
                    // replay must land at the captured size
                    self.writer.flush();
                    if resized {
                        self.renderer.lock().resize(current);
                    }
                }
            }
            Ok(None) => {}
            Err(err) => warn!("error loading cached snapshot: {err}"),
        }
        match self.rpc.fetch_pty_output(&self.session_id, offset).await {
            Ok(data) if !data.is_empty() => {
                let now = Instant::now();
                self.write_output(OutputChunk::Bytes(data), None, now);
            }
            Ok(_) => {}
            Err(err) => warn!("error fetching pty output: {err}"),
        }
    }

    /// Route output through the coalescer and advance the stream
    /// accounting. `set_offset` pins the offset (snapshot replay);
    /// otherwise the offset advances by the chunk length.
    fn write_output(&mut self, chunk: OutputChunk, set_offset: Option<u64>, now: Instant) {
        let len = chunk.len() as u64;
        self.writer.write(chunk);
        match set_offset {
            Some(offset) => self.pty_offset = offset,
            None => {
                self.pty_offset += len;
                self.bytes_processed += len;
            }
        }
        self.last_output = now;
    }

    /// Inbound PTY stream event for this session.
    pub fn handle_file_event(&mut self, event: &FileEvent, now: Instant) {
        if event.zoneid != self.session_id {
            return;
        }
        match event.fileop {
            FileOp::Truncate => {
                self.renderer.lock().clear();
                self.held.clear();
                self.writer.discard_buffered();
            }
            FileOp::Append => match event.decode_data() {
                Ok(data) => {
                    let chunk = OutputChunk::Bytes(data);
                    if self.loaded {
                        self.write_output(chunk, None, now);
                    } else {
                        self.held.push(chunk);
                    }
                }
                Err(err) => warn!("bad file event payload: {err}"),
            },
        }
    }

    /// Input event from the renderer's input layer.
    pub fn handle_term_data(&mut self, data: &str, now: Instant) {
        if !self.loaded {
            return;
        }
        match self.gate.filter(data, now) {
            InputDecision::Forward => self.send_input(data),
            InputDecision::RouteToMultiInput => {
                if let Some(callback) = self.multi_input.as_mut() {
                    callback(data);
                }
            }
            InputDecision::Suppress => {}
        }
    }

    fn send_input(&self, data: &str) {
        let data64 = base64::engine::general_purpose::STANDARD.encode(data);
        let msg = RpcMessage::new("controllerinput")
            .with_field("sessionid", Value::String(self.session_id.clone()))
            .with_field("inputdata64", Value::String(data64));
        self.transport.push_message(WsCommand::rpc(msg));
    }

    pub fn composition_start(&mut self) {
        self.gate.composition_start();
    }

    pub fn composition_update(&mut self, text: &str) {
        self.gate.composition_update(text);
    }

    pub fn composition_end(&mut self, text: &str, now: Instant) {
        self.gate.composition_end(text, now);
    }

    pub fn focus_lost(&mut self) {
        self.gate.focus_lost();
    }

    pub fn begin_paste(&mut self) {
        self.gate.begin_paste();
    }

    pub fn end_paste(&mut self, now: Instant) {
        self.gate.end_paste(now);
    }

    /// Renderer size changed. The backend is told immediately unless
    /// output is actively streaming, in which case the next resync
    /// carries the correct size.
    pub async fn handle_resize(&mut self, size: TermSize, now: Instant) {
        let old = self.renderer.lock().size();
        if old != size {
            self.renderer.lock().resize(size);
            if now.saturating_duration_since(self.last_output) > RESIZE_DEFER_WINDOW {
                let msg = RpcMessage::new("controllerinput")
                    .with_field("sessionid", Value::String(self.session_id.clone()))
                    .with_field("termsize", serde_json::to_value(size).unwrap_or(Value::Null));
                self.transport.push_message(WsCommand::rpc(msg));
            } else {
                debug!("resize notification deferred, output active");
            }
        }
        if !self.has_resized {
            self.has_resized = true;
            self.resync("initial resize").await;
        }
    }

    async fn resync(&self, reason: &str) {
        debug!(session = %self.session_id, reason, "controller resync");
        let size = self.renderer.lock().size();
        if let Err(err) = self.rpc.resync(&self.session_id, size).await {
            warn!("error during controller resync ({reason}): {err}");
        }
    }

    /// Next idle-snapshot check delay: lengthened while throughput is
    /// high so sustained bursts don't trigger wasted serialization.
    pub fn snapshot_interval(&self) -> Duration {
        if self.bytes_processed >= MIN_BYTES_FOR_SNAPSHOT {
            SNAPSHOT_INTERVAL_BUSY
        } else {
            SNAPSHOT_INTERVAL
        }
    }

    fn should_snapshot(&self, now: Instant) -> bool {
        // serializing a renderer mid-flood blocks the event loop
        if now.saturating_duration_since(self.last_output) < SNAPSHOT_ACTIVE_WINDOW {
            return false;
        }
        self.bytes_processed >= MIN_BYTES_FOR_SNAPSHOT
    }

    /// Take an idle snapshot if the session has processed enough output
    /// and has been quiet long enough. Returns whether one was taken.
    pub async fn maybe_snapshot(&mut self, now: Instant) -> bool {
        if !self.should_snapshot(now) {
            return false;
        }
        let (serialized_state, term_size) = {
            let mut renderer = self.renderer.lock();
            (renderer.serialize(), renderer.size())
        };
        let snapshot = SessionSnapshot {
            serialized_state,
            pty_offset: self.pty_offset,
            term_size,
        };
        self.bytes_processed = 0;
        if let Err(err) = self.rpc.save_snapshot(&self.session_id, snapshot).await {
            warn!("error saving session snapshot: {err}");
        }
        true
    }

    /// Drive the coalescer once per display-refresh interval. Called by
    /// [`SessionController::run`], or directly by an embedder with its
    /// own loop.
    pub fn frame_tick(&mut self) {
        self.writer.frame_tick();
    }

    /// Route one decoded transport message into the session.
    pub fn handle_command(&mut self, cmd: WsCommand, now: Instant) {
        let WsCommand::Rpc { message } = cmd;
        match message.command.as_deref() {
            Some("fileevent") => {
                match serde_json::from_value::<FileEvent>(Value::Object(message.fields)) {
                    Ok(event) => self.handle_file_event(&event, now),
                    Err(err) => warn!("malformed file event: {err}"),
                }
            }
            other => debug!(command = ?other, "unhandled rpc message"),
        }
    }

    /// Final flush; no buffered output is lost. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.writer.dispose();
        self.renderer.lock().dispose();
    }

    /// Drive the session: init, then frame ticks for the coalescer,
    /// idle-snapshot checks, and transport events, until the transport
    /// event stream ends.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<WsEvent>) {
        self.init().await;
        let mut frame = tokio::time::interval(FRAME_INTERVAL);
        frame.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut next_snapshot = tokio::time::Instant::now() + self.snapshot_interval();
        loop {
            tokio::select! {
                _ = frame.tick() => self.writer.frame_tick(),
                _ = tokio::time::sleep_until(next_snapshot) => {
                    self.maybe_snapshot(Instant::now()).await;
                    next_snapshot = tokio::time::Instant::now() + self.snapshot_interval();
                }
                ev = events.recv() => match ev {
                    Some(WsEvent::Message(cmd)) => self.handle_command(cmd, Instant::now()),
                    Some(WsEvent::Reconnected) => self.resync("reconnect").await,
                    None => break,
                },
            }
        }
        self.dispose();
    }
}
