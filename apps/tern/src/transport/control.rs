//! Reconnecting websocket control.
//!
//! [`WsControl`] owns one logical connection to the backend for the
//! whole process. A single spawned run loop dials the socket, flushes
//! the offline queue on every (re)open, answers liveness pings,
//! decodes text and binary batch frames, and reconnects with backoff
//! after unexpected closes. Callers interact only through
//! [`WsControl::push_message`] and the event channel handed out at
//! construction, so connection state never leaks.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Duration, Instant};
use tracing::{debug, warn};

use crate::config::{
    Config, MAX_SEND_SIZE, PING_INTERVAL, STABLE_CONN_TIME, WARN_SEND_SIZE,
};
use crate::protocol::wire::decode_batch_frame;
use crate::protocol::{ControlMessage, WsCommand, WsEnvelope};

use super::{reconnect_delay, Connector, Socket, SocketFrame, TransportError};

/// Events delivered to the single transport consumer. Ping/pong never
/// appear here; they are answered and swallowed internally.
#[derive(Debug, Clone, PartialEq)]
pub enum WsEvent {
    /// A decoded application message, in wire order.
    Message(WsCommand),
    /// The connection (re)opened and the offline queue was flushed.
    Reconnected,
}

enum Op {
    Push(WsCommand),
    Shutdown,
}

/// Handle to the connection run loop.
pub struct WsControl {
    ops: mpsc::UnboundedSender<Op>,
    task: tokio::task::JoinHandle<()>,
}

impl WsControl {
    /// Spawn the run loop and start connecting. Returns the handle and
    /// the consumer's event stream.
    pub fn new(
        connector: Arc<dyn Connector>,
        config: Config,
        stable_id: String,
    ) -> (Self, mpsc::UnboundedReceiver<WsEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_loop(RunState {
            connector,
            config,
            stable_id,
            queue: VecDeque::new(),
            attempts: 0,
            last_dial: None,
            events: event_tx,
            ops: op_rx,
        }));
        (Self { ops: op_tx, task }, event_rx)
    }

    /// Submit a message. Sent immediately while open; queued while
    /// disconnected, except transient announcements which are dropped.
    /// Fire-and-forget: oversize messages are dropped with a log line.
    pub fn push_message(&self, cmd: WsCommand) {
        if self.ops.send(Op::Push(cmd)).is_err() {
            debug!("push after transport shutdown, dropping message");
        }
    }

    /// Permanently close the connection; no further reconnects.
    pub async fn shutdown(mut self) {
        let _ = self.ops.send(Op::Shutdown);
        let _ = (&mut self.task).await;
    }
}

impl Drop for WsControl {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct RunState {
    connector: Arc<dyn Connector>,
    config: Config,
    stable_id: String,
    queue: VecDeque<WsCommand>,
    attempts: u32,
    last_dial: Option<Instant>,
    events: mpsc::UnboundedSender<WsEvent>,
    ops: mpsc::UnboundedReceiver<Op>,
}

impl RunState {
    fn queue_or_drop(&mut self, cmd: WsCommand) {
        if cmd.is_transient() {
            debug!("dropping transient message while disconnected");
            return;
        }
        self.queue.push_back(cmd);
    }
}

enum LoopEvent {
    StableTimer,
    PingTick,
    Op(Option<Op>),
    Frame(Option<SocketFrame>),
}

async fn run_loop(mut st: RunState) {
    loop {
        st.last_dial = Some(Instant::now());
        let mut socket = match dial_accepting_ops(&mut st).await {
            None => return,
            Some(Ok(socket)) => socket,
            Some(Err(err)) => {
                debug!("connect failed: {err}");
                if !sleep_before_retry(&mut st).await {
                    return;
                }
                continue;
            }
        };
        debug!("connection open");

        // Flush everything queued while disconnected, in original order,
        // before any new message can be sent.
        while let Some(cmd) = st.queue.pop_front() {
            send_command(socket.as_mut(), &cmd).await;
        }
        let _ = st.events.send(WsEvent::Reconnected);

        let opened = Instant::now();
        let mut stable_reset_done = false;
        let mut ping = interval_at(opened + PING_INTERVAL, PING_INTERVAL);

        let intentional_close = loop {
            let ev = tokio::select! {
                _ = sleep_until(opened + STABLE_CONN_TIME), if !stable_reset_done => {
                    LoopEvent::StableTimer
                }
                _ = ping.tick() => LoopEvent::PingTick,
                op = st.ops.recv() => LoopEvent::Op(op),
                frame = socket.recv() => LoopEvent::Frame(frame),
            };
            match ev {
                LoopEvent::StableTimer => {
                    // survived long enough to count as recovered
                    st.attempts = 0;
                    stable_reset_done = true;
                }
                LoopEvent::PingTick => {
                    send_control(socket.as_mut(), &ControlMessage::Ping { stime: now_ms() })
                        .await;
                }
                LoopEvent::Op(Some(Op::Push(cmd))) => {
                    send_command(socket.as_mut(), &cmd).await;
                }
                LoopEvent::Op(Some(Op::Shutdown)) | LoopEvent::Op(None) => break true,
                LoopEvent::Frame(Some(frame)) => {
                    for envelope in decode_frame(frame) {
                        match envelope {
                            WsEnvelope::Control(ControlMessage::Ping { .. }) => {
                                send_control(
                                    socket.as_mut(),
                                    &ControlMessage::Pong { stime: now_ms() },
                                )
                                .await;
                            }
                            WsEnvelope::Control(ControlMessage::Pong { .. }) => {}
                            WsEnvelope::Command(cmd) => {
                                let _ = st.events.send(WsEvent::Message(cmd));
                            }
                        }
                    }
                }
                LoopEvent::Frame(None) => break false,
            }
        };

        if intentional_close {
            socket.close().await;
            debug!("connection closed");
            return;
        }
        debug!("connection error/disconnected");
        if !sleep_before_retry(&mut st).await {
            return;
        }
    }
}

/// Dial the backend while still accepting submissions, which queue (or
/// drop, if transient) exactly as during backoff sleeps. Returns `None`
/// on shutdown.
async fn dial_accepting_ops(
    st: &mut RunState,
) -> Option<Result<Box<dyn Socket>, TransportError>> {
    let connector = st.connector.clone();
    let endpoint = st.config.endpoint.clone();
    let stable_id = st.stable_id.clone();
    let auth_key = st.config.auth_key.clone();
    let mut dial = std::pin::pin!(async move {
        connector.dial(&endpoint, &stable_id, auth_key.as_deref()).await
    });
    loop {
        tokio::select! {
            result = &mut dial => return Some(result),
            op = st.ops.recv() => match op {
                Some(Op::Push(cmd)) => st.queue_or_drop(cmd),
                Some(Op::Shutdown) | None => return None,
            },
        }
    }
}

/// Wait out the backoff delay before the next dial, still accepting
/// submissions (queued, or dropped if transient) in the meantime.
/// Returns `false` once reconnecting should stop for good.
async fn sleep_before_retry(st: &mut RunState) -> bool {
    st.attempts += 1;
    let since_last_dial = st
        .last_dial
        .map(|t| t.elapsed())
        .unwrap_or(Duration::MAX);
    let Some(delay) = reconnect_delay(st.attempts, since_last_dial) else {
        debug!("cannot connect, giving up");
        return false;
    };
    if !delay.is_zero() {
        debug!("reconnect attempt {} in {}s", st.attempts, delay.as_secs());
    }
    let deadline = Instant::now() + delay;
    loop {
        tokio::select! {
            _ = sleep_until(deadline) => return true,
            op = st.ops.recv() => match op {
                Some(Op::Push(cmd)) => st.queue_or_drop(cmd),
                Some(Op::Shutdown) | None => return false,
            },
        }
    }
}

fn decode_frame(frame: SocketFrame) -> Vec<WsEnvelope> {
    match frame {
        SocketFrame::Text(text) => match serde_json::from_str::<WsEnvelope>(&text) {
            Ok(envelope) => vec![envelope],
            Err(err) => {
                warn!("error parsing text message: {err}");
                Vec::new()
            }
        },
        SocketFrame::Binary(data) => decode_batch_frame(&data),
    }
}

async fn send_command(socket: &mut dyn Socket, cmd: &WsCommand) {
    match serde_json::to_string(cmd) {
        Ok(text) => send_text_checked(socket, text).await,
        Err(err) => warn!("error serializing message: {err}"),
    }
}

async fn send_control(socket: &mut dyn Socket, msg: &ControlMessage) {
    match serde_json::to_string(msg) {
        Ok(text) => send_text_checked(socket, text).await,
        Err(err) => warn!("error serializing control message: {err}"),
    }
}

async fn send_text_checked(socket: &mut dyn Socket, text: String) {
    let size = text.len();
    if size > MAX_SEND_SIZE {
        warn!(size, "message too large, dropping");
        return;
    }
    if size > WARN_SEND_SIZE {
        warn!(size, "large message");
    }
    if let Err(err) = socket.send_text(text).await {
        // the close path will fire and drive the reconnect
        debug!("send failed: {err}");
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
