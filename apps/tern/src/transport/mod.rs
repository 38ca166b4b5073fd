//! Duplex connection to the backend: socket abstraction, reconnect
//! policy, and the [`control::WsControl`] run loop that ties them
//! together.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::{MAX_RECONNECT_ATTEMPTS, RECONNECT_BACKOFF_SECS, RECONNECT_STORM_WINDOW};

pub mod control;
pub mod mock;
pub mod websocket;

pub use control::{WsControl, WsEvent};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("socket closed")]
    Closed,
}

/// One received websocket frame. Text frames carry a single JSON
/// message; binary frames carry a batch frame (see `protocol::wire`).
#[derive(Debug, Clone, PartialEq)]
pub enum SocketFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// A connected duplex socket. Errors are not handled separately from
/// close: a failed socket eventually yields `None` from `recv`, which
/// is the single signal the reconnect path acts on.
#[async_trait]
pub trait Socket: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound frame, or `None` once the socket is closed.
    async fn recv(&mut self) -> Option<SocketFrame>;

    async fn close(&mut self);
}

/// Dials one socket to the backend endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(
        &self,
        endpoint: &str,
        stable_id: &str,
        auth_key: Option<&str>,
    ) -> Result<Box<dyn Socket>, TransportError>;
}

/// Delay before reconnect attempt `attempt` (1-based), or `None` once
/// the attempt cap is exhausted.
///
/// Attempts index a fixed backoff table, clamped to its last entry. A
/// previous dial less than 500ms ago forces a 1s retry regardless of
/// the table, so a flapping link cannot produce a reconnect storm.
pub fn reconnect_delay(attempt: u32, since_last_dial: Duration) -> Option<Duration> {
    if attempt > MAX_RECONNECT_ATTEMPTS {
        return None;
    }
    let index = (attempt as usize - 1).min(RECONNECT_BACKOFF_SECS.len() - 1);
    let mut delay = Duration::from_secs(RECONNECT_BACKOFF_SECS[index]);
    if since_last_dial < RECONNECT_STORM_WINDOW {
        delay = Duration::from_secs(1);
    }
    Some(delay)
}
