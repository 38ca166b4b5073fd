//! Scripted connector and in-memory socket for transport tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{Connector, Socket, SocketFrame, TransportError};

/// In-memory socket half driven by a [`MockSocketHandle`].
pub struct MockSocket {
    incoming: mpsc::UnboundedReceiver<SocketFrame>,
    outgoing: mpsc::UnboundedSender<String>,
}

/// Test-side handle: feed inbound frames, observe outbound text.
/// Dropping the handle (or calling `close`) closes the socket.
pub struct MockSocketHandle {
    pub incoming: mpsc::UnboundedSender<SocketFrame>,
    pub outgoing: mpsc::UnboundedReceiver<String>,
}

impl MockSocketHandle {
    /// Simulate the peer closing the connection.
    pub fn close(&mut self) {
        let (tx, _rx) = mpsc::unbounded_channel();
        self.incoming = tx;
    }
}

pub fn socket_pair() -> (MockSocket, MockSocketHandle) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    (
        MockSocket {
            incoming: in_rx,
            outgoing: out_tx,
        },
        MockSocketHandle {
            incoming: in_tx,
            outgoing: out_rx,
        },
    )
}

#[async_trait]
impl Socket for MockSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .send(text)
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<SocketFrame> {
        self.incoming.recv().await
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}

enum DialOutcome {
    Fail,
    Socket(MockSocket),
}

/// Connector returning a scripted sequence of dial outcomes. Once the
/// script is exhausted every further dial fails.
pub struct MockConnector {
    script: Mutex<VecDeque<DialOutcome>>,
    dials: AtomicU32,
    dial_delay: Mutex<Duration>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            dials: AtomicU32::new(0),
            dial_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Every dial takes this long to resolve (connect latency).
    pub fn set_dial_delay(&self, delay: Duration) {
        *self.dial_delay.lock().unwrap() = delay;
    }

    /// Queue a failed dial.
    pub fn push_failure(&self) {
        self.script.lock().unwrap().push_back(DialOutcome::Fail);
    }

    /// Queue a successful dial, returning the test-side handle.
    pub fn push_socket(&self) -> MockSocketHandle {
        let (socket, handle) = socket_pair();
        self.script
            .lock()
            .unwrap()
            .push_back(DialOutcome::Socket(socket));
        handle
    }

    pub fn dial_count(&self) -> u32 {
        self.dials.load(Ordering::SeqCst)
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn dial(
        &self,
        _endpoint: &str,
        _stable_id: &str,
        _auth_key: Option<&str>,
    ) -> Result<Box<dyn Socket>, TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let delay = *self.dial_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.script.lock().unwrap().pop_front() {
            Some(DialOutcome::Socket(socket)) => Ok(Box::new(socket)),
            Some(DialOutcome::Fail) | None => {
                Err(TransportError::Dial("scripted failure".to_string()))
            }
        }
    }
}
