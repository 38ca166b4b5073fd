//! Headless session client: attaches to one backend terminal session
//! and mirrors its PTY output to stdout. Mainly useful for debugging a
//! backend without the desktop shell.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use parking_lot::Mutex;
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use tern_core::config::Config;
use tern_core::protocol::TermSize;
use tern_core::session::{BackendRpc, SessionController, SessionSnapshot};
use tern_core::term::{OutputChunk, Renderer, WriteDone};
use tern_core::transport::websocket::WebSocketConnector;
use tern_core::transport::WsControl;

#[derive(Parser, Debug)]
#[command(name = "tern", about = "Headless terminal session client")]
struct Cli {
    /// Backend websocket endpoint
    #[arg(long, env = "TERN_ENDPOINT", default_value = "ws://127.0.0.1:8190")]
    endpoint: String,

    /// Auth key sent in the X-AuthKey header
    #[arg(long, env = "TERN_AUTH_KEY")]
    auth_key: Option<String>,

    /// Session id to attach to
    #[arg(long)]
    session: String,
}

/// Pass-through renderer: PTY escape sequences go straight to the
/// controlling terminal.
struct StdoutRenderer {
    size: TermSize,
}

impl Renderer for StdoutRenderer {
    fn write(&mut self, data: OutputChunk, done: WriteDone) {
        let mut stdout = io::stdout().lock();
        let _ = match data {
            OutputChunk::Text(s) => stdout.write_all(s.as_bytes()),
            OutputChunk::Bytes(b) => stdout.write_all(&b),
        };
        let _ = stdout.flush();
        done();
    }

    fn resize(&mut self, size: TermSize) {
        self.size = size;
    }

    fn size(&self) -> TermSize {
        self.size
    }

    fn clear(&mut self) {
        print!("\x1b[2J\x1b[H");
        let _ = io::stdout().flush();
    }

    fn serialize(&mut self) -> String {
        // headless mode keeps no scrollback to serialize
        String::new()
    }

    fn get_selection(&self) -> String {
        String::new()
    }
}

/// Headless mode has no cache service or controller RPC; every call
/// reports "no data available" and the session runs live-only.
struct NoCacheRpc;

#[async_trait]
impl BackendRpc for NoCacheRpc {
    async fn load_snapshot(&self, _session_id: &str) -> Result<Option<SessionSnapshot>> {
        Ok(None)
    }

    async fn save_snapshot(&self, _session_id: &str, _snapshot: SessionSnapshot) -> Result<()> {
        Ok(())
    }

    async fn fetch_pty_output(&self, _session_id: &str, _offset: u64) -> Result<Bytes> {
        Ok(Bytes::new())
    }

    async fn runtime_info(&self, _session_id: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn resync(&self, _session_id: &str, _size: TermSize) -> Result<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config {
        endpoint: cli.endpoint,
        auth_key: cli.auth_key,
    };
    let stable_id = Uuid::new_v4().to_string();
    let (transport, events) = WsControl::new(Arc::new(WebSocketConnector), config, stable_id);

    let renderer: Arc<Mutex<dyn Renderer>> = Arc::new(Mutex::new(StdoutRenderer {
        size: TermSize { rows: 24, cols: 80 },
    }));
    let session = SessionController::new(cli.session, renderer, Arc::new(NoCacheRpc), transport);
    session.run(events).await;
    Ok(())
}
