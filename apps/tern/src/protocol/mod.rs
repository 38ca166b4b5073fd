//! Wire message model for the backend websocket channel.
//!
//! Two kinds of traffic share the connection: control messages
//! (`{"type":"ping"/"pong"}`) used purely for liveness, and application
//! commands carried in an `rpc` envelope (`{"wscommand":"rpc"}`). The
//! inner rpc payload is deliberately loose-typed: known fields are
//! lifted out, everything else rides along as opaque JSON so newer
//! backend commands pass through untouched.

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod wire;

/// Rpc commands that announce transient peer routes. They go stale
/// immediately, so they are dropped (not queued) while disconnected.
pub const TRANSIENT_RPC_COMMANDS: [&str; 2] = ["routeannounce", "routeunannounce"];

/// One decoded wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsEnvelope {
    Control(ControlMessage),
    Command(WsCommand),
}

/// Liveness control messages. `stime` is the sender's wall-clock send
/// time in milliseconds, making each ping/pong pair a round-trip timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Ping { stime: u64 },
    Pong { stime: u64 },
}

/// Application-level websocket commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "wscommand", rename_all = "lowercase")]
pub enum WsCommand {
    Rpc { message: RpcMessage },
}

impl WsCommand {
    pub fn rpc(message: RpcMessage) -> Self {
        WsCommand::Rpc { message }
    }

    /// True for messages that must not be queued while disconnected.
    pub fn is_transient(&self) -> bool {
        let WsCommand::Rpc { message } = self;
        message
            .command
            .as_deref()
            .is_some_and(|cmd| TRANSIENT_RPC_COMMANDS.contains(&cmd))
    }
}

/// An rpc payload: a known `command` name plus opaque fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RpcMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

impl RpcMessage {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            fields: serde_json::Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// Terminal dimensions at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub rows: u16,
    pub cols: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOp {
    Append,
    Truncate,
}

/// PTY output event for one session's stream file. Append payloads are
/// base64-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEvent {
    pub zoneid: String,
    pub fileop: FileOp,
    #[serde(default)]
    pub data64: String,
}

impl FileEvent {
    /// Decode the base64 payload of an append event.
    pub fn decode_data(&self) -> Result<Bytes, base64::DecodeError> {
        let raw = base64::engine::general_purpose::STANDARD.decode(&self.data64)?;
        Ok(Bytes::from(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_wire_shape() {
        let msg = WsEnvelope::Control(ControlMessage::Ping { stime: 1234 });
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"ping","stime":1234}"#);
        let back: WsEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn rpc_wire_shape() {
        let rpc = RpcMessage::new("controllerinput")
            .with_field("blockid", Value::String("b1".into()));
        let msg = WsEnvelope::Command(WsCommand::rpc(rpc));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["wscommand"], "rpc");
        assert_eq!(json["message"]["command"], "controllerinput");
        assert_eq!(json["message"]["blockid"], "b1");
        let back: WsEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn unknown_rpc_fields_round_trip() {
        let json = r#"{"wscommand":"rpc","message":{"command":"newthing","extra":{"a":1}}}"#;
        let msg: WsEnvelope = serde_json::from_str(json).unwrap();
        let WsEnvelope::Command(WsCommand::Rpc { message }) = &msg else {
            panic!("expected rpc command");
        };
        assert_eq!(message.command.as_deref(), Some("newthing"));
        assert_eq!(message.fields["extra"]["a"], 1);
    }

    #[test]
    fn transient_commands_flagged() {
        let announce = WsCommand::rpc(RpcMessage::new("routeannounce"));
        let input = WsCommand::rpc(RpcMessage::new("controllerinput"));
        assert!(announce.is_transient());
        assert!(!input.is_transient());
    }

    #[test]
    fn file_event_decodes_base64() {
        let event = FileEvent {
            zoneid: "z1".into(),
            fileop: FileOp::Append,
            data64: base64::engine::general_purpose::STANDARD.encode(b"hello"),
        };
        assert_eq!(event.decode_data().unwrap().as_ref(), b"hello");
    }
}
