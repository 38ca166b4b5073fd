use serde::{Deserialize, Serialize};

use crate::protocol::TermSize;

/// Point-in-time capture of a session's renderer state, persisted by
/// the backend's cache service and replayed on cold start. `pty_offset`
/// is the byte offset into the logical PTY stream at capture time, so
/// live output can resume exactly where the snapshot ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub serialized_state: String,
    pub pty_offset: u64,
    pub term_size: TermSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_layout() {
        let snapshot = SessionSnapshot {
            serialized_state: "\x1b[2Jhello".to_string(),
            pty_offset: 1234,
            term_size: TermSize { rows: 24, cols: 80 },
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["ptyOffset"], 1234);
        assert_eq!(json["termSize"]["rows"], 24);
        assert_eq!(json["termSize"]["cols"], 80);
        let back: SessionSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }
}
