use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const JOURNAL_FORMAT_VERSION: u32 = 1;

/// A filesystem operation that could not complete because the resource was
/// held open by another process. Replayed on the next startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum PendingOp {
    /// Unlink `path` (file or directory) if it still exists.
    Delete { path: PathBuf },
    /// Rename `from` to `to` if `from` still exists.
    Move { from: PathBuf, to: PathBuf },
    /// Promote `staged` over `live`, but only while `staged` still matches
    /// `checksum` (the download may be stale by the next boot).
    Replace {
        live: PathBuf,
        staged: PathBuf,
        checksum: Option<String>,
    },
}

impl PendingOp {
    /// Path whose lock caused the deferral; used for log lines.
    pub fn subject(&self) -> &PathBuf {
        match self {
            PendingOp::Delete { path } => path,
            PendingOp::Move { from, .. } => from,
            PendingOp::Replace { live, .. } => live,
        }
    }
}

/// On-disk journal document, a versioned timestamped array of ops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingJournal {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub ops: Vec<PendingOp>,
}

impl PendingJournal {
    pub fn empty() -> Self {
        Self {
            version: JOURNAL_FORMAT_VERSION,
            updated_at: Utc::now(),
            ops: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_round_trip_through_json() {
        let ops = vec![
            PendingOp::Delete {
                path: PathBuf::from("mods/old-42-bar.jar"),
            },
            PendingOp::Move {
                from: PathBuf::from("mods/a.jar"),
                to: PathBuf::from("mods/42-a.jar"),
            },
            PendingOp::Replace {
                live: PathBuf::from("mods/42-foo.jar"),
                staged: PathBuf::from("modupdater/tmp/42-foo.jar-x.tmp"),
                checksum: Some("abcd".into()),
            },
        ];

        let json = serde_json::to_string(&ops).unwrap();
        let back: Vec<PendingOp> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ops);
    }

    #[test]
    fn delete_tag_is_the_wire_shape_the_replayer_expects() {
        let op = PendingOp::Delete {
            path: PathBuf::from("mods/old.jar"),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "delete");
        assert_eq!(json["path"], "mods/old.jar");
    }
}
