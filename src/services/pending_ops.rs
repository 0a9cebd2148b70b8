use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::errors::{AppError, AppResult};
use crate::models::pending::{PendingJournal, PendingOp};
use crate::services::fsops;
use crate::services::hash;

/// Result of one journal replay pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    pub completed: usize,
    /// Records whose source no longer exists or no longer matches; nothing
    /// to do, dropped from the journal.
    pub obsolete: usize,
    /// Records that failed again and stay queued for the next startup.
    pub remaining: usize,
}

/// Persistent journal of filesystem operations deferred because the target
/// was held open by another process.
///
/// Appended on defer (persisted immediately, so a crash after a defer never
/// loses the record) and rewritten after replay.
pub struct PendingOpsLog {
    path: PathBuf,
    journal: PendingJournal,
}

impl PendingOpsLog {
    /// Load the journal; a missing file is an empty journal.
    pub fn load(path: &Path) -> AppResult<Self> {
        let journal = match std::fs::read(path) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                log::warn!("pending-ops journal unreadable, discarding: {e}");
                PendingJournal::empty()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PendingJournal::empty(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            journal,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.journal.ops.is_empty()
    }

    pub fn ops(&self) -> &[PendingOp] {
        &self.journal.ops
    }

    /// Record a deferred op and persist the journal at once.
    pub fn defer(&mut self, op: PendingOp) -> AppResult<()> {
        log::info!("deferring locked op on {}", op.subject().display());
        self.journal.ops.push(op);
        self.persist()
    }

    /// Replay every record. Each is removed only on success or when it is
    /// determined obsolete; failures stay queued. Replay is idempotent: a
    /// second pass over the same journal leaves the filesystem unchanged.
    pub async fn replay(&mut self) -> AppResult<ReplayReport> {
        let mut report = ReplayReport::default();
        let mut remaining: Vec<PendingOp> = Vec::new();

        let ops = std::mem::take(&mut self.journal.ops);
        for op in ops {
            match replay_one(&op).await {
                Ok(ReplayOutcome::Completed) => report.completed += 1,
                Ok(ReplayOutcome::Obsolete) => report.obsolete += 1,
                Err(e) => {
                    log::warn!("pending op on {} failed again: {e}", op.subject().display());
                    report.remaining += 1;
                    remaining.push(op);
                }
            }
        }

        self.journal.ops = remaining;
        self.persist()?;
        Ok(report)
    }

    fn persist(&mut self) -> AppResult<()> {
        if self.journal.ops.is_empty() {
            // Discard the journal entirely once every record is settled.
            match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }
        self.journal.updated_at = Utc::now();
        fsops::atomic_write_json(&self.path, &self.journal)
    }
}

enum ReplayOutcome {
    Completed,
    Obsolete,
}

async fn replay_one(op: &PendingOp) -> AppResult<ReplayOutcome> {
    match op {
        PendingOp::Delete { path } => {
            let meta = match tokio::fs::metadata(path).await {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(ReplayOutcome::Obsolete)
                }
                Err(e) => return Err(e.into()),
            };
            if meta.is_dir() {
                tokio::fs::remove_dir_all(path).await?;
            } else {
                fsops::remove_file(path).await?;
            }
            Ok(ReplayOutcome::Completed)
        }
        PendingOp::Move { from, to } => {
            if !tokio::fs::try_exists(from).await? {
                return Ok(ReplayOutcome::Obsolete);
            }
            fsops::atomic_move(from, to, 0).await?;
            Ok(ReplayOutcome::Completed)
        }
        PendingOp::Replace {
            live,
            staged,
            checksum,
        } => {
            if !tokio::fs::try_exists(staged).await? {
                return Ok(ReplayOutcome::Obsolete);
            }
            if let Some(expected) = checksum {
                let actual = hash::sha256_file(staged).await?;
                if !hash::hashes_match(&actual, expected) {
                    log::warn!(
                        "staged file {} no longer matches its checksum, discarding",
                        staged.display()
                    );
                    let _ = tokio::fs::remove_file(staged).await;
                    return Ok(ReplayOutcome::Obsolete);
                }
            }
            if tokio::fs::try_exists(live).await? {
                fsops::remove_file(live).await?;
            }
            fsops::atomic_move(staged, live, 0).await.map_err(|e| {
                if matches!(e, AppError::Locked(_)) {
                    e
                } else {
                    AppError::Custom(format!(
                        "failed to promote staged file {}: {e}",
                        staged.display()
                    ))
                }
            })?;
            Ok(ReplayOutcome::Completed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("modupdater_test_{label}_{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn missing_journal_is_empty_not_an_error() -> AppResult<()> {
        let log = PendingOpsLog::load(&temp_path("journal_missing"))?;
        assert!(log.is_empty());
        Ok(())
    }

    #[test]
    fn defer_persists_immediately() -> AppResult<()> {
        let root = temp_path("journal_defer");
        std::fs::create_dir_all(&root)?;
        let path = root.join("pending-update-ops.json");

        let mut log = PendingOpsLog::load(&path)?;
        log.defer(PendingOp::Delete {
            path: root.join("mods/old.jar"),
        })?;

        let reloaded = PendingOpsLog::load(&path)?;
        assert_eq!(reloaded.ops().len(), 1);
        assert_eq!(reloaded.ops()[0].subject(), &root.join("mods/old.jar"));

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }

    #[tokio::test]
    async fn replay_applies_delete_move_and_replace() -> AppResult<()> {
        let root = temp_path("journal_replay");
        tokio::fs::create_dir_all(root.join("mods")).await?;
        tokio::fs::create_dir_all(root.join("tmp")).await?;

        tokio::fs::write(root.join("mods/dead.jar"), b"dead").await?;
        tokio::fs::write(root.join("mods/misnamed.jar"), b"keep").await?;
        tokio::fs::write(root.join("tmp/staged.tmp"), b"fresh bytes").await?;
        tokio::fs::write(root.join("mods/stale.jar"), b"stale").await?;

        let checksum = hash::sha256_bytes(b"fresh bytes");

        let journal_path = root.join("pending-update-ops.json");
        let mut log = PendingOpsLog::load(&journal_path)?;
        log.defer(PendingOp::Delete {
            path: root.join("mods/dead.jar"),
        })?;
        log.defer(PendingOp::Move {
            from: root.join("mods/misnamed.jar"),
            to: root.join("mods/42-keep.jar"),
        })?;
        log.defer(PendingOp::Replace {
            live: root.join("mods/stale.jar"),
            staged: root.join("tmp/staged.tmp"),
            checksum: Some(checksum),
        })?;

        let report = log.replay().await?;
        assert_eq!(report.completed, 3);
        assert_eq!(report.remaining, 0);

        assert!(!root.join("mods/dead.jar").exists());
        assert!(root.join("mods/42-keep.jar").exists());
        assert_eq!(tokio::fs::read(root.join("mods/stale.jar")).await?, b"fresh bytes");
        // Journal is discarded once everything settled.
        assert!(!journal_path.exists());

        let _ = tokio::fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn replay_twice_is_idempotent() -> AppResult<()> {
        let root = temp_path("journal_idempotent");
        tokio::fs::create_dir_all(root.join("mods")).await?;
        tokio::fs::write(root.join("mods/dead.jar"), b"dead").await?;

        let journal_path = root.join("pending-update-ops.json");
        let mut log = PendingOpsLog::load(&journal_path)?;
        log.defer(PendingOp::Delete {
            path: root.join("mods/dead.jar"),
        })?;

        let first = log.replay().await?;
        assert_eq!(first.completed, 1);

        // Second replay of a fresh load sees no journal and does nothing.
        let mut log = PendingOpsLog::load(&journal_path)?;
        let second = log.replay().await?;
        assert_eq!(second, ReplayReport::default());
        assert!(!root.join("mods/dead.jar").exists());

        let _ = tokio::fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn obsolete_records_are_dropped() -> AppResult<()> {
        let root = temp_path("journal_obsolete");
        tokio::fs::create_dir_all(root.join("mods")).await?;

        let journal_path = root.join("pending-update-ops.json");
        let mut log = PendingOpsLog::load(&journal_path)?;
        // Source vanished before replay: nothing to move.
        log.defer(PendingOp::Move {
            from: root.join("mods/gone.jar"),
            to: root.join("mods/42-gone.jar"),
        })?;
        // Staged bytes were tampered with: discard instead of promoting.
        tokio::fs::write(root.join("tampered.tmp"), b"evil").await?;
        log.defer(PendingOp::Replace {
            live: root.join("mods/live.jar"),
            staged: root.join("tampered.tmp"),
            checksum: Some(hash::sha256_bytes(b"expected")),
        })?;

        let report = log.replay().await?;
        assert_eq!(report.obsolete, 2);
        assert_eq!(report.completed, 0);
        assert!(!root.join("mods/42-gone.jar").exists());
        assert!(!root.join("mods/live.jar").exists());
        assert!(!root.join("tampered.tmp").exists());
        assert!(!journal_path.exists());

        let _ = tokio::fs::remove_dir_all(root).await;
        Ok(())
    }
}
