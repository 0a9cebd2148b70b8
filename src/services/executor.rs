use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;

use crate::errors::{AppError, AppResult};
use crate::models::pending::PendingOp;
use crate::models::plan::{ActionKind, Plan, PlannedAction, RecordSpec};
use crate::services::download::{Downloader, StageRequest, StagedFile};
use crate::services::fsops;
use crate::services::metadata::{FileRecord, MetadataStore, ModRecord};
use crate::services::pending_ops::PendingOpsLog;
use crate::services::progress::ProgressSink;
use crate::services::version_state::VersionState;

const ATOMIC_MOVE_RETRIES: u32 = 3;

/// Terminal state of one executed action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Done,
    /// Locked; the op went into the pending journal for the next startup.
    Deferred,
    /// Entry could not be acted on (unresolved source); nothing changed.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ActionReport {
    pub kind: ActionKind,
    pub label: String,
    pub target: PathBuf,
    pub outcome: ActionOutcome,
}

/// What happened during a run. A run that returns this struct committed;
/// failures abort with an error instead.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub actions: Vec<ActionReport>,
    pub backup_dir: Option<PathBuf>,
}

impl RunReport {
    pub fn deferred(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.outcome == ActionOutcome::Deferred)
            .count()
    }
}

/// Executes a plan strictly in order: stage → verify → backup → swap, with
/// locked files deferred into the pending journal and the applied-version
/// marker written only after every action settled.
pub struct Executor<'a> {
    pub root: &'a Path,
    pub staging_dir: &'a Path,
    pub backup_root: &'a Path,
    pub downloader: Downloader,
    pub metadata: &'a mut MetadataStore,
    pub pending: &'a mut PendingOpsLog,
    pub version_state: &'a VersionState,
    pub sink: Arc<dyn ProgressSink>,
    pub backup_keep: usize,
}

impl Executor<'_> {
    pub async fn execute(&mut self, plan: &Plan) -> AppResult<RunReport> {
        let mut report = RunReport::default();
        let total = plan.actions.len().max(1);

        let run_dir = if plan.actions.iter().any(|a| a.is_mutation()) {
            let dir = self
                .backup_root
                .join(Local::now().format("%Y%m%d-%H%M%S").to_string());
            tokio::fs::create_dir_all(&dir).await?;
            report.backup_dir = Some(dir.clone());
            Some(dir)
        } else {
            None
        };

        // Downloads are staged and verified up front with bounded
        // parallelism; swaps below still happen strictly in plan order.
        let mut staged = self.stage_downloads(plan).await?;

        for (idx, action) in plan.actions.iter().enumerate() {
            if self.sink.is_cancelled() {
                self.discard_staged(&mut staged).await;
                return Err(AppError::Cancelled);
            }

            let outcome = match action.kind {
                ActionKind::Delete => self.run_delete(action, run_dir.as_deref()).await?,
                ActionKind::Rename => self.run_rename(action, run_dir.as_deref()).await?,
                ActionKind::NewDownload | ActionKind::Update => {
                    let staged_file = staged.remove(&idx).ok_or_else(|| {
                        AppError::Custom(format!(
                            "no staged artifact for {}",
                            action.target.display()
                        ))
                    })?;
                    self.run_swap(action, staged_file, run_dir.as_deref()).await?
                }
                ActionKind::Skip => {
                    if let Some(ref record) = action.record {
                        self.apply_record(record, None);
                        ActionOutcome::Done
                    } else {
                        ActionOutcome::Skipped
                    }
                }
                ActionKind::NoAction | ActionKind::Deferred => {
                    if let Some(ref record) = action.record {
                        self.apply_record(record, None);
                    }
                    ActionOutcome::Done
                }
            };

            self.sink
                .set_progress((((idx + 1) * 100) / total).min(100) as u8);
            report.actions.push(ActionReport {
                kind: action.kind,
                label: action.label.clone(),
                target: action.target.clone(),
                outcome,
            });
        }

        self.commit(plan).await?;
        Ok(report)
    }

    // --- Per-kind handlers ---

    async fn run_delete(
        &mut self,
        action: &PlannedAction,
        run_dir: Option<&Path>,
    ) -> AppResult<ActionOutcome> {
        let Some(ref live) = action.existing else {
            // Stale record cleanup: nothing on disk, only metadata changes.
            if let Some(ref record) = action.record {
                self.apply_record(record, None);
            }
            return Ok(ActionOutcome::Done);
        };

        if tokio::fs::try_exists(live).await? {
            self.backup(run_dir, live)?;
        }

        let result = if action.recursive {
            fsops::safe_remove_dir_all(self.root, live).await
        } else {
            fsops::remove_file(live).await
        };

        let outcome = match result {
            Ok(()) => {
                self.sink.log(&format!("deleted {}", action.label));
                ActionOutcome::Done
            }
            Err(AppError::Locked(path)) => {
                self.pending.defer(PendingOp::Delete { path })?;
                self.sink
                    .log(&format!("{} is in use, delete deferred to next start", action.label));
                ActionOutcome::Deferred
            }
            Err(e) => return Err(e),
        };

        if let Some(ref record) = action.record {
            self.apply_record(record, None);
        }
        Ok(outcome)
    }

    async fn run_rename(
        &mut self,
        action: &PlannedAction,
        run_dir: Option<&Path>,
    ) -> AppResult<ActionOutcome> {
        let Some(ref from) = action.existing else {
            return Err(AppError::Custom(format!(
                "rename without a source for {}",
                action.target.display()
            )));
        };

        self.backup(run_dir, from)?;

        let outcome = match fsops::atomic_move(from, &action.target, ATOMIC_MOVE_RETRIES).await {
            Ok(()) => {
                self.sink.log(&format!(
                    "renamed {} -> {}",
                    from.display(),
                    action.target.display()
                ));
                ActionOutcome::Done
            }
            Err(AppError::Locked(_)) => {
                self.pending.defer(PendingOp::Move {
                    from: from.clone(),
                    to: action.target.clone(),
                })?;
                self.sink
                    .log(&format!("{} is in use, rename deferred to next start", action.label));
                ActionOutcome::Deferred
            }
            Err(e) => return Err(e),
        };

        if let Some(ref record) = action.record {
            self.apply_record(record, None);
        }
        Ok(outcome)
    }

    async fn run_swap(
        &mut self,
        action: &PlannedAction,
        staged: StagedFile,
        run_dir: Option<&Path>,
    ) -> AppResult<ActionOutcome> {
        // Back up whatever this download supersedes.
        if let Some(ref replacing) = action.existing {
            if tokio::fs::try_exists(replacing).await? {
                self.backup(run_dir, replacing)?;
            }
        } else if tokio::fs::try_exists(&action.target).await? {
            self.backup(run_dir, &action.target)?;
        }

        let outcome = match fsops::atomic_move(&staged.path, &action.target, ATOMIC_MOVE_RETRIES)
            .await
        {
            Ok(()) => {
                // A superseded file under a different name is now garbage.
                if let Some(ref replacing) = action.existing {
                    if replacing != &action.target {
                        fsops::remove_file(replacing).await.unwrap_or_else(|e| {
                            log::warn!(
                                "could not remove superseded file {}: {e}",
                                replacing.display()
                            )
                        });
                    }
                }
                self.sink.log(&format!("installed {}", action.label));
                ActionOutcome::Done
            }
            Err(AppError::Locked(_)) => {
                // Leave the staged file in place; replay promotes it later.
                self.pending.defer(PendingOp::Replace {
                    live: action.target.clone(),
                    staged: staged.path.clone(),
                    checksum: Some(staged.hash.clone()),
                })?;
                self.sink
                    .log(&format!("{} is in use, replace deferred to next start", action.label));
                ActionOutcome::Deferred
            }
            Err(e) => return Err(e),
        };

        if outcome == ActionOutcome::Done {
            if let Some(ref spec) = action.download {
                if spec.extract {
                    if let Some(dest) = action.target.parent() {
                        self.sink.log(&format!("extracting {}", action.label));
                        fsops::extract_zip(&action.target, dest, spec.overwrite)?;
                    }
                }
            }
        }

        if let Some(ref record) = action.record {
            self.apply_record(record, Some(staged.hash));
        }
        Ok(outcome)
    }

    // --- Staging ---

    async fn stage_downloads(
        &mut self,
        plan: &Plan,
    ) -> AppResult<HashMap<usize, StagedFile>> {
        let mut indices = Vec::new();
        let mut requests = Vec::new();
        for (idx, action) in plan.actions.iter().enumerate() {
            if !matches!(action.kind, ActionKind::NewDownload | ActionKind::Update) {
                continue;
            }
            let Some(ref spec) = action.download else {
                return Err(AppError::Custom(format!(
                    "download action without a source for {}",
                    action.target.display()
                )));
            };
            let final_name = action
                .target
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "artifact".to_string());
            indices.push(idx);
            requests.push(StageRequest {
                url: spec.url.clone(),
                final_name,
                expected_hash: spec.expected_hash.clone(),
                expected_len: spec.expected_len,
            });
        }

        if requests.is_empty() {
            return Ok(HashMap::new());
        }

        self.sink
            .log(&format!("downloading {} artifact(s)", requests.len()));
        let results = self
            .downloader
            .stage_many(requests, self.staging_dir, &self.sink)
            .await;

        let mut staged = HashMap::new();
        let mut first_error = None;
        for (idx, result) in indices.into_iter().zip(results) {
            match result {
                Ok(file) => {
                    staged.insert(idx, file);
                }
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(_) => {}
            }
        }

        if let Some(e) = first_error {
            self.discard_staged(&mut staged).await;
            return Err(e);
        }
        Ok(staged)
    }

    async fn discard_staged(&self, staged: &mut HashMap<usize, StagedFile>) {
        for (_, file) in staged.drain() {
            let _ = tokio::fs::remove_file(&file.path).await;
        }
    }

    // --- Commit ---

    /// Only reached when every action settled as done or deferred: promote
    /// the applied-version marker, persist metadata, prune old backups.
    async fn commit(&mut self, plan: &Plan) -> AppResult<()> {
        self.version_state.write(&plan.target_version)?;
        self.metadata.persist()?;
        self.prune_backups().await?;
        self.sink.log(&format!(
            "modpack updated to version {}",
            plan.target_version
        ));
        Ok(())
    }

    async fn prune_backups(&self) -> AppResult<()> {
        let mut read_dir = match tokio::fs::read_dir(self.backup_root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }

        // Newest first by name: run dirs are timestamp-named.
        names.sort_by(|a, b| b.cmp(a));
        for stale in names.iter().skip(self.backup_keep) {
            let path = self.backup_root.join(stale);
            log::info!("pruning old backup {}", path.display());
            tokio::fs::remove_dir_all(&path).await?;
        }
        Ok(())
    }

    // --- Helpers ---

    fn backup(&self, run_dir: Option<&Path>, live: &Path) -> AppResult<()> {
        let Some(run_dir) = run_dir else {
            return Err(AppError::Custom(
                "backup requested outside a mutating run".to_string(),
            ));
        };
        fsops::backup_into(self.root, run_dir, live)?;
        Ok(())
    }

    fn apply_record(&mut self, record: &RecordSpec, staged_hash: Option<String>) {
        match record {
            RecordSpec::Mod {
                number_id,
                file_name,
                hash,
                fingerprint,
            } => {
                self.metadata.record_mod(
                    number_id,
                    ModRecord {
                        file_name: file_name.clone(),
                        hash: staged_hash.or_else(|| hash.clone()),
                        source: fingerprint.clone(),
                    },
                );
            }
            RecordSpec::File {
                key,
                url,
                download_path,
                hash,
            } => {
                self.metadata.record_file(
                    key,
                    FileRecord {
                        hash: staged_hash.or_else(|| hash.clone()),
                        url: url.clone(),
                        download_path: download_path.clone(),
                    },
                );
            }
            RecordSpec::RemoveMod { number_id } => {
                self.metadata.remove_mod(number_id);
            }
        }
    }
}
