use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::models::manifest::{ModEntry, RemoteConfig};
use crate::models::version::Version;
use crate::services::download::Downloader;
use crate::services::executor::{Executor, RunReport};
use crate::services::filename::{self, NameHints};
use crate::services::manifest::{verify_set, ManifestLoader};
use crate::services::metadata::MetadataStore;
use crate::services::pending_ops::{PendingOpsLog, ReplayReport};
use crate::services::planner::{self, PlannerContext, PlannerOptions, ResolvedMod};
use crate::services::progress::{AutoConfirm, LogSink, PlanConfirmer, ProgressSink};
use crate::services::resolver::SourceResolver;
use crate::services::version_state::VersionState;

/// Well-known paths of the managed tree, all relative to the game root.
#[derive(Debug, Clone)]
pub struct EnginePaths {
    pub root: PathBuf,
}

impl EnginePaths {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config").join("ModUpdater")
    }

    pub fn local_config(&self) -> PathBuf {
        self.config_dir().join("config.json")
    }

    pub fn version_file(&self) -> PathBuf {
        self.config_dir().join("modpack_version.json")
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.config_dir().join("mod_metadata.json")
    }

    pub fn pending_ops_file(&self) -> PathBuf {
        self.config_dir().join("pending-update-ops.json")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("modupdater").join("tmp")
    }

    pub fn backup_root(&self) -> PathBuf {
        self.root.join("modupdater").join("backup")
    }
}

/// `config/ModUpdater/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default)]
    pub remote_config_url: String,
}

/// What a completed `run_update` call did.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// Applied version already satisfies the target.
    UpToDate { version: Version },
    /// The host's confirmer rejected the plan; nothing was changed.
    Declined,
    /// The plan ran to completion and the version marker was promoted.
    Applied { version: Version, report: RunReport },
}

/// The update engine: explicit state passed into the planner and executor,
/// with the two startup hooks the host calls in its chosen lifecycle stage.
pub struct UpdateEngine {
    paths: EnginePaths,
    sink: Arc<dyn ProgressSink>,
    confirmer: Arc<dyn PlanConfirmer>,
    planner_options: PlannerOptions,
}

impl UpdateEngine {
    pub fn new(root: &Path) -> Self {
        Self {
            paths: EnginePaths::new(root),
            sink: Arc::new(LogSink::new()),
            confirmer: Arc::new(AutoConfirm),
            planner_options: PlannerOptions::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_confirmer(mut self, confirmer: Arc<dyn PlanConfirmer>) -> Self {
        self.confirmer = confirmer;
        self
    }

    pub fn with_planner_options(mut self, options: PlannerOptions) -> Self {
        self.planner_options = options;
        self
    }

    pub fn paths(&self) -> &EnginePaths {
        &self.paths
    }

    /// First startup hook: replay the pending-ops journal from the previous
    /// run before anything else opens the affected files.
    pub async fn replay_pending(&self) -> AppResult<ReplayReport> {
        let mut pending = PendingOpsLog::load(&self.paths.pending_ops_file())?;
        if pending.is_empty() {
            return Ok(ReplayReport::default());
        }
        self.sink.log(&format!(
            "replaying {} pending operation(s) from the previous run",
            pending.ops().len()
        ));
        let report = pending.replay().await?;
        if report.remaining > 0 {
            self.sink.log(&format!(
                "{} operation(s) still locked, will retry next start",
                report.remaining
            ));
        }
        Ok(report)
    }

    /// Second startup hook: reconcile the local tree with the remote
    /// manifests and apply the resulting plan.
    pub async fn run_update(&self) -> AppResult<UpdateOutcome> {
        let local = self.load_local_config()?;
        let loader = ManifestLoader::new();

        self.sink.log("fetching remote configuration");
        let remote = loader.load_remote_config(&local.remote_config_url).await?;
        if remote.debug_mode {
            log::set_max_level(log::LevelFilter::Debug);
        }

        let version_state = VersionState::new(&self.paths.version_file());
        let applied = version_state.read();
        let target = remote.modpack_version.clone();

        if remote.check_current_version && applied >= target {
            self.sink
                .log(&format!("modpack {applied} is current, nothing to do"));
            return Ok(UpdateOutcome::UpToDate { version: applied });
        }
        self.sink
            .log(&format!("updating modpack {applied} -> {target}"));

        let mods = loader.load_mods(&remote).await?;
        let files = loader.load_files(&remote).await?;
        let deletes = loader.load_deletes(&remote).await?;

        let mut metadata = MetadataStore::load(&self.paths.metadata_file())?;
        let mut pending = PendingOpsLog::load(&self.paths.pending_ops_file())?;
        self.clean_staging(&pending).await?;

        let downloader = Downloader::new(remote.max_retries);
        let resolver = SourceResolver::new();
        let relevant = verify_set(&mods, &target);
        let resolved = self
            .resolve_mods(&downloader, &resolver, &relevant)
            .await?;

        let ctx = PlannerContext {
            root: &self.paths.root,
            metadata: &metadata,
            applied: &applied,
            target: &target,
        };
        let plan =
            planner::build_plan(&ctx, &resolved, &files, &deletes, &self.planner_options).await?;

        let summary = plan.summary();
        self.sink.log(&format!(
            "plan: {} new, {} updated, {} renamed, {} deleted, {} unchanged",
            summary.downloads, summary.updates, summary.renames, summary.deletes, summary.unchanged
        ));

        if !self.confirmer.confirm(&plan) {
            self.sink.log("update declined");
            return Ok(UpdateOutcome::Declined);
        }

        let report = self
            .execute(&remote, &plan, &mut metadata, &mut pending, &version_state)
            .await?;
        self.sink.set_progress(100);
        self.sink.close();

        Ok(UpdateOutcome::Applied {
            version: target,
            report,
        })
    }

    async fn execute(
        &self,
        remote: &RemoteConfig,
        plan: &crate::models::plan::Plan,
        metadata: &mut MetadataStore,
        pending: &mut PendingOpsLog,
        version_state: &VersionState,
    ) -> AppResult<RunReport> {
        let staging = self.paths.staging_dir();
        let backups = self.paths.backup_root();
        tokio::fs::create_dir_all(&staging).await?;
        tokio::fs::create_dir_all(&backups).await?;

        let mut executor = Executor {
            root: &self.paths.root,
            staging_dir: &staging,
            backup_root: &backups,
            downloader: Downloader::new(remote.max_retries),
            metadata,
            pending,
            version_state,
            sink: Arc::clone(&self.sink),
            backup_keep: remote.backup_keep,
        };
        executor.execute(plan).await
    }

    fn load_local_config(&self) -> AppResult<LocalConfig> {
        let path = self.paths.local_config();
        let raw = std::fs::read_to_string(&path).map_err(|_| {
            AppError::Config(format!("missing local config {}", path.display()))
        })?;
        let config: LocalConfig = serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("unreadable local config: {e}")))?;
        if config.remote_config_url.trim().is_empty() {
            return Err(AppError::Config(
                "remote_config_url is not set".to_string(),
            ));
        }
        Ok(config)
    }

    /// Resolve every relevant mod source up front, probing for naming hints
    /// and content length only when the declared name lacks an extension.
    async fn resolve_mods(
        &self,
        downloader: &Downloader,
        resolver: &SourceResolver,
        entries: &[&ModEntry],
    ) -> AppResult<Vec<ResolvedMod>> {
        let mut resolved = Vec::with_capacity(entries.len());
        for entry in entries {
            if self.sink.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let resolution = resolver.resolve(&entry.source).await;
            let mut hints = NameHints::default();
            let mut expected_len = None;

            if let Some(url) = resolution.url() {
                if needs_probes(entry, &resolution) {
                    match downloader.head(url).await {
                        Ok(info) => {
                            hints.content_type = info.content_type;
                            expected_len = info.content_length;
                        }
                        Err(e) => log::debug!("HEAD probe failed for {url}: {e}"),
                    }
                    hints.leading_bytes = downloader.probe_leading_bytes(url, 8).await;
                }
            }

            resolved.push(ResolvedMod {
                entry: (*entry).clone(),
                resolution,
                hints,
                expected_len,
            });
        }
        Ok(resolved)
    }

    /// Remove leftover staging files from an interrupted run, keeping any
    /// that a pending replace op still needs.
    async fn clean_staging(&self, pending: &PendingOpsLog) -> AppResult<()> {
        let staging = self.paths.staging_dir();
        let mut read_dir = match tokio::fs::read_dir(&staging).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let referenced: Vec<PathBuf> = pending
            .ops()
            .iter()
            .filter_map(|op| match op {
                crate::models::pending::PendingOp::Replace { staged, .. } => Some(staged.clone()),
                _ => None,
            })
            .collect();

        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if referenced.contains(&path) {
                continue;
            }
            log::debug!("removing stale staging file {}", path.display());
            let _ = tokio::fs::remove_file(&path).await;
        }
        Ok(())
    }
}

/// Probes are only worth a round trip when neither the declared name nor
/// the resolved URL yields a usable extension.
fn needs_probes(entry: &ModEntry, resolution: &crate::services::resolver::Resolution) -> bool {
    let stem = entry
        .file_name
        .as_deref()
        .or(resolution.file_name())
        .or(entry.display_name.as_deref());
    let Some(stem) = stem else {
        return false;
    };
    if filename::has_usable_extension(stem) {
        return false;
    }
    resolution
        .url()
        .and_then(filename::file_name_from_url)
        .map(|n| !filename::has_usable_extension(&n))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::manifest::ModSourceSpec;
    use crate::services::resolver::Resolution;

    fn temp_root(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("modupdater_test_{label}_{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn missing_local_config_is_a_config_error() {
        let root = temp_root("engine_noconfig");
        tokio::fs::create_dir_all(&root).await.unwrap();

        let engine = UpdateEngine::new(&root);
        let result = engine.run_update().await;
        match result {
            Err(AppError::Config(_)) => {}
            other => panic!("expected Config error, got {other:?}"),
        }

        let _ = tokio::fs::remove_dir_all(root).await;
    }

    #[tokio::test]
    async fn empty_remote_url_is_a_config_error() {
        let root = temp_root("engine_emptyurl");
        let engine = UpdateEngine::new(&root);
        tokio::fs::create_dir_all(engine.paths().config_dir())
            .await
            .unwrap();
        tokio::fs::write(
            engine.paths().local_config(),
            br#"{ "remote_config_url": "" }"#,
        )
        .await
        .unwrap();

        match engine.run_update().await {
            Err(e @ AppError::Config(_)) => assert_eq!(e.exit_code(), 2),
            other => panic!("expected Config error, got {other:?}"),
        }

        let _ = tokio::fs::remove_dir_all(root).await;
    }

    #[tokio::test]
    async fn replay_with_no_journal_is_a_no_op() -> AppResult<()> {
        let root = temp_root("engine_noreplay");
        tokio::fs::create_dir_all(&root).await?;

        let engine = UpdateEngine::new(&root);
        let report = engine.replay_pending().await?;
        assert_eq!(report, ReplayReport::default());

        let _ = tokio::fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn clean_staging_preserves_files_referenced_by_pending_ops() -> AppResult<()> {
        let root = temp_root("engine_cleanstage");
        let engine = UpdateEngine::new(&root);
        let staging = engine.paths().staging_dir();
        tokio::fs::create_dir_all(&staging).await?;
        tokio::fs::create_dir_all(engine.paths().config_dir()).await?;

        let keep = staging.join("42-foo.jar-abc.tmp");
        let stale = staging.join("9-bar.jar-def.tmp");
        tokio::fs::write(&keep, b"keep").await?;
        tokio::fs::write(&stale, b"stale").await?;

        let mut pending = PendingOpsLog::load(&engine.paths().pending_ops_file())?;
        pending.defer(crate::models::pending::PendingOp::Replace {
            live: root.join("mods/42-foo.jar"),
            staged: keep.clone(),
            checksum: None,
        })?;

        engine.clean_staging(&pending).await?;

        assert!(keep.exists());
        assert!(!stale.exists());

        let _ = tokio::fs::remove_dir_all(root).await;
        Ok(())
    }

    #[test]
    fn probes_are_skipped_when_names_are_complete() {
        let entry = ModEntry {
            number_id: "42".into(),
            display_name: None,
            file_name: Some("foo.jar".into()),
            source: ModSourceSpec::Url("https://dl.example/foo".into()),
            install_location: "mods".into(),
            hash: None,
            since: Version::zero(),
        };
        let resolution = Resolution::Resolved {
            url: "https://dl.example/foo".into(),
            file_name: None,
        };
        assert!(!needs_probes(&entry, &resolution));

        let bare = ModEntry {
            file_name: Some("foo".into()),
            ..entry
        };
        assert!(needs_probes(&bare, &resolution));
    }
}
