use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::version::Version;

/// What the executor should do for one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    NewDownload,
    Update,
    Rename,
    Delete,
    Skip,
    NoAction,
    /// Assigned by the executor when a lock forced the op into the journal.
    Deferred,
}

/// Download parameters attached to `NewDownload` / `Update` actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSpec {
    pub url: String,
    /// SHA-256 pinned by the manifest, verified after staging.
    pub expected_hash: Option<String>,
    /// Content length from a HEAD probe, verified after staging.
    pub expected_len: Option<u64>,
    /// Extract the artifact into the target directory after the swap.
    pub extract: bool,
    /// Overwrite existing files during extraction.
    pub overwrite: bool,
}

/// Metadata write the executor performs once the action commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "record")]
pub enum RecordSpec {
    Mod {
        number_id: String,
        file_name: String,
        /// Manifest hash when pinned; the executor substitutes the staged
        /// file's computed hash for downloads without one.
        hash: Option<String>,
        fingerprint: String,
    },
    File {
        /// downloadPath-relative key, e.g. `config/foo.toml`.
        key: String,
        url: String,
        download_path: String,
        hash: Option<String>,
    },
    RemoveMod {
        number_id: String,
    },
}

/// One ordered step of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedAction {
    pub kind: ActionKind,
    /// Human label for logs and the confirmation dialog.
    pub label: String,
    /// Final live path of the artifact.
    pub target: PathBuf,
    /// Current on-disk path when it differs from `target` (rename source,
    /// file being deleted).
    pub existing: Option<PathBuf>,
    pub download: Option<DownloadSpec>,
    pub record: Option<RecordSpec>,
    pub reason: String,
    /// `Delete` only: the target is a directory, removed recursively.
    #[serde(default)]
    pub recursive: bool,
}

impl PlannedAction {
    pub fn is_mutation(&self) -> bool {
        !matches!(self.kind, ActionKind::Skip | ActionKind::NoAction)
    }
}

/// Ordered list of planned actions for one run: deletes, then files, then
/// mods, manifest order preserved within each category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub target_version: Version,
    pub actions: Vec<PlannedAction>,
}

impl Plan {
    pub fn new(target_version: Version) -> Self {
        Self {
            target_version,
            actions: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.actions.iter().all(|a| !a.is_mutation())
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.actions {
            match action.kind {
                ActionKind::NewDownload => summary.downloads += 1,
                ActionKind::Update => summary.updates += 1,
                ActionKind::Rename => summary.renames += 1,
                ActionKind::Delete => summary.deletes += 1,
                ActionKind::Skip => summary.skips += 1,
                ActionKind::NoAction => summary.unchanged += 1,
                ActionKind::Deferred => {}
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanSummary {
    pub downloads: usize,
    pub updates: usize,
    pub renames: usize,
    pub deletes: usize,
    pub skips: usize,
    pub unchanged: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(kind: ActionKind) -> PlannedAction {
        PlannedAction {
            kind,
            label: "x".into(),
            target: PathBuf::from("mods/x.jar"),
            existing: None,
            download: None,
            record: None,
            reason: String::new(),
            recursive: false,
        }
    }

    #[test]
    fn noop_plan_contains_only_skips_and_no_actions() {
        let mut plan = Plan::new(Version::parse("1.0.0"));
        plan.actions.push(action(ActionKind::NoAction));
        plan.actions.push(action(ActionKind::Skip));
        assert!(plan.is_noop());

        plan.actions.push(action(ActionKind::Delete));
        assert!(!plan.is_noop());
    }

    #[test]
    fn summary_counts_by_kind() {
        let mut plan = Plan::new(Version::parse("1.0.0"));
        plan.actions.push(action(ActionKind::NewDownload));
        plan.actions.push(action(ActionKind::NewDownload));
        plan.actions.push(action(ActionKind::Rename));
        plan.actions.push(action(ActionKind::NoAction));

        let summary = plan.summary();
        assert_eq!(summary.downloads, 2);
        assert_eq!(summary.renames, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.deletes, 0);
    }
}
