use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::errors::AppResult;
use crate::models::manifest::{DeleteEntry, FileEntry, ModEntry};
use crate::models::plan::{ActionKind, DownloadSpec, Plan, PlannedAction, RecordSpec};
use crate::models::version::Version;
use crate::services::filename::{self, NameHints};
use crate::services::hash;
use crate::services::manifest::{apply_range, verify_set};
use crate::services::metadata::MetadataStore;
use crate::services::resolver::Resolution;

/// Which filter feeds delete planning. `VerifySet` (the default) replays
/// every delete applicable through the target version so migrations converge
/// even when version bookkeeping is lossy; `ApplyRange` keeps the strict
/// upgrade-window semantics for external tooling that depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    #[default]
    VerifySet,
    ApplyRange,
}

#[derive(Debug, Clone, Default)]
pub struct PlannerOptions {
    pub delete_policy: DeletePolicy,
}

/// A manifest mod entry with its source already resolved and any naming
/// probes already gathered. Resolution happens before planning so the
/// planner itself touches only the local filesystem.
#[derive(Debug, Clone)]
pub struct ResolvedMod {
    pub entry: ModEntry,
    pub resolution: Resolution,
    pub hints: NameHints,
    /// Content length from a HEAD probe, when one was made.
    pub expected_len: Option<u64>,
}

/// Inputs the planner reconciles against the filesystem.
pub struct PlannerContext<'a> {
    pub root: &'a Path,
    pub metadata: &'a MetadataStore,
    pub applied: &'a Version,
    pub target: &'a Version,
}

impl PlannerContext<'_> {
    fn upgrading(&self) -> bool {
        self.applied < self.target
    }
}

/// Produce the ordered plan: deletes first, then files, then mods, manifest
/// order preserved within each category.
pub async fn build_plan(
    ctx: &PlannerContext<'_>,
    mods: &[ResolvedMod],
    files: &[FileEntry],
    deletes: &[DeleteEntry],
    options: &PlannerOptions,
) -> AppResult<Plan> {
    let mut plan = Plan::new(ctx.target.clone());

    plan_deletes(ctx, deletes, options, &mut plan.actions).await?;
    plan_obsolete_mods(ctx, mods, &mut plan.actions);

    for entry in verify_set(files, ctx.target) {
        if let Some(action) = plan_file(ctx, entry).await? {
            plan.actions.push(action);
        }
    }

    for resolved in mods {
        if resolved.entry.since > *ctx.target {
            continue;
        }
        if let Some(action) = plan_mod(ctx, resolved).await? {
            plan.actions.push(action);
        }
    }

    Ok(plan)
}

// --- Delete planning ---

async fn plan_deletes(
    ctx: &PlannerContext<'_>,
    deletes: &[DeleteEntry],
    options: &PlannerOptions,
    actions: &mut Vec<PlannedAction>,
) -> AppResult<()> {
    let selected: Vec<&DeleteEntry> = match options.delete_policy {
        DeletePolicy::VerifySet => verify_set(deletes, ctx.target),
        DeletePolicy::ApplyRange => apply_range(deletes, ctx.applied, ctx.target),
    };

    for entry in selected {
        for rel in &entry.paths {
            let path = ctx.root.join(rel);
            if tokio::fs::try_exists(&path).await? {
                actions.push(delete_action(rel.clone(), path, false, None));
            }
        }
        for rel in &entry.folders {
            let path = ctx.root.join(rel);
            if tokio::fs::try_exists(&path).await? {
                actions.push(delete_action(rel.clone(), path, true, None));
            }
        }
    }
    Ok(())
}

/// Installed mods whose `numberId` is recorded in metadata but absent from
/// the current manifest are removed. Files the metadata does not reference
/// are not ours to touch.
fn plan_obsolete_mods(
    ctx: &PlannerContext<'_>,
    mods: &[ResolvedMod],
    actions: &mut Vec<PlannedAction>,
) {
    let manifest_ids: HashSet<&str> = mods
        .iter()
        .map(|m| m.entry.number_id.as_str())
        .filter(|id| !id.is_empty())
        .collect();

    let mut install_dirs: Vec<String> = mods
        .iter()
        .map(|m| m.entry.install_location.clone())
        .collect();
    install_dirs.push("mods".to_string());
    install_dirs.sort();
    install_dirs.dedup();

    for (number_id, record) in ctx.metadata.mods() {
        if manifest_ids.contains(number_id.as_str()) {
            continue;
        }
        let live = install_dirs
            .iter()
            .map(|dir| ctx.root.join(dir).join(&record.file_name))
            .find(|p| p.exists());

        let record_spec = Some(RecordSpec::RemoveMod {
            number_id: number_id.clone(),
        });
        match live {
            Some(path) => actions.push(PlannedAction {
                kind: ActionKind::Delete,
                label: record.file_name.clone(),
                target: path.clone(),
                existing: Some(path),
                download: None,
                record: record_spec,
                reason: format!("mod {number_id} is no longer in the manifest"),
                recursive: false,
            }),
            // Stale record: the file is already gone, reconcile metadata only.
            None => actions.push(PlannedAction {
                kind: ActionKind::Delete,
                label: record.file_name.clone(),
                target: ctx.root.join("mods").join(&record.file_name),
                existing: None,
                download: None,
                record: record_spec,
                reason: format!("stale metadata record for mod {number_id}"),
                recursive: false,
            }),
        }
    }
}

fn delete_action(
    label: String,
    path: PathBuf,
    recursive: bool,
    record: Option<RecordSpec>,
) -> PlannedAction {
    PlannedAction {
        kind: ActionKind::Delete,
        label,
        target: path.clone(),
        existing: Some(path),
        download: None,
        record,
        reason: "listed in the deletes manifest".to_string(),
        recursive,
    }
}

// --- Mod planning ---

async fn plan_mod(
    ctx: &PlannerContext<'_>,
    resolved: &ResolvedMod,
) -> AppResult<Option<PlannedAction>> {
    let entry = &resolved.entry;
    let Some(final_name) = final_mod_name(entry, &resolved.resolution, &resolved.hints) else {
        log::warn!(
            "skipping mod entry {:?}: no filename, display name or resolvable source",
            entry.label()
        );
        return Ok(None);
    };

    let install_dir = ctx.root.join(&entry.install_location);
    let target = install_dir.join(&final_name);
    let manifest_hash = entry.hash.as_deref();
    let fingerprint = entry.source.fingerprint();

    let decision = decide_mod(ctx, resolved, &install_dir, &final_name, &target).await?;

    let action = match decision {
        ModDecision::NoAction { disk_hash } => PlannedAction {
            kind: ActionKind::NoAction,
            label: entry.label().to_string(),
            target,
            existing: None,
            download: None,
            record: Some(mod_record(
                entry,
                &final_name,
                manifest_hash.map(str::to_string).or(disk_hash),
                &fingerprint,
            )),
            reason: "installed and up to date".to_string(),
            recursive: false,
        },
        ModDecision::Rename { from, disk_hash } => PlannedAction {
            kind: ActionKind::Rename,
            label: entry.label().to_string(),
            target,
            existing: Some(from),
            download: None,
            record: Some(mod_record(
                entry,
                &final_name,
                manifest_hash.map(str::to_string).or(disk_hash),
                &fingerprint,
            )),
            reason: "existing file matches, canonicalizing filename".to_string(),
            recursive: false,
        },
        ModDecision::Download { replacing, fresh } => {
            let Some(url) = resolved.resolution.url() else {
                log::warn!("skipping mod {}: source did not resolve", entry.label());
                return Ok(Some(PlannedAction {
                    kind: ActionKind::Skip,
                    label: entry.label().to_string(),
                    target,
                    existing: None,
                    download: None,
                    record: None,
                    reason: "source did not resolve to a download".to_string(),
                    recursive: false,
                }));
            };
            PlannedAction {
                kind: if fresh {
                    ActionKind::NewDownload
                } else {
                    ActionKind::Update
                },
                label: entry.label().to_string(),
                target,
                existing: replacing,
                download: Some(DownloadSpec {
                    url: url.to_string(),
                    expected_hash: manifest_hash.map(str::to_string),
                    expected_len: resolved.expected_len,
                    extract: false,
                    overwrite: true,
                }),
                record: Some(mod_record(
                    entry,
                    &final_name,
                    manifest_hash.map(str::to_string),
                    &fingerprint,
                )),
                reason: if fresh {
                    "not installed yet".to_string()
                } else {
                    "installed copy differs from the manifest".to_string()
                },
                recursive: false,
            }
        }
    };

    Ok(Some(action))
}

enum ModDecision {
    NoAction {
        disk_hash: Option<String>,
    },
    Rename {
        from: PathBuf,
        disk_hash: Option<String>,
    },
    Download {
        /// On-disk file being superseded (backed up, removed after the swap).
        replacing: Option<PathBuf>,
        /// True for a first install, false for an update.
        fresh: bool,
    },
}

async fn decide_mod(
    ctx: &PlannerContext<'_>,
    resolved: &ResolvedMod,
    install_dir: &Path,
    final_name: &str,
    target: &Path,
) -> AppResult<ModDecision> {
    let entry = &resolved.entry;
    let manifest_hash = entry.hash.as_deref();

    // Metadata-driven path: the numberId is known.
    if let Some(record) = ctx.metadata.mod_record(&entry.number_id) {
        let record = record.clone();
        let hashes_agree = match (record.hash.as_deref(), manifest_hash) {
            (Some(recorded), Some(wanted)) => hash::hashes_match(recorded, wanted),
            // No hash in the manifest: identity holds unless the source moved.
            (_, None) => record.source == entry.source.fingerprint(),
            (None, Some(_)) => false,
        };

        if !hashes_agree {
            let recorded_path = install_dir.join(&record.file_name);
            let replacing = recorded_path.exists().then_some(recorded_path);
            return Ok(ModDecision::Download {
                replacing,
                fresh: false,
            });
        }

        let recorded_path = install_dir.join(&record.file_name);
        if recorded_path.exists() {
            if record.file_name != final_name {
                let still_matches = match manifest_hash {
                    Some(wanted) => {
                        let disk = hash::sha256_file(&recorded_path).await?;
                        hash::hashes_match(&disk, wanted)
                    }
                    None => true,
                };
                if still_matches {
                    return Ok(ModDecision::Rename {
                        from: recorded_path,
                        disk_hash: record.hash.clone(),
                    });
                }
                return Ok(ModDecision::Download {
                    replacing: Some(recorded_path),
                    fresh: false,
                });
            }
            return Ok(ModDecision::NoAction {
                disk_hash: record.hash.clone(),
            });
        }

        // Recorded file is missing; a sibling may hold the expected bytes.
        if let Some(wanted) = manifest_hash {
            if let Some(found) = ctx
                .metadata
                .find_file_by_hash(install_dir, wanted, Some(&entry.number_id))
                .await?
            {
                if found != target {
                    return Ok(ModDecision::Rename {
                        from: found,
                        disk_hash: Some(wanted.to_string()),
                    });
                }
                return Ok(ModDecision::NoAction {
                    disk_hash: Some(wanted.to_string()),
                });
            }
        }
        return Ok(ModDecision::Download {
            replacing: None,
            fresh: false,
        });
    }

    // No metadata: look for a file carrying the ownership prefix.
    if !entry.number_id.is_empty() {
        if let Some(found) = find_by_prefix(install_dir, &entry.number_id, final_name).await? {
            let disk = hash::sha256_file(&found).await?;
            match manifest_hash {
                Some(wanted) if !hash::hashes_match(&disk, wanted) => {
                    return Ok(ModDecision::Download {
                        replacing: Some(found),
                        fresh: false,
                    });
                }
                _ => {
                    let name_matches = found
                        .file_name()
                        .map(|n| n.to_string_lossy().as_ref() == final_name)
                        .unwrap_or(false);
                    if name_matches {
                        return Ok(ModDecision::NoAction {
                            disk_hash: Some(disk),
                        });
                    }
                    return Ok(ModDecision::Rename {
                        from: found,
                        disk_hash: Some(disk),
                    });
                }
            }
        }
    }

    // No prefix match: is something already sitting at the final name?
    if target.exists() {
        match manifest_hash {
            Some(wanted) => {
                let disk = hash::sha256_file(target).await?;
                if hash::hashes_match(&disk, wanted) {
                    return Ok(ModDecision::NoAction {
                        disk_hash: Some(disk),
                    });
                }
                return Ok(ModDecision::Download {
                    replacing: Some(target.to_path_buf()),
                    fresh: false,
                });
            }
            None => {
                let disk = hash::sha256_file(target).await?;
                return Ok(ModDecision::NoAction {
                    disk_hash: Some(disk),
                });
            }
        }
    }

    // Nothing at the target; a user-renamed copy may still exist.
    if let Some(wanted) = manifest_hash {
        if let Some(found) = ctx
            .metadata
            .find_file_by_hash(install_dir, wanted, Some(&entry.number_id))
            .await?
        {
            return Ok(ModDecision::Rename {
                from: found,
                disk_hash: Some(wanted.to_string()),
            });
        }
    }

    Ok(ModDecision::Download {
        replacing: None,
        fresh: true,
    })
}

/// Canonical on-disk name for a mod entry, or `None` when the manifest
/// offers no name-producing hint at all.
pub fn final_mod_name(
    entry: &ModEntry,
    resolution: &Resolution,
    hints: &NameHints,
) -> Option<String> {
    let stem = entry
        .file_name
        .clone()
        .or_else(|| resolution.file_name().map(str::to_string))
        .or_else(|| entry.display_name.as_deref().map(filename::sanitize_name))
        .filter(|s| !s.is_empty())?;

    let with_ext = filename::ensure_extension(&stem, resolution.url(), hints);
    Some(filename::apply_number_id_prefix(&entry.number_id, &with_ext))
}

/// First file in `dir` named `<numberId>-*`, preferring an exact match on
/// `final_name`, then lexicographic order for determinism.
async fn find_by_prefix(
    dir: &Path,
    number_id: &str,
    final_name: &str,
) -> AppResult<Option<PathBuf>> {
    let prefix = format!("{number_id}-");
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut candidates: Vec<String> = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&prefix) {
            candidates.push(name);
        }
    }

    if candidates.iter().any(|n| n.as_str() == final_name) {
        return Ok(Some(dir.join(final_name)));
    }
    candidates.sort();
    Ok(candidates.first().map(|n| dir.join(n)))
}

fn mod_record(
    entry: &ModEntry,
    final_name: &str,
    hash: Option<String>,
    fingerprint: &str,
) -> RecordSpec {
    RecordSpec::Mod {
        number_id: entry.number_id.clone(),
        file_name: final_name.to_string(),
        hash,
        fingerprint: fingerprint.to_string(),
    }
}

// --- File planning ---

async fn plan_file(
    ctx: &PlannerContext<'_>,
    entry: &FileEntry,
) -> AppResult<Option<PlannedAction>> {
    let Some(stem) = entry
        .file_name
        .clone()
        .or_else(|| filename::file_name_from_url(&entry.url))
        .filter(|s| !s.is_empty())
    else {
        log::warn!("skipping file entry with no derivable name: {}", entry.url);
        return Ok(None);
    };

    let final_name = filename::ensure_extension(&stem, Some(&entry.url), &NameHints::default());
    let download_dir = entry.download_path.trim_matches('/');
    let key = if download_dir.is_empty() {
        final_name.clone()
    } else {
        format!("{download_dir}/{final_name}")
    };
    let target = ctx.root.join(download_dir).join(&final_name);
    let manifest_hash = entry.hash.as_deref();

    let record = RecordSpec::File {
        key: key.clone(),
        url: entry.url.clone(),
        download_path: entry.download_path.clone(),
        hash: manifest_hash.map(str::to_string),
    };
    let download = DownloadSpec {
        url: entry.url.clone(),
        expected_hash: manifest_hash.map(str::to_string),
        expected_len: None,
        extract: entry.extract && final_name.to_ascii_lowercase().ends_with(".zip"),
        overwrite: entry.overwrite,
    };

    let exists = target.exists();
    let known = ctx.metadata.file_record(&key).cloned();

    let action = match (known, exists) {
        (Some(known_record), true) => {
            let disk = hash::sha256_file(&target).await?;
            let unchanged_since_install = known_record
                .hash
                .as_deref()
                .map(|recorded| hash::hashes_match(&disk, recorded))
                .unwrap_or(true);

            if unchanged_since_install {
                let manifest_differs = manifest_hash
                    .map(|wanted| !hash::hashes_match(&disk, wanted))
                    .unwrap_or(false);
                if ctx.upgrading() && entry.overwrite && manifest_differs {
                    update_file_action(entry, target, record, download)
                } else {
                    file_action(
                        ActionKind::NoAction,
                        entry,
                        target,
                        record_with_hash(record, Some(disk)),
                        "installed and up to date",
                    )
                }
            } else {
                // User-edited since install: fall back to the no-metadata table.
                decide_unrecorded_file(entry, target, disk, record, download)
            }
        }
        (Some(_), false) => update_file_action(entry, target, record, download),
        (None, true) => {
            let disk = hash::sha256_file(&target).await?;
            decide_unrecorded_file(entry, target, disk, record, download)
        }
        (None, false) => PlannedAction {
            kind: ActionKind::NewDownload,
            label: final_name.clone(),
            target,
            existing: None,
            download: Some(download),
            record: Some(record),
            reason: "not installed yet".to_string(),
            recursive: false,
        },
    };

    Ok(Some(action))
}

fn decide_unrecorded_file(
    entry: &FileEntry,
    target: PathBuf,
    disk_hash: String,
    record: RecordSpec,
    download: DownloadSpec,
) -> PlannedAction {
    match entry.hash.as_deref() {
        Some(wanted) if hash::hashes_match(&disk_hash, wanted) => file_action(
            ActionKind::NoAction,
            entry,
            target,
            record_with_hash(record, Some(disk_hash)),
            "existing file already matches",
        ),
        Some(_) => update_file_action(entry, target, record, download),
        None if !entry.overwrite => file_action(
            ActionKind::Skip,
            entry,
            target,
            record_with_hash(record, Some(disk_hash)),
            "existing file kept, overwrite disabled",
        ),
        None => file_action(
            ActionKind::NoAction,
            entry,
            target,
            record_with_hash(record, Some(disk_hash)),
            "existing file adopted",
        ),
    }
}

fn update_file_action(
    entry: &FileEntry,
    target: PathBuf,
    record: RecordSpec,
    download: DownloadSpec,
) -> PlannedAction {
    PlannedAction {
        kind: ActionKind::Update,
        label: file_label(entry, &target),
        existing: Some(target.clone()),
        target,
        download: Some(download),
        record: Some(record),
        reason: "installed copy differs from the manifest".to_string(),
        recursive: false,
    }
}

fn file_action(
    kind: ActionKind,
    entry: &FileEntry,
    target: PathBuf,
    record: RecordSpec,
    reason: &str,
) -> PlannedAction {
    PlannedAction {
        kind,
        label: file_label(entry, &target),
        target,
        existing: None,
        download: None,
        record: Some(record),
        reason: reason.to_string(),
        recursive: false,
    }
}

fn file_label(entry: &FileEntry, target: &Path) -> String {
    entry
        .file_name
        .clone()
        .unwrap_or_else(|| target.file_name().unwrap_or_default().to_string_lossy().to_string())
}

fn record_with_hash(record: RecordSpec, disk_hash: Option<String>) -> RecordSpec {
    match record {
        RecordSpec::File {
            key,
            url,
            download_path,
            hash,
        } => RecordSpec::File {
            key,
            url,
            download_path,
            hash: disk_hash.or(hash),
        },
        other => other,
    }
}
