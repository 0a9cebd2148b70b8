use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::errors::{AppError, AppResult};

/// True when an I/O error means the file is held open by another process
/// (Windows sharing/lock violations, Unix EBUSY/ETXTBSY). These are the
/// errors the executor defers instead of failing on.
pub fn is_lock_error(err: &io::Error) -> bool {
    match err.raw_os_error() {
        // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
        #[cfg(windows)]
        Some(32) | Some(33) => true,
        // EBUSY / ETXTBSY
        #[cfg(unix)]
        Some(16) | Some(26) => true,
        _ => {
            #[cfg(windows)]
            {
                err.kind() == io::ErrorKind::PermissionDenied
            }
            #[cfg(not(windows))]
            {
                let _ = err;
                false
            }
        }
    }
}

fn is_cross_device(err: &io::Error) -> bool {
    match err.raw_os_error() {
        // EXDEV
        #[cfg(unix)]
        Some(18) => true,
        // ERROR_NOT_SAME_DEVICE
        #[cfg(windows)]
        Some(17) => true,
        _ => false,
    }
}

/// Move `from` onto `to`, atomically where the OS allows.
///
/// Prefers the rename primitive; falls back to copy-then-remove across
/// filesystems. A locked target is retried `max_retries` times with linear
/// backoff, after which `AppError::Locked` is returned so the caller can
/// defer the op into the pending journal.
pub async fn atomic_move(from: &Path, to: &Path, max_retries: u32) -> AppResult<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match tokio::fs::rename(from, to).await {
            Ok(()) => return Ok(()),
            Err(e) if is_cross_device(&e) => {
                tokio::fs::copy(from, to).await?;
                tokio::fs::remove_file(from).await?;
                return Ok(());
            }
            Err(e) if is_lock_error(&e) && attempt <= max_retries => {
                log::warn!(
                    "target locked, retry {attempt}/{max_retries}: {}",
                    to.display()
                );
                tokio::time::sleep(Duration::from_millis(250 * attempt as u64)).await;
            }
            Err(e) if is_lock_error(&e) => return Err(AppError::Locked(to.to_path_buf())),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Unlink a file, mapping a lock into `AppError::Locked`.
pub async fn remove_file(path: &Path) -> AppResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) if is_lock_error(&e) => Err(AppError::Locked(path.to_path_buf())),
        Err(e) => Err(e.into()),
    }
}

/// Recursively delete a directory, but only when it is a proper child of
/// `root`. Guards against a manifest delete entry escaping the install tree.
pub async fn safe_remove_dir_all(root: &Path, path: &Path) -> AppResult<()> {
    let canonical_root = tokio::fs::canonicalize(root).await?;
    let canonical = match tokio::fs::canonicalize(path).await {
        Ok(p) => p,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if canonical == canonical_root || !canonical.starts_with(&canonical_root) {
        return Err(AppError::Custom(format!(
            "refusing to delete {} outside managed root {}",
            canonical.display(),
            canonical_root.display()
        )));
    }

    match tokio::fs::remove_dir_all(&canonical).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) if is_lock_error(&e) => Err(AppError::Locked(path.to_path_buf())),
        Err(e) => Err(e.into()),
    }
}

/// Copy `live` into the run's backup tree, preserving its path relative to
/// `root`. Directories are copied recursively.
pub fn backup_into(root: &Path, backup_run_dir: &Path, live: &Path) -> AppResult<PathBuf> {
    let rel = live.strip_prefix(root).unwrap_or(live);
    let dest = backup_run_dir.join(rel);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let meta = std::fs::metadata(live)?;
    if meta.is_dir() {
        copy_dir_sync(live, &dest)?;
    } else {
        std::fs::copy(live, &dest)?;
    }
    Ok(dest)
}

fn copy_dir_sync(src: &Path, dst: &Path) -> AppResult<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dest_path = dst.join(entry.file_name());

        if file_type.is_dir() {
            copy_dir_sync(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), &dest_path)?;
        }
    }
    Ok(())
}

/// Serialize `value` to a sibling `.tmp`, fsync, then rename over `path`.
/// Readers only ever observe whole-file snapshots.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    let data = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &data)
}

pub fn atomic_write_bytes(path: &Path, data: &[u8]) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Extract a ZIP archive into `dest`.
///
/// Entries whose canonical path would escape `dest` (zip-slip) are skipped
/// with a warning. Existing files are skipped unless `overwrite` is set.
pub fn extract_zip(zip_path: &Path, dest: &Path, overwrite: bool) -> AppResult<()> {
    let file = std::fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| AppError::Custom(format!("failed to open ZIP {}: {e}", zip_path.display())))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| AppError::Custom(format!("failed to read ZIP entry: {e}")))?;

        // Path traversal / absolute path guard.
        let Some(enclosed_path) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            log::warn!(
                "skipping ZIP entry with unsafe path: {}",
                entry.name().replace('\n', "\\n")
            );
            continue;
        };
        if entry.is_dir() {
            continue;
        }

        let out_path = dest.join(enclosed_path);
        if out_path.exists() && !overwrite {
            log::debug!("keeping existing file {}", out_path.display());
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut outfile = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut outfile)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("modupdater_test_{label}_{}", uuid::Uuid::new_v4()))
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) -> AppResult<()> {
        let file = std::fs::File::create(path)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(*name, options)
                .map_err(|e| AppError::Custom(format!("zip start_file failed: {e}")))?;
            zip.write_all(data)?;
        }
        zip.finish()
            .map_err(|e| AppError::Custom(format!("zip finish failed: {e}")))?;
        Ok(())
    }

    #[tokio::test]
    async fn atomic_move_replaces_target_in_place() -> AppResult<()> {
        let root = temp_path("atomic_move");
        tokio::fs::create_dir_all(&root).await?;

        let from = root.join("staged.tmp");
        let to = root.join("mods").join("live.jar");
        tokio::fs::write(&from, b"new bytes").await?;

        atomic_move(&from, &to, 3).await?;

        assert!(!from.exists());
        assert_eq!(tokio::fs::read(&to).await?, b"new bytes");

        let _ = tokio::fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn safe_remove_refuses_paths_outside_root() -> AppResult<()> {
        let root = temp_path("safe_remove_root");
        let outside = temp_path("safe_remove_outside");
        tokio::fs::create_dir_all(root.join("mods")).await?;
        tokio::fs::create_dir_all(&outside).await?;

        assert!(safe_remove_dir_all(&root, &outside).await.is_err());
        assert!(outside.exists(), "outside dir must be untouched");

        safe_remove_dir_all(&root, &root.join("mods")).await?;
        assert!(!root.join("mods").exists());

        let _ = tokio::fs::remove_dir_all(root).await;
        let _ = tokio::fs::remove_dir_all(outside).await;
        Ok(())
    }

    #[tokio::test]
    async fn safe_remove_refuses_the_root_itself() -> AppResult<()> {
        let root = temp_path("safe_remove_self");
        tokio::fs::create_dir_all(&root).await?;

        assert!(safe_remove_dir_all(&root, &root).await.is_err());
        assert!(root.exists());

        let _ = tokio::fs::remove_dir_all(root).await;
        Ok(())
    }

    #[test]
    fn extract_skips_traversal_entries() -> AppResult<()> {
        let root = temp_path("zip_slip");
        std::fs::create_dir_all(&root)?;

        let zip_path = root.join("pack.zip");
        write_zip(
            &zip_path,
            &[
                ("../../etc/evil", b"owned" as &[u8]),
                ("config/ok.toml", b"fine"),
            ],
        )?;

        let dest = root.join("config_target");
        extract_zip(&zip_path, &dest, false)?;

        assert!(dest.join("config/ok.toml").exists());
        assert!(!root.join("etc/evil").exists());
        assert!(!root.parent().unwrap().join("etc/evil").exists());

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }

    #[test]
    fn extract_keeps_existing_files_unless_overwrite() -> AppResult<()> {
        let root = temp_path("zip_overwrite");
        std::fs::create_dir_all(&root)?;

        let zip_path = root.join("pack.zip");
        write_zip(&zip_path, &[("settings.cfg", b"from-zip" as &[u8])])?;

        let dest = root.join("out");
        std::fs::create_dir_all(&dest)?;
        std::fs::write(dest.join("settings.cfg"), b"user-edited")?;

        extract_zip(&zip_path, &dest, false)?;
        assert_eq!(std::fs::read(dest.join("settings.cfg"))?, b"user-edited");

        extract_zip(&zip_path, &dest, true)?;
        assert_eq!(std::fs::read(dest.join("settings.cfg"))?, b"from-zip");

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }

    #[test]
    fn atomic_write_leaves_no_tmp_behind() -> AppResult<()> {
        let root = temp_path("atomic_write");
        std::fs::create_dir_all(&root)?;
        let path = root.join("meta.json");

        atomic_write_json(&path, &serde_json::json!({ "k": "v" }))?;

        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
        let parsed: serde_json::Value = serde_json::from_slice(&std::fs::read(&path)?)?;
        assert_eq!(parsed["k"], "v");

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }
}
