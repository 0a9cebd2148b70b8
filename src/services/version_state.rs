use std::path::{Path, PathBuf};

use crate::errors::AppResult;
use crate::models::version::Version;
use crate::services::fsops;

/// The applied modpack version marker: a one-line JSON string on disk.
///
/// Updated only after an entire plan succeeds; an interrupted run leaves the
/// previous marker intact so the next run re-plans against the old version.
pub struct VersionState {
    path: PathBuf,
}

impl VersionState {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Read the applied version. Missing or unreadable means `0.0.0`.
    /// Surrounding quotes on disk are tolerated.
    pub fn read(&self) -> Version {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                let unquoted = serde_json::from_str::<String>(raw.trim())
                    .unwrap_or_else(|_| raw.trim().to_string());
                Version::parse(&unquoted)
            }
            Err(_) => Version::zero(),
        }
    }

    /// Atomically write the marker as a JSON string.
    pub fn write(&self, version: &Version) -> AppResult<()> {
        let data = serde_json::to_vec(version.as_str())?;
        fsops::atomic_write_bytes(&self.path, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("modupdater_test_{label}_{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn missing_marker_reads_as_zero() {
        let state = VersionState::new(&temp_path("version_missing"));
        assert_eq!(state.read(), Version::zero());
    }

    #[test]
    fn write_then_read_is_identity() -> AppResult<()> {
        let root = temp_path("version_roundtrip");
        std::fs::create_dir_all(&root)?;
        let state = VersionState::new(&root.join("modpack_version.json"));

        state.write(&Version::parse("1.4.2"))?;
        assert_eq!(state.read(), Version::parse("1.4.2"));

        // On-disk form is a quoted JSON string.
        let raw = std::fs::read_to_string(root.join("modpack_version.json"))?;
        assert_eq!(raw.trim(), "\"1.4.2\"");

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }

    #[test]
    fn bare_unquoted_content_is_tolerated() -> AppResult<()> {
        let root = temp_path("version_bare");
        std::fs::create_dir_all(&root)?;
        let path = root.join("modpack_version.json");
        std::fs::write(&path, "1.2.3\n")?;

        let state = VersionState::new(&path);
        assert_eq!(state.read(), Version::parse("1.2.3"));

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }
}
