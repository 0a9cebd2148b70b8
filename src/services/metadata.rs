use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::AppResult;
use crate::services::fsops;
use crate::services::hash;

pub const METADATA_FORMAT_VERSION: u32 = 1;

/// What the engine knows about one installed, identified mod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModRecord {
    /// On-disk filename inside the entry's install location.
    pub file_name: String,
    /// SHA-256 at install time.
    pub hash: Option<String>,
    /// Source fingerprint (URL, or `provider:ids`).
    pub source: String,
}

/// What the engine knows about one managed auxiliary file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub hash: Option<String>,
    pub url: String,
    pub download_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataDoc {
    version: u32,
    #[serde(default)]
    mods: BTreeMap<String, ModRecord>,
    #[serde(default)]
    files: BTreeMap<String, FileRecord>,
}

impl Default for MetadataDoc {
    fn default() -> Self {
        Self {
            version: METADATA_FORMAT_VERSION,
            mods: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }
}

/// Persistent `(numberId → record)` and `(file key → record)` store.
///
/// A single JSON document, read once at startup and rewritten at commit via
/// write-to-sibling + fsync + atomic rename.
pub struct MetadataStore {
    path: PathBuf,
    doc: MetadataDoc,
}

impl MetadataStore {
    /// Load from disk; a missing file is an empty store, not an error.
    pub fn load(path: &Path) -> AppResult<Self> {
        let doc = match std::fs::read(path) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                log::warn!("metadata file unreadable, starting fresh: {e}");
                MetadataDoc::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MetadataDoc::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            doc,
        })
    }

    pub fn persist(&self) -> AppResult<()> {
        fsops::atomic_write_json(&self.path, &self.doc)
    }

    // --- Mod records ---

    pub fn mod_record(&self, number_id: &str) -> Option<&ModRecord> {
        if number_id.is_empty() {
            return None;
        }
        self.doc.mods.get(number_id)
    }

    pub fn record_mod(&mut self, number_id: &str, record: ModRecord) {
        if number_id.is_empty() {
            return;
        }
        self.doc.mods.insert(number_id.to_string(), record);
    }

    pub fn remove_mod(&mut self, number_id: &str) {
        self.doc.mods.remove(number_id);
    }

    pub fn mods(&self) -> impl Iterator<Item = (&String, &ModRecord)> {
        self.doc.mods.iter()
    }

    /// The `numberId` that owns `file_name`, if any record claims it.
    pub fn owner_of(&self, file_name: &str) -> Option<&str> {
        self.doc
            .mods
            .iter()
            .find(|(_, rec)| rec.file_name == file_name)
            .map(|(id, _)| id.as_str())
    }

    // --- File records ---

    pub fn file_record(&self, key: &str) -> Option<&FileRecord> {
        self.doc.files.get(key)
    }

    pub fn record_file(&mut self, key: &str, record: FileRecord) {
        self.doc.files.insert(key.to_string(), record);
    }

    pub fn remove_file(&mut self, key: &str) {
        self.doc.files.remove(key);
    }

    // --- Disk reconciliation helpers ---

    /// Scan `dir` for a file whose SHA-256 equals `wanted`, skipping names
    /// owned by a different `numberId` than `exclude` (another mod's file is
    /// never a rename candidate).
    pub async fn find_file_by_hash(
        &self,
        dir: &Path,
        wanted: &str,
        exclude: Option<&str>,
    ) -> AppResult<Option<PathBuf>> {
        let mut read_dir = match tokio::fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = read_dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(owner) = self.owner_of(&name) {
                if Some(owner) != exclude {
                    continue;
                }
            }
            let path = entry.path();
            let actual = hash::sha256_file(&path).await?;
            if hash::hashes_match(&actual, wanted) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}
