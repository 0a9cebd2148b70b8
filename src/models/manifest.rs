use serde::{Deserialize, Serialize};

use crate::models::version::Version;

/// Remote top-level configuration fetched from the user-configured URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub modpack_version: Version,
    pub configs_base_url: String,
    #[serde(default = "default_mods_json")]
    pub mods_json: String,
    #[serde(default = "default_files_json")]
    pub files_json: String,
    #[serde(default = "default_deletes_json")]
    pub deletes_json: String,
    #[serde(default = "default_true")]
    pub check_current_version: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backup_keep")]
    pub backup_keep: usize,
    #[serde(default)]
    pub debug_mode: bool,
}

fn default_mods_json() -> String {
    "mods.json".to_string()
}

fn default_files_json() -> String {
    "files.json".to_string()
}

fn default_deletes_json() -> String {
    "deletes.json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_backup_keep() -> usize {
    3
}

fn default_install_location() -> String {
    "mods".to_string()
}

/// Where a mod artifact comes from.
///
/// Externally tagged: `{"url": "..."}"`, `{"curseforge": {...}}` or
/// `{"modrinth": {...}}`. Adding a provider means adding a variant here and
/// a resolver arm; nothing else dispatches on the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModSourceSpec {
    Url(String),
    #[serde(rename_all = "camelCase")]
    Curseforge {
        project_id: u64,
        file_id: u64,
    },
    #[serde(rename_all = "camelCase")]
    Modrinth {
        version_id: String,
    },
}

impl ModSourceSpec {
    /// Stable identity of the source, stored in metadata so a changed
    /// provider or file id forces a refresh even when hashes are absent.
    pub fn fingerprint(&self) -> String {
        match self {
            ModSourceSpec::Url(url) => url.clone(),
            ModSourceSpec::Curseforge {
                project_id,
                file_id,
            } => format!("curseforge:{project_id}:{file_id}"),
            ModSourceSpec::Modrinth { version_id } => format!("modrinth:{version_id}"),
        }
    }
}

/// One entry of `mods.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModEntry {
    /// Opaque stable identity. Empty means identity falls back to filename.
    #[serde(rename = "numberId", default)]
    pub number_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Preferred on-disk stem; extension may be absent.
    #[serde(default)]
    pub file_name: Option<String>,
    pub source: ModSourceSpec,
    #[serde(rename = "installLocation", default = "default_install_location")]
    pub install_location: String,
    /// SHA-256 of the artifact, when the manifest pins one.
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub since: Version,
}

impl ModEntry {
    /// UI label: display name first, then filename, then the id.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.file_name.as_deref())
            .unwrap_or(&self.number_id)
    }
}

/// One entry of `files.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub url: String,
    #[serde(rename = "downloadPath")]
    pub download_path: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub extract: bool,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub since: Version,
}

/// One entry of `deletes.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteEntry {
    #[serde(default)]
    pub since: Version,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub folders: Vec<String>,
}

/// Wrapper shape of `files.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesManifest {
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// Wrapper shape of `deletes.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletesManifest {
    #[serde(default)]
    pub deletes: Vec<DeleteEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_config_applies_defaults() {
        let cfg: RemoteConfig = serde_json::from_str(
            r#"{ "modpackVersion": "1.2.0", "configsBaseUrl": "https://cfg.example/pack" }"#,
        )
        .unwrap();

        assert_eq!(cfg.modpack_version, Version::parse("1.2.0"));
        assert_eq!(cfg.mods_json, "mods.json");
        assert!(cfg.check_current_version);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.backup_keep, 3);
        assert!(!cfg.debug_mode);
    }

    #[test]
    fn mod_entry_parses_all_source_kinds() {
        let url: ModEntry = serde_json::from_str(
            r#"{ "numberId": "42", "file_name": "foo", "source": { "url": "https://dl.example/foo.jar" } }"#,
        )
        .unwrap();
        assert_eq!(url.source, ModSourceSpec::Url("https://dl.example/foo.jar".into()));
        assert_eq!(url.install_location, "mods");
        assert_eq!(url.since, Version::zero());

        let cf: ModEntry = serde_json::from_str(
            r#"{ "numberId": "7", "source": { "curseforge": { "projectId": 238222, "fileId": 4712345 } } }"#,
        )
        .unwrap();
        assert_eq!(cf.source.fingerprint(), "curseforge:238222:4712345");

        let mr: ModEntry = serde_json::from_str(
            r#"{ "numberId": "9", "source": { "modrinth": { "versionId": "AABBCC" } } }"#,
        )
        .unwrap();
        assert_eq!(mr.source.fingerprint(), "modrinth:AABBCC");
    }

    #[test]
    fn label_prefers_display_name() {
        let entry: ModEntry = serde_json::from_str(
            r#"{ "numberId": "42", "display_name": "Foo Mod", "file_name": "foo",
                 "source": { "url": "https://dl.example/foo.jar" } }"#,
        )
        .unwrap();
        assert_eq!(entry.label(), "Foo Mod");
    }

    #[test]
    fn file_and_delete_manifests_tolerate_missing_fields() {
        let files: FilesManifest = serde_json::from_str(
            r#"{ "files": [ { "url": "https://dl.example/cfg.toml", "downloadPath": "config" } ] }"#,
        )
        .unwrap();
        let entry = &files.files[0];
        assert!(!entry.overwrite);
        assert!(!entry.extract);
        assert!(entry.hash.is_none());

        let deletes: DeletesManifest = serde_json::from_str(r#"{ "deletes": [] }"#).unwrap();
        assert!(deletes.deletes.is_empty());
    }
}
