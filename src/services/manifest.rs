use serde::de::DeserializeOwned;

use crate::errors::{AppError, AppResult};
use crate::models::manifest::{
    DeleteEntry, DeletesManifest, FileEntry, FilesManifest, ModEntry, RemoteConfig,
};
use crate::models::version::Version;
use crate::services::net;

/// Fetches and parses the remote configuration and the three sub-manifests.
pub struct ManifestLoader {
    client: reqwest::Client,
    bearer: Option<String>,
}

impl ManifestLoader {
    pub fn new() -> Self {
        Self {
            client: net::http_client(net::MANIFEST_TIMEOUT),
            bearer: net::bearer_token(),
        }
    }

    pub fn with_bearer(bearer: Option<String>) -> Self {
        Self {
            client: net::http_client(net::MANIFEST_TIMEOUT),
            bearer,
        }
    }

    pub async fn load_remote_config(&self, url: &str) -> AppResult<RemoteConfig> {
        let body = self.fetch_text(url).await?;
        let config: RemoteConfig = serde_json::from_str(&body)
            .map_err(|e| AppError::ManifestShape(format!("remote config at {url}: {e}")))?;
        Ok(config)
    }

    /// `mods.json` is a bare array. Entries that fail to parse are skipped
    /// with a warning; the rest of the run continues.
    pub async fn load_mods(&self, config: &RemoteConfig) -> AppResult<Vec<ModEntry>> {
        let url = join_url(&config.configs_base_url, &config.mods_json);
        let body = self.fetch_text(&url).await?;
        let raw: Vec<serde_json::Value> = serde_json::from_str(&body)
            .map_err(|e| AppError::ManifestShape(format!("mods manifest at {url}: {e}")))?;
        Ok(parse_entries(raw, "mod"))
    }

    pub async fn load_files(&self, config: &RemoteConfig) -> AppResult<Vec<FileEntry>> {
        let url = join_url(&config.configs_base_url, &config.files_json);
        let body = self.fetch_text(&url).await?;
        let manifest: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| AppError::ManifestShape(format!("files manifest at {url}: {e}")))?;
        match manifest.get("files").cloned() {
            Some(serde_json::Value::Array(raw)) => Ok(parse_entries(raw, "file")),
            _ => {
                // Tolerate an empty or wrapper-less document.
                let parsed: FilesManifest = serde_json::from_value(manifest)
                    .map_err(|e| AppError::ManifestShape(format!("files manifest: {e}")))?;
                Ok(parsed.files)
            }
        }
    }

    pub async fn load_deletes(&self, config: &RemoteConfig) -> AppResult<Vec<DeleteEntry>> {
        let url = join_url(&config.configs_base_url, &config.deletes_json);
        let body = self.fetch_text(&url).await?;
        let manifest: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| AppError::ManifestShape(format!("deletes manifest at {url}: {e}")))?;
        match manifest.get("deletes").cloned() {
            Some(serde_json::Value::Array(raw)) => Ok(parse_entries(raw, "delete")),
            _ => {
                let parsed: DeletesManifest = serde_json::from_value(manifest)
                    .map_err(|e| AppError::ManifestShape(format!("deletes manifest: {e}")))?;
                Ok(parsed.deletes)
            }
        }
    }

    async fn fetch_text(&self, url: &str) -> AppResult<String> {
        let mut request = self.client.get(url);
        if let Some(ref token) = self.bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let snippet: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            return Err(AppError::Network {
                status: status.as_u16(),
                url: url.to_string(),
                snippet,
            });
        }
        Ok(response.text().await?)
    }
}

impl Default for ManifestLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_entries<T: DeserializeOwned>(raw: Vec<serde_json::Value>, what: &str) -> Vec<T> {
    let mut entries = Vec::with_capacity(raw.len());
    for (idx, value) in raw.into_iter().enumerate() {
        match serde_json::from_value::<T>(value) {
            Ok(entry) => entries.push(entry),
            Err(e) => log::warn!("skipping malformed {what} entry #{idx}: {e}"),
        }
    }
    entries
}

pub fn join_url(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// Entries that became relevant strictly after `from`, up to and including
/// `to`: `from < since <= to`. Powers "only apply new items".
pub fn apply_range<'a, T>(entries: &'a [T], from: &Version, to: &Version) -> Vec<&'a T>
where
    T: Sinced,
{
    entries
        .iter()
        .filter(|e| e.since() > from && e.since() <= to)
        .collect()
}

/// Every entry applicable through `to`: `since <= to`. Powers "reverify the
/// whole installation", and is what deletes are planned from so that
/// migrations converge even when version bookkeeping is lossy.
pub fn verify_set<'a, T>(entries: &'a [T], to: &Version) -> Vec<&'a T>
where
    T: Sinced,
{
    entries.iter().filter(|e| e.since() <= to).collect()
}

/// Anything carrying a `since` version.
pub trait Sinced {
    fn since(&self) -> &Version;
}

impl Sinced for ModEntry {
    fn since(&self) -> &Version {
        &self.since
    }
}

impl Sinced for FileEntry {
    fn since(&self) -> &Version {
        &self.since
    }
}

impl Sinced for DeleteEntry {
    fn since(&self) -> &Version {
        &self.since
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item(Version);

    impl Sinced for Item {
        fn since(&self) -> &Version {
            &self.0
        }
    }

    fn items(versions: &[&str]) -> Vec<Item> {
        versions.iter().map(|v| Item(Version::parse(v))).collect()
    }

    #[test]
    fn apply_range_is_half_open() {
        let entries = items(&["0.5.0", "1.0.0", "1.5.0", "2.0.0"]);
        let from = Version::parse("1.0.0");
        let to = Version::parse("2.0.0");

        let ranged = apply_range(&entries, &from, &to);
        let versions: Vec<&str> = ranged.iter().map(|i| i.0.as_str()).collect();
        assert_eq!(versions, vec!["1.5.0", "2.0.0"]);
    }

    #[test]
    fn apply_range_is_subset_of_verify_set() {
        let entries = items(&["0.1.0", "0.9.0", "1.0.0", "1.2.0", "3.0.0"]);
        let from = Version::parse("0.9.0");
        let to = Version::parse("1.2.0");

        let ranged: Vec<&str> = apply_range(&entries, &from, &to)
            .iter()
            .map(|i| i.0.as_str())
            .collect();
        let verified: Vec<&str> = verify_set(&entries, &to)
            .iter()
            .map(|i| i.0.as_str())
            .collect();

        for v in &ranged {
            assert!(verified.contains(v));
        }
        assert_eq!(verified, vec!["0.1.0", "0.9.0", "1.0.0", "1.2.0"]);
    }

    #[test]
    fn adjacent_ranges_are_disjoint() {
        let entries = items(&["0.5.0", "1.0.0", "1.5.0", "2.0.0", "2.5.0", "3.0.0"]);
        let a = Version::parse("0.5.0");
        let b = Version::parse("1.5.0");
        let c = Version::parse("3.0.0");

        let first: Vec<&str> = apply_range(&entries, &a, &b)
            .iter()
            .map(|i| i.0.as_str())
            .collect();
        let second: Vec<&str> = apply_range(&entries, &b, &c)
            .iter()
            .map(|i| i.0.as_str())
            .collect();

        for v in &first {
            assert!(!second.contains(v), "{v} appears in both ranges");
        }
        assert_eq!(first, vec!["1.0.0", "1.5.0"]);
        assert_eq!(second, vec!["2.0.0", "2.5.0", "3.0.0"]);
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let raw = vec![
            serde_json::json!({ "numberId": "1", "file_name": "a",
                                "source": { "url": "https://dl.example/a.jar" } }),
            serde_json::json!({ "numberId": "2" }),
            serde_json::json!({ "numberId": "3", "source": { "modrinth": { "versionId": "X" } } }),
        ];
        let parsed: Vec<crate::models::manifest::ModEntry> = parse_entries(raw, "mod");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].number_id, "1");
        assert_eq!(parsed[1].number_id, "3");
    }

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(
            join_url("https://cfg.example/pack/", "/mods.json"),
            "https://cfg.example/pack/mods.json"
        );
        assert_eq!(
            join_url("https://cfg.example/pack", "mods.json"),
            "https://cfg.example/pack/mods.json"
        );
    }
}
