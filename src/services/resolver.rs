use serde::Deserialize;

use crate::models::manifest::ModSourceSpec;
use crate::services::filename;
use crate::services::net;

const CURSEFORGE_PROXY_BASE: &str = "https://api.curse.tools/v1/cf";
const MODRINTH_BASE: &str = "https://api.modrinth.com/v2";

/// Outcome of resolving a source descriptor.
///
/// `Unresolved` means the descriptor was valid but no artifact could be
/// determined (provider error, empty file list). That is never fatal here;
/// the planner decides what a missing download means for the entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved {
        url: String,
        /// Canonical filename the provider advertises, when it does.
        file_name: Option<String>,
    },
    Unresolved,
}

impl Resolution {
    pub fn url(&self) -> Option<&str> {
        match self {
            Resolution::Resolved { url, .. } => Some(url),
            Resolution::Unresolved => None,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        match self {
            Resolution::Resolved { file_name, .. } => file_name.as_deref(),
            Resolution::Unresolved => None,
        }
    }
}

/// Turns a manifest source descriptor into a download URL and filename.
pub struct SourceResolver {
    client: reqwest::Client,
    curseforge_base: String,
    modrinth_base: String,
}

// --- Provider API response types ---

#[derive(Deserialize)]
struct CfFileResponse {
    data: CfFileData,
}

#[derive(Deserialize)]
struct CfFileData {
    #[serde(rename = "downloadUrl")]
    download_url: Option<String>,
    #[serde(rename = "fileName")]
    file_name: Option<String>,
    #[serde(default)]
    files: Vec<CfNestedFile>,
}

#[derive(Deserialize)]
struct CfNestedFile {
    #[serde(rename = "downloadUrl")]
    download_url: Option<String>,
    #[serde(rename = "fileName")]
    file_name: Option<String>,
}

#[derive(Deserialize)]
struct MrVersionResponse {
    #[serde(default)]
    files: Vec<MrVersionFile>,
}

#[derive(Deserialize)]
struct MrVersionFile {
    url: String,
    filename: String,
}

impl SourceResolver {
    pub fn new() -> Self {
        Self {
            client: net::http_client(net::MANIFEST_TIMEOUT),
            curseforge_base: CURSEFORGE_PROXY_BASE.to_string(),
            modrinth_base: MODRINTH_BASE.to_string(),
        }
    }

    /// Override the provider endpoints; used by tests and self-hosted proxies.
    pub fn with_bases(curseforge_base: String, modrinth_base: String) -> Self {
        Self {
            client: net::http_client(net::MANIFEST_TIMEOUT),
            curseforge_base,
            modrinth_base,
        }
    }

    pub async fn resolve(&self, source: &ModSourceSpec) -> Resolution {
        match source {
            ModSourceSpec::Url(url) => resolve_url(url),
            ModSourceSpec::Curseforge {
                project_id,
                file_id,
            } => self.resolve_curseforge(*project_id, *file_id).await,
            ModSourceSpec::Modrinth { version_id } => self.resolve_modrinth(version_id).await,
        }
    }

    async fn resolve_curseforge(&self, project_id: u64, file_id: u64) -> Resolution {
        let url = format!(
            "{}/mods/{project_id}/files/{file_id}",
            self.curseforge_base
        );
        let response = match self.fetch_json::<CfFileResponse>(&url).await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("CurseForge lookup failed for {project_id}/{file_id}: {e}");
                return Resolution::Unresolved;
            }
        };
        pick_curseforge(response.data)
    }

    async fn resolve_modrinth(&self, version_id: &str) -> Resolution {
        let url = format!("{}/version/{version_id}", self.modrinth_base);
        let response = match self.fetch_json::<MrVersionResponse>(&url).await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Modrinth lookup failed for version {version_id}: {e}");
                return Resolution::Unresolved;
            }
        };
        pick_modrinth(response)
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, reqwest::Error> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await
    }
}

impl Default for SourceResolver {
    fn default() -> Self {
        Self::new()
    }
}

// --- Per-variant mapping, pure so tests can pin it ---

fn resolve_url(url: &str) -> Resolution {
    Resolution::Resolved {
        url: url.to_string(),
        file_name: filename::file_name_from_url(url),
    }
}

/// Prefer the top-level fields; fall back to the first nested file when the
/// proxy omits them.
fn pick_curseforge(data: CfFileData) -> Resolution {
    let fallback = data.files.into_iter().next();
    let url = data
        .download_url
        .or_else(|| fallback.as_ref().and_then(|f| f.download_url.clone()));
    let file_name = data
        .file_name
        .or_else(|| fallback.and_then(|f| f.file_name));

    match url {
        Some(url) => Resolution::Resolved { url, file_name },
        None => Resolution::Unresolved,
    }
}

fn pick_modrinth(response: MrVersionResponse) -> Resolution {
    match response.files.into_iter().next() {
        Some(file) => Resolution::Resolved {
            url: file.url,
            file_name: Some(file.filename),
        },
        None => Resolution::Unresolved,
    }
}
