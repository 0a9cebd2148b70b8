//! Filename derivation for artifacts whose manifest entry does not carry a
//! complete on-disk name. The precedence is fixed: a name that already has a
//! usable extension wins, then the URL's last path segment, then the HEAD
//! `Content-Type`, then leading magic bytes, and finally `.jar`.

/// Multi-part extensions that must not be re-split at the last dot.
const MULTIPART_EXTENSIONS: [&str; 3] = [".tar.gz", ".tar.bz2", ".tar.xz"];

pub const DEFAULT_EXTENSION: &str = "jar";

/// Probe results gathered lazily by the engine, only for entries that
/// actually need extension inference.
#[derive(Debug, Clone, Default)]
pub struct NameHints {
    pub content_type: Option<String>,
    pub leading_bytes: Option<Vec<u8>>,
}

/// A name is complete when it ends in a known multi-part extension or in a
/// 1–8 character alphanumeric extension with a non-empty stem.
pub fn has_usable_extension(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if MULTIPART_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return true;
    }

    match name.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty()
                && (1..=8).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// Last path segment of a URL, query/fragment stripped, percent-decoded.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let segment = without_query.rsplit('/').next()?;
    if segment.is_empty() || segment.contains(':') {
        return None;
    }
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    if decoded.is_empty() {
        None
    } else {
        Some(decoded)
    }
}

fn extension_of(name: &str) -> Option<String> {
    let lower = name.to_ascii_lowercase();
    for ext in MULTIPART_EXTENSIONS {
        if lower.ends_with(ext) {
            return Some(ext.trim_start_matches('.').to_string());
        }
    }
    if has_usable_extension(name) {
        name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
    } else {
        None
    }
}

fn extension_from_url(url: &str) -> Option<String> {
    file_name_from_url(url).and_then(|name| extension_of(&name))
}

/// Static `Content-Type` → extension table for the formats the engine
/// actually manages. `application/octet-stream` deliberately maps to nothing.
fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "application/java-archive" | "application/x-java-archive" => Some("jar"),
        "application/zip" | "application/x-zip-compressed" => Some("zip"),
        "application/json" => Some("json"),
        "text/plain" => Some("txt"),
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "application/pdf" => Some("pdf"),
        "application/x-tar" => Some("tar"),
        "application/gzip" => Some("gz"),
        _ => None,
    }
}

/// Leading-bytes signatures. ZIP containers are mod jars in this domain.
fn extension_from_magic(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"PK\x03\x04") {
        return Some("jar");
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some("png");
    }
    if bytes.starts_with(b"GIF8") {
        return Some("gif");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("jpg");
    }
    if bytes.starts_with(b"%PDF") {
        return Some("pdf");
    }
    None
}

/// Complete `requested` with an extension, following the fixed precedence.
pub fn ensure_extension(requested: &str, url: Option<&str>, hints: &NameHints) -> String {
    if has_usable_extension(requested) {
        return requested.to_string();
    }

    let inferred = url
        .and_then(extension_from_url)
        .or_else(|| {
            hints
                .content_type
                .as_deref()
                .and_then(extension_for_content_type)
                .map(str::to_string)
        })
        .or_else(|| {
            hints
                .leading_bytes
                .as_deref()
                .and_then(extension_from_magic)
                .map(str::to_string)
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());

    format!("{requested}.{inferred}")
}

/// Turn a display name into something safe on every filesystem the engine
/// targets: anything outside `[A-Za-z0-9_.-]` becomes `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Prefix `name` with `numberId-` unless it already starts with it. The
/// prefix is the on-disk ownership marker for identified mods.
pub fn apply_number_id_prefix(number_id: &str, name: &str) -> String {
    if number_id.is_empty() {
        return name.to_string();
    }
    let prefix = format!("{number_id}-");
    if name.starts_with(&prefix) {
        name.to_string()
    } else {
        format!("{prefix}{name}")
    }
}
