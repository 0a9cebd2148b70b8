use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::errors::AppResult;

/// Streaming SHA-256 of a file, lowercase hex.
pub async fn sha256_file(path: &Path) -> AppResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn sha256_bytes(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Case-insensitive hash comparison; manifests are not consistent about case.
pub fn hashes_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("modupdater_test_{label}_{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn file_and_bytes_hashes_agree() -> AppResult<()> {
        let path = temp_path("hash");
        tokio::fs::write(&path, b"hello modpack").await?;

        let from_file = sha256_file(&path).await?;
        let from_bytes = sha256_bytes(b"hello modpack");
        assert_eq!(from_file, from_bytes);

        let _ = tokio::fs::remove_file(&path).await;
        Ok(())
    }

    #[test]
    fn comparison_ignores_case() {
        assert!(hashes_match("ABCDEF01", "abcdef01"));
        assert!(!hashes_match("abcdef01", "abcdef02"));
    }
}
