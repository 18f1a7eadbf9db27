use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;

/// SHA-256 of a document's content, hex encoded.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 of a file's raw bytes, hex encoded.
pub async fn compute_file_hash(path: &Path) -> Result<String, std::io::Error> {
    let bytes = fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash() {
        assert_eq!(
            compute_hash("hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(compute_hash("").len(), 64);
        assert_ne!(compute_hash("a"), compute_hash("b"));
    }

    #[tokio::test]
    async fn test_file_hash_matches_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.md");
        tokio::fs::write(&path, "# API\nHello").await.unwrap();
        assert_eq!(
            compute_file_hash(&path).await.unwrap(),
            compute_hash("# API\nHello")
        );
        assert!(compute_file_hash(&dir.path().join("missing.md")).await.is_err());
    }
}
