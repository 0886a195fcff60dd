//! Evidence file storage
//!
//! Uploaded screenshots and clips are written under the upload directory as
//! `<uuid><.ext>`; the original name is only echoed back to the client.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_EXTENSION_LEN: usize = 10;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvidence {
    pub file_name: String,
    pub original_name: String,
}

#[derive(Debug, Clone)]
pub struct EvidenceStore {
    root: PathBuf,
    max_file_bytes: usize,
}

impl EvidenceStore {
    pub fn new(root: impl Into<PathBuf>, max_file_bytes: usize) -> Self {
        Self {
            root: root.into(),
            max_file_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_file_bytes(&self) -> usize {
        self.max_file_bytes
    }

    pub async fn save(&self, original_name: &str, bytes: &[u8]) -> Result<StoredEvidence> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create {}", self.root.display()))?;

        let file_name = stored_name(original_name);
        let path = self.root.join(&file_name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        debug!("Stored evidence {} ({} bytes)", file_name, bytes.len());
        Ok(StoredEvidence {
            file_name,
            original_name: original_name.to_string(),
        })
    }

    /// Remove files saved earlier in an upload that did not complete
    pub async fn discard(&self, files: &[StoredEvidence]) {
        for file in files {
            let path = self.root.join(&file.file_name);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Random file name keeping a sanitized extension of the original.
pub fn stored_name(original_name: &str) -> String {
    let id = Uuid::new_v4();
    match extension(original_name) {
        Some(ext) => format!("{}.{}", id, ext),
        None => id.to_string(),
    }
}

fn extension(original_name: &str) -> Option<String> {
    // Browsers may send a full client path
    let base = original_name.rsplit(['/', '\\']).next()?;
    let ext = Path::new(base).extension()?.to_str()?;
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_name_keeps_extension() {
        let name = stored_name("screenshot.PNG");
        assert!(name.ends_with(".png"));
        assert!(Uuid::parse_str(name.trim_end_matches(".png")).is_ok());
    }

    #[test]
    fn test_stored_name_drops_bad_extensions() {
        assert!(Uuid::parse_str(&stored_name("noext")).is_ok());
        assert!(Uuid::parse_str(&stored_name("evil.p/hp")).is_ok());
        assert!(Uuid::parse_str(&stored_name("clip.averyveryverylongext")).is_ok());
        assert!(stored_name("C:\\Users\\steve\\clip.mp4").ends_with(".mp4"));
        assert!(Uuid::parse_str(&stored_name("../../etc/.bashrc")).is_ok());
    }

    #[tokio::test]
    async fn test_save_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvidenceStore::new(dir.path().join("evidence"), 1024);

        let stored = store.save("bug.jpg", b"jpeg-bytes").await.unwrap();
        assert_eq!(stored.original_name, "bug.jpg");
        assert!(stored.file_name.ends_with(".jpg"));

        let written = std::fs::read(store.root().join(&stored.file_name)).unwrap();
        assert_eq!(written, b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_discard_removes_saved_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvidenceStore::new(dir.path().join("evidence"), 1024);

        let kept = store.save("keep.png", b"a").await.unwrap();
        let dropped = vec![
            store.save("one.png", b"b").await.unwrap(),
            store.save("two.png", b"c").await.unwrap(),
        ];
        store.discard(&dropped).await;

        let left: Vec<_> = std::fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(left, vec![kept.file_name]);
    }
}
