use crate::error::{DocError, FileOp, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

/// Timestamp embedded in snapshot file names.
const SNAPSHOT_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.6fZ";

/// A snapshot file of some document's previous content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Writes timestamped copies of documents before they are overwritten, into
/// a sibling directory next to each document, and prunes old ones.
pub struct BackupManager {
    dir_name: String,
}

impl BackupManager {
    pub fn new(dir_name: impl Into<String>) -> Self {
        Self {
            dir_name: dir_name.into(),
        }
    }

    /// Directory holding snapshots for `document`.
    pub fn versions_dir(&self, document: &Path) -> PathBuf {
        match document.parent() {
            Some(parent) => parent.join(&self.dir_name),
            None => PathBuf::from(&self.dir_name),
        }
    }

    /// Copy `content` (the pre-update bytes of `document`) into a new snapshot.
    /// Existing snapshots are never overwritten, and a snapshot that could not
    /// be written completely is removed.
    pub async fn snapshot(
        &self,
        document: &Path,
        content: &[u8],
        now: DateTime<Utc>,
    ) -> Result<PathBuf> {
        let dir = self.versions_dir(document);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| DocError::file_access(FileOp::CreateDir, &dir, e))?;

        let name = file_name(document);
        let (stem, ext) = split_name(&name);
        let mut at = now;
        loop {
            let path = dir.join(format!("{}.{}{}", stem, at.format(SNAPSHOT_FORMAT), ext));
            let file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match file {
                Ok(mut file) => {
                    use tokio::io::AsyncWriteExt;
                    let written = match file.write_all(content).await {
                        Ok(()) => file.flush().await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = written {
                        drop(file);
                        let _ = fs::remove_file(&path).await;
                        return Err(DocError::file_access(FileOp::Write, &path, e));
                    }
                    tracing::debug!(snapshot = %path.display(), "snapshot written");
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    at += Duration::microseconds(1);
                }
                Err(e) => return Err(DocError::file_access(FileOp::Write, &path, e)),
            }
        }
    }

    /// Snapshots of the document named `base_name` in `directory`, newest first.
    pub async fn list(&self, directory: &Path, base_name: &str) -> Result<Vec<Snapshot>> {
        let mut dir = match fs::read_dir(directory).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DocError::file_access(FileOp::List, directory, e)),
        };

        let (stem, ext) = split_name(base_name);
        let mut snapshots = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| DocError::file_access(FileOp::List, directory, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_snapshot_of(&name, stem, ext) {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                if let Ok(modified) = meta.modified() {
                    snapshots.push(Snapshot {
                        path: entry.path(),
                        modified,
                    });
                }
            }
        }

        // Newest first; names embed the snapshot time and break mtime ties.
        snapshots.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.path.file_name().cmp(&a.path.file_name()))
        });
        Ok(snapshots)
    }

    /// Snapshots of `document`, newest first.
    pub async fn list_for(&self, document: &Path) -> Result<Vec<Snapshot>> {
        self.list(&self.versions_dir(document), &file_name(document))
            .await
    }

    /// Delete all but the `max_versions` most recent snapshots.
    /// Returns the deleted paths.
    pub async fn prune(
        &self,
        directory: &Path,
        base_name: &str,
        max_versions: usize,
    ) -> Result<Vec<PathBuf>> {
        let snapshots = self.list(directory, base_name).await?;
        let mut removed = Vec::new();
        for snapshot in snapshots.into_iter().skip(max_versions) {
            fs::remove_file(&snapshot.path)
                .await
                .map_err(|e| DocError::file_access(FileOp::Remove, &snapshot.path, e))?;
            removed.push(snapshot.path);
        }
        if !removed.is_empty() {
            tracing::info!(document = base_name, removed = removed.len(), "pruned old snapshots");
        }
        Ok(removed)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `api.md` → (`api`, `.md`); names without an extension get an empty one.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

fn is_snapshot_of(name: &str, stem: &str, ext: &str) -> bool {
    let Some(rest) = name.strip_prefix(stem).and_then(|r| r.strip_prefix('.')) else {
        return false;
    };
    let Some(stamp) = rest.strip_suffix(ext) else {
        return false;
    };
    NaiveDateTime::parse_from_str(stamp, SNAPSHOT_FORMAT).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_snapshot_name_matching() {
        assert!(is_snapshot_of("api.2026-03-01T10-00-00.000000Z.md", "api", ".md"));
        assert!(!is_snapshot_of("api.md", "api", ".md"));
        assert!(!is_snapshot_of("api-v2.2026-03-01T10-00-00.000000Z.md", "api", ".md"));
        assert!(!is_snapshot_of("api.2026-03-01T10-00-00.000000Z.txt", "api", ".md"));
        assert_eq!(split_name("README"), ("README", ""));
        assert_eq!(split_name("notes.v1.md"), ("notes.v1", ".md"));
    }

    #[tokio::test]
    async fn test_snapshot_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("docs").join("api.md");
        let manager = BackupManager::new("versions");
        let now = ts("2026-03-01T10:00:00Z");

        let first = manager.snapshot(&doc, b"one", now).await.unwrap();
        let second = manager.snapshot(&doc, b"two", now).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(first.parent().unwrap(), dir.path().join("docs").join("versions"));
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "one");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "two");
        assert_eq!(
            first.file_name().unwrap().to_string_lossy(),
            "api.2026-03-01T10-00-00.000000Z.md"
        );
    }

    #[tokio::test]
    async fn test_prune_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("guide.md");
        let manager = BackupManager::new("versions");
        let start = ts("2026-03-01T10:00:00Z");

        let mut written = Vec::new();
        for i in 0..5 {
            let at = start + Duration::seconds(i);
            written.push(manager.snapshot(&doc, format!("v{i}").as_bytes(), at).await.unwrap());
        }
        // A snapshot of another document must be left alone.
        manager.snapshot(&dir.path().join("other.md"), b"x", start).await.unwrap();

        let versions = manager.versions_dir(&doc);
        let removed = manager.prune(&versions, "guide.md", 3).await.unwrap();
        assert_eq!(removed.len(), 2);

        let left: Vec<PathBuf> = manager
            .list_for(&doc)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.path)
            .collect();
        assert_eq!(left.len(), 3);
        for path in &written[2..] {
            assert!(left.contains(path));
        }
        assert_eq!(manager.list(&versions, "other.md").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_keeps_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("notes.md");
        let bytes = [b'#', b' ', 0xff, 0xfe, b'\n'];

        let path = BackupManager::new("versions")
            .snapshot(&doc, &bytes, ts("2026-03-01T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new("versions");
        assert!(manager.list_for(&dir.path().join("a.md")).await.unwrap().is_empty());
    }
}
