use crate::error::{DocError, FileOp, Result};
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Write a file via tmp+rename so readers never see a partial write.
/// The temp file lives next to the target; it is removed if the rename fails.
pub async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .map_err(|e| DocError::file_access(FileOp::CreateDir, &parent, e))?;

    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let tmp = parent.join(format!(".{}.{}.tmp", filename, uuid::Uuid::new_v4().simple()));

    fs::write(&tmp, content)
        .await
        .map_err(|e| DocError::file_access(FileOp::Write, &tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(DocError::file_access(FileOp::Rename, path, e));
    }
    Ok(())
}

/// Lexically resolve `.` and `..` components without touching the filesystem.
/// A `..` that would climb above a relative path's start is kept.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Registry key for a path: relative to `root`, forward slashes, `.` and `..`
/// resolved. Paths outside `root` keep their full normalised form, so they
/// never collide with a key inside it.
pub fn relative_key(root: &Path, path: &Path) -> String {
    let root = normalize_path(root);
    let path = normalize_path(path);
    let rel = path.strip_prefix(&root).unwrap_or(&path);
    if rel.is_absolute() {
        return rel.to_string_lossy().replace('\\', "/");
    }
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Modification time of a file, if it exists.
pub async fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let meta = fs::metadata(path).await.ok()?;
    meta.modified().ok().map(DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_atomic_creates_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs").join("api.md");

        write_atomic(&path, "first").await.unwrap();
        write_atomic(&path, "second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let entries = std::fs::read_dir(dir.path().join("docs")).unwrap().count();
        assert_eq!(entries, 1, "no temp files left behind");
    }

    #[tokio::test]
    async fn test_write_atomic_failure_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        // The target is an existing directory, so the rename must fail.
        let target = dir.path().join("occupied");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep.txt"), "x").unwrap();

        let err = write_atomic(&target, "content").await.unwrap_err();
        assert!(matches!(err, DocError::FileAccess { op: FileOp::Rename, .. }));
        assert!(target.join("keep.txt").exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_relative_key() {
        let root = Path::new("/repo");
        assert_eq!(relative_key(root, Path::new("/repo/docs/api.md")), "docs/api.md");
        assert_eq!(relative_key(root, Path::new("./docs/api.md")), "docs/api.md");
        assert_eq!(relative_key(root, Path::new("/elsewhere/a.md")), "/elsewhere/a.md");
        assert_eq!(relative_key(root, Path::new("/repo/docs/../api.md")), "api.md");
        assert_eq!(relative_key(root, Path::new("/repo/docs/./v1/../api.md")), "docs/api.md");
        assert_eq!(relative_key(root, Path::new("/repo/../other/a.md")), "/other/a.md");
        assert_eq!(relative_key(Path::new("."), Path::new("./docs/../api.md")), "api.md");
        assert_eq!(relative_key(Path::new("."), Path::new("../outside.md")), "../outside.md");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/a/b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize_path(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize_path(Path::new("./a/./b")), PathBuf::from("a/b"));
        assert_eq!(normalize_path(Path::new("../a/../../b")), PathBuf::from("../../b"));
    }
}
