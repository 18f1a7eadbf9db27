use crate::options::UpdateOptions;
use crate::report::{Action, UpdateReport};
use chrono::Utc;
use dashmap::DashMap;
use docsync_core::error::{DocError, FileOp, Result};
use docsync_core::fsutil::{normalize_path, relative_key, write_atomic};
use docsync_core::registry::{JsonFileStore, RegistrationMeta, Trigger};
use docsync_core::{BackupManager, DocumentRecord, DocumentRegistry, OutdatedStatus, Settings};
use merge_engine::analysis::line_changes;
use merge_engine::markers::{self, MarkerKind, MarkerMeta};
use merge_engine::resolutions::has_conflict_block;
use merge_engine::{parse_sections, MarkerIssue, MergeOptions, Resolver};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// What was found at the target path before an update.
enum Existing {
    Missing,
    Text(String),
    /// Present but not valid UTF-8; handled as a create, with the raw bytes
    /// still snapshotted.
    Undecodable { bytes: Vec<u8>, error: std::str::Utf8Error },
    /// Present but could not be read at all; handled as a create.
    Unreadable(DocError),
}

/// Marker and conflict-block health of one document on disk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentValidation {
    pub path: String,
    pub valid: bool,
    pub marker_issues: Vec<MarkerIssue>,
    pub unresolved_conflict_blocks: bool,
}

/// Reconciles generated content with documents on disk.
///
/// Calls on distinct paths run independently. Calls on the same path are
/// serialised by a per-path lock, and every registry mutation runs
/// reload → register → save under the registry lock.
pub struct DocumentUpdater {
    root: PathBuf,
    resolver: Resolver,
    backups: BackupManager,
    registry: Mutex<DocumentRegistry>,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl DocumentUpdater {
    pub fn new(root: impl Into<PathBuf>, settings: &Settings, registry: DocumentRegistry) -> Self {
        Self {
            root: root.into(),
            resolver: Resolver::new(settings.engine.clone()),
            backups: BackupManager::new(settings.backups.directory.clone()),
            registry: Mutex::new(registry),
            locks: DashMap::new(),
        }
    }

    /// Open an updater over `root`, with its registry at
    /// `<root>/<data_dir>/registry.json`.
    pub async fn open(root: impl Into<PathBuf>, data_dir: &Path, settings: &Settings) -> Result<Self> {
        let root = root.into();
        let data_dir = if data_dir.is_absolute() {
            data_dir.to_path_buf()
        } else {
            root.join(data_dir)
        };
        let store = JsonFileStore::new(data_dir.join("registry.json"));
        let registry = DocumentRegistry::open(Box::new(store), root.clone(), settings.registry).await?;
        Ok(Self::new(root, settings, registry))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &Mutex<DocumentRegistry> {
        &self.registry
    }

    fn locate(&self, path: &Path) -> (PathBuf, String) {
        let absolute = if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&self.root.join(path))
        };
        let key = relative_key(&self.root, &absolute);
        (absolute, key)
    }

    /// Run `work` while holding the lock for `path`. The lock entry is
    /// dropped again once no other caller holds or waits on it.
    async fn with_path_lock<T>(&self, path: &Path, work: impl Future<Output = T>) -> T {
        let lock = self
            .locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let out = {
            let _guard = lock.lock().await;
            work.await
        };
        drop(lock);
        self.locks.remove_if(path, |_, lock| Arc::strong_count(lock) == 1);
        out
    }

    async fn read_existing(path: &Path) -> Existing {
        match tokio::fs::read(path).await {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Existing::Text(text),
                Err(error) => Existing::Undecodable {
                    error: error.utf8_error(),
                    bytes: error.into_bytes(),
                },
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Existing::Missing,
            Err(e) => Existing::Unreadable(DocError::file_access(FileOp::Read, path, e)),
        }
    }

    async fn register(&self, key: &str, content: &str, meta: &RegistrationMeta) -> Result<DocumentRecord> {
        let mut registry = self.registry.lock().await;
        registry.reload().await?;
        let record = registry.register(key, content, meta);
        registry.save().await?;
        Ok(record)
    }

    /// Merge `candidate` into the document at `path`, creating it if absent.
    pub async fn update(&self, path: &Path, candidate: &str, options: &UpdateOptions) -> Result<UpdateReport> {
        let (absolute, key) = self.locate(path);
        self.with_path_lock(&absolute, self.update_locked(&absolute, &key, candidate, options))
            .await
    }

    async fn update_locked(
        &self,
        absolute: &Path,
        key: &str,
        candidate: &str,
        options: &UpdateOptions,
    ) -> Result<UpdateReport> {
        let now = Utc::now();

        let mut warnings = Vec::new();
        let (text, previous_bytes) = match Self::read_existing(absolute).await {
            Existing::Missing => (None, None),
            Existing::Text(text) => {
                let bytes = text.as_bytes().to_vec();
                (Some(text), Some(bytes))
            }
            Existing::Undecodable { bytes, error } => {
                tracing::warn!(path = %key, error = %error, "existing file is not UTF-8; treating as create");
                warnings.push(format!(
                    "existing content of {key} is not valid UTF-8 ({error}); the document was recreated"
                ));
                (None, Some(bytes))
            }
            Existing::Unreadable(error) => {
                tracing::warn!(path = %key, error = %error, "existing file unreadable; treating as create");
                warnings.push(format!("{error}; the document was recreated"));
                (None, None)
            }
        };

        let (mut report, content) = match text.as_deref() {
            None => (created_report(key, candidate, options.dry_run), candidate.to_string()),
            Some(existing) => {
                let merged = self.resolver.resolve_document(
                    existing,
                    candidate,
                    &MergeOptions {
                        strategy: options.strategy,
                        conflict_handling: options.conflict_handling,
                        preserve_metadata: options.preserve_metadata,
                        timestamp: now,
                    },
                );
                let unresolved = merged.unresolved().map(|r| r.log.clone()).collect();
                let report = UpdateReport {
                    action: Action::Updated,
                    strategy: Some(merged.strategy),
                    file_path: key.to_string(),
                    backup_path: None,
                    version: 0,
                    changes: merged.changes,
                    conflicts: merged.conflicts,
                    preserved_sections: merged.preserved_sections,
                    added_sections: merged.added_sections,
                    updated_sections: merged.updated_sections,
                    removed_sections: merged.removed_sections,
                    unresolved_conflicts: unresolved,
                    similarity_percentage: merged.analysis.similarity_percentage,
                    warnings: merged.warnings,
                    dry_run: options.dry_run,
                };
                (report, merged.merged_content)
            }
        };
        if !warnings.is_empty() {
            warnings.append(&mut report.warnings);
            report.warnings = warnings;
        }

        if options.dry_run {
            let registry = self.registry.lock().await;
            report.version = registry.get(key).map_or(1, |r| r.version + 1);
            return Ok(report);
        }

        let snapshotted = match (&previous_bytes, options.backup_original) {
            (Some(bytes), true) => {
                let backup = self.backups.snapshot(absolute, bytes, now).await?;
                report.backup_path = Some(relative_key(&self.root, &backup));
                true
            }
            _ => false,
        };

        write_atomic(absolute, &content).await?;

        // Old snapshots go only once the new content is in place.
        if snapshotted && options.max_versions > 0 {
            let file_name = absolute
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
            let pruned = self
                .backups
                .prune(&self.backups.versions_dir(absolute), &file_name, options.max_versions)
                .await;
            if let Err(error) = pruned {
                tracing::warn!(path = %key, error = %error, "snapshot pruning failed");
                report.warnings.push(format!("old snapshots were not pruned: {error}"));
            }
        }

        let meta = RegistrationMeta {
            trigger: match report.action {
                Action::Created => Trigger::Generated,
                Action::Updated => Trigger::Merged,
            },
            strategy: report.strategy,
            changes: report.changes,
            dependencies: options.dependencies.clone(),
            expected_sections: options.expected_sections.clone(),
            timestamp: now,
        };
        let record = self.register(key, &content, &meta).await?;
        report.version = record.version;

        tracing::info!(
            path = %key,
            action = report.action.as_str(),
            strategy = ?report.strategy,
            version = report.version,
            conflicts = report.conflicts.len(),
            unresolved = report.unresolved_conflicts.len(),
            "document written"
        );
        Ok(report)
    }

    /// Accept the current on-disk content, e.g. after a human edit.
    pub async fn acknowledge(&self, path: &Path) -> Result<DocumentRecord> {
        let (absolute, key) = self.locate(path);
        self.with_path_lock(&absolute, self.acknowledge_locked(&absolute, &key))
            .await
    }

    async fn acknowledge_locked(&self, absolute: &Path, key: &str) -> Result<DocumentRecord> {
        let content = tokio::fs::read_to_string(absolute)
            .await
            .map_err(|e| DocError::file_access(FileOp::Read, absolute, e))?;
        let previous = {
            let registry = self.registry.lock().await;
            registry.get(key).map(|r| r.content_hash.clone())
        };
        let meta = RegistrationMeta::new(Trigger::Manual, Utc::now());
        let record = self.register(key, &content, &meta).await?;
        tracing::info!(
            path = %key,
            version = record.version,
            changed = previous.as_deref() != Some(record.content_hash.as_str()),
            "manual content acknowledged"
        );
        Ok(record)
    }

    /// Wrap the body of the section headed `heading` in manual-edit markers.
    pub async fn protect(&self, path: &Path, heading: &str, author: Option<&str>) -> Result<DocumentRecord> {
        let (absolute, key) = self.locate(path);
        self.with_path_lock(&absolute, self.protect_locked(&absolute, &key, heading, author))
            .await
    }

    async fn protect_locked(
        &self,
        absolute: &Path,
        key: &str,
        heading: &str,
        author: Option<&str>,
    ) -> Result<DocumentRecord> {
        let content = tokio::fs::read_to_string(absolute)
            .await
            .map_err(|e| DocError::file_access(FileOp::Read, absolute, e))?;
        let sections = parse_sections(&content);
        let Some(section) = sections.get(heading.trim()) else {
            return Err(DocError::UnknownSection {
                path: PathBuf::from(key),
                heading: heading.to_string(),
            });
        };

        let now = Utc::now();
        let updated = if markers::has_manual_edit(&section.raw) {
            tracing::info!(path = %key, section = %section.key, "section already protected");
            content.clone()
        } else {
            let mut meta = MarkerMeta::stamped(now);
            if let Some(author) = author {
                meta = meta.with_author(author);
            }
            let body = section.body();
            let trailing = &body[body.trim_end_matches('\n').len()..];
            let wrapped = markers::wrap(MarkerKind::ManualEdit, body, &meta);
            let replacement = match section.heading_line() {
                Some(line) => format!("{line}\n{wrapped}{trailing}"),
                None => format!("{wrapped}{trailing}"),
            };
            // Later duplicates win in the section map, so edit the last occurrence.
            match content.rfind(section.raw.as_str()) {
                Some(start) => {
                    let mut out = String::with_capacity(content.len() + replacement.len());
                    out.push_str(&content[..start]);
                    out.push_str(&replacement);
                    out.push_str(&content[start + section.raw.len()..]);
                    out
                }
                None => content.clone(),
            }
        };

        if updated != content {
            write_atomic(absolute, &updated).await?;
        }
        let record = self
            .register(key, &updated, &RegistrationMeta::new(Trigger::Manual, now))
            .await?;
        tracing::info!(path = %key, section = %section.key, version = record.version, "section protected");
        Ok(record)
    }

    pub async fn check_outdated(&self, path: &Path) -> OutdatedStatus {
        let (_, key) = self.locate(path);
        let registry = self.registry.lock().await;
        registry.is_outdated(&key, Utc::now()).await
    }

    /// Outdated status of every tracked document.
    pub async fn check_all(&self) -> Vec<(String, OutdatedStatus)> {
        let registry = self.registry.lock().await;
        let now = Utc::now();
        let keys: Vec<String> = registry.list().map(|r| r.path.clone()).collect();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let status = registry.is_outdated(&key, now).await;
            out.push((key, status));
        }
        out
    }

    pub async fn validate(&self, path: &Path) -> Result<DocumentValidation> {
        let (absolute, key) = self.locate(path);
        let content = tokio::fs::read_to_string(&absolute)
            .await
            .map_err(|e| DocError::file_access(FileOp::Read, &absolute, e))?;
        let validation = markers::validate_markers(&content);
        Ok(DocumentValidation {
            path: key,
            valid: validation.valid,
            marker_issues: validation.issues,
            unresolved_conflict_blocks: has_conflict_block(&content),
        })
    }

    pub async fn record(&self, path: &Path) -> Option<DocumentRecord> {
        let (_, key) = self.locate(path);
        self.registry.lock().await.get(&key).cloned()
    }
}

fn created_report(key: &str, candidate: &str, dry_run: bool) -> UpdateReport {
    UpdateReport {
        action: Action::Created,
        strategy: None,
        file_path: key.to_string(),
        backup_path: None,
        version: 0,
        changes: line_changes("", candidate),
        conflicts: Vec::new(),
        preserved_sections: Vec::new(),
        added_sections: parse_sections(candidate).keys().map(str::to_string).collect(),
        updated_sections: Vec::new(),
        removed_sections: Vec::new(),
        unresolved_conflicts: Vec::new(),
        similarity_percentage: 0.0,
        warnings: Vec::new(),
        dry_run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use merge_engine::{ConflictKind, StrategyChoice};

    async fn updater(root: &Path) -> DocumentUpdater {
        DocumentUpdater::open(root, Path::new(".docsync"), &Settings::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_update() {
        let dir = tempfile::tempdir().unwrap();
        let updater = updater(dir.path()).await;
        let path = Path::new("docs/guide.md");
        let first = "# Guide\nline one\nline two\nline three\nline four\nline five\nline six\nline seven\n";

        let created = updater.update(path, first, &UpdateOptions::default()).await.unwrap();
        assert_eq!(created.action, Action::Created);
        assert_eq!(created.version, 1);
        assert!(created.backup_path.is_none());
        assert_eq!(created.added_sections, vec!["Guide"]);

        let second = format!("{first}line eight\n");
        let updated = updater.update(path, &second, &UpdateOptions::default()).await.unwrap();
        assert_eq!(updated.action, Action::Updated);
        assert_eq!(updated.version, 2);
        let backup = updated.backup_path.clone().unwrap();
        assert!(backup.starts_with("docs/versions/guide."));
        assert_eq!(std::fs::read_to_string(dir.path().join(&backup)).unwrap(), first);
        assert_eq!(std::fs::read_to_string(dir.path().join(path)).unwrap(), second);

        let record = updater.record(path).await.unwrap();
        assert_eq!(record.history.len(), 2);
        assert_eq!(record.content_hash, docsync_core::hash::compute_hash(&second));
    }

    #[tokio::test]
    async fn test_non_utf8_document_is_recreated_with_byte_exact_backup() {
        let dir = tempfile::tempdir().unwrap();
        let original = [b'#', b' ', b'A', b'\n', 0xff, 0xfe, b'\n'];
        std::fs::write(dir.path().join("a.md"), original).unwrap();
        let updater = updater(dir.path()).await;

        let report = updater
            .update(Path::new("a.md"), "# A\nfresh\n", &UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!(report.action, Action::Created);
        assert!(report.warnings[0].contains("not valid UTF-8"));
        let backup = report.backup_path.clone().unwrap();
        assert_eq!(std::fs::read(dir.path().join(backup)).unwrap(), original);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.md")).unwrap(), "# A\nfresh\n");
    }

    #[tokio::test]
    async fn test_parent_components_resolve_to_one_key() {
        let dir = tempfile::tempdir().unwrap();
        let updater = updater(dir.path()).await;

        let report = updater
            .update(Path::new("docs/../api.md"), "# API\n", &UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!(report.file_path, "api.md");
        assert!(dir.path().join("api.md").exists());
        assert!(updater.record(Path::new("api.md")).await.is_some());
        assert!(updater.record(Path::new("docs/api.md")).await.is_none());
        assert!(!updater.check_outdated(Path::new("./api.md")).await.outdated);
    }

    #[tokio::test]
    async fn test_path_locks_are_released() {
        let dir = tempfile::tempdir().unwrap();
        let updater = updater(dir.path()).await;
        updater.update(Path::new("a.md"), "# A\n", &UpdateOptions::default()).await.unwrap();
        updater.update(Path::new("b.md"), "# B\n", &UpdateOptions::default()).await.unwrap();
        updater.acknowledge(Path::new("a.md")).await.unwrap();
        assert!(updater.protect(Path::new("b.md"), "Missing", None).await.is_err());
        assert!(updater.locks.is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_old_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        // Short enough for a snapshot name, too long once the temp-file
        // prefix and suffix are added.
        let name = format!("{}.md", "a".repeat(219));
        let doc = dir.path().join(&name);
        std::fs::write(&doc, "# Long\nold\n").unwrap();

        let backups = BackupManager::new("versions");
        for i in 0..3 {
            let at = chrono::DateTime::parse_from_rfc3339(&format!("2020-01-0{}T00:00:00Z", i + 1))
                .unwrap()
                .with_timezone(&Utc);
            backups.snapshot(&doc, b"older", at).await.unwrap();
        }

        let updater = updater(dir.path()).await;
        let options = UpdateOptions {
            strategy: StrategyChoice::Replace,
            max_versions: 2,
            ..Default::default()
        };
        let err = updater
            .update(Path::new(&name), "# Long\nnew\n", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, DocError::FileAccess { op: FileOp::Write, .. }));
        assert_eq!(std::fs::read_to_string(&doc).unwrap(), "# Long\nold\n");
        assert_eq!(backups.list_for(&doc).await.unwrap().len(), 4);
        assert!(updater.record(Path::new(&name)).await.is_none());
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let updater = updater(dir.path()).await;
        let options = UpdateOptions {
            dry_run: true,
            ..Default::default()
        };

        let report = updater.update(Path::new("a.md"), "# A\n", &options).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.version, 1);
        assert!(!dir.path().join("a.md").exists());
        assert!(updater.record(Path::new("a.md")).await.is_none());
    }

    #[tokio::test]
    async fn test_no_backup_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A\nold\n").unwrap();
        let updater = updater(dir.path()).await;
        let options = UpdateOptions {
            backup_original: false,
            strategy: StrategyChoice::Replace,
            ..Default::default()
        };

        let report = updater.update(Path::new("a.md"), "# A\nnew\n", &options).await.unwrap();
        assert!(report.backup_path.is_none());
        assert!(!dir.path().join("versions").exists());
    }

    #[tokio::test]
    async fn test_protect_wraps_section() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Guide\nintro\n## Usage\nrun it\n").unwrap();
        let updater = updater(dir.path()).await;

        let record = updater
            .protect(Path::new("a.md"), "Usage", Some("dana"))
            .await
            .unwrap();
        assert_eq!(record.version, 1);

        let text = std::fs::read_to_string(dir.path().join("a.md")).unwrap();
        assert!(text.starts_with("# Guide\nintro\n## Usage\n<!-- MANUAL-EDIT-START -->\n"));
        assert!(text.contains("<!-- author: dana -->\nrun it\n<!-- MANUAL-EDIT-END -->\n"));
        assert!(markers::validate_markers(&text).valid);

        // A second call leaves the text alone.
        updater.protect(Path::new("a.md"), "Usage", None).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("a.md")).unwrap(), text);

        // The protected section survives a regeneration.
        let report = updater
            .update(
                Path::new("a.md"),
                "# Guide\nintro\n## Usage\nsomething generated instead\n",
                &UpdateOptions::default(),
            )
            .await
            .unwrap();
        assert!(report
            .conflicts
            .iter()
            .any(|c| c.kind == ConflictKind::ManualEdits));
        let after = std::fs::read_to_string(dir.path().join("a.md")).unwrap();
        assert!(after.contains("run it\n<!-- MANUAL-EDIT-END -->"));
    }

    #[tokio::test]
    async fn test_protect_unknown_section() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Guide\nintro\n").unwrap();
        let updater = updater(dir.path()).await;

        let err = updater
            .protect(Path::new("a.md"), "Missing", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DocError::UnknownSection { .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_acknowledge_clears_external_modification() {
        let dir = tempfile::tempdir().unwrap();
        let updater = updater(dir.path()).await;
        let path = Path::new("a.md");
        updater.update(path, "# A\none\n", &UpdateOptions::default()).await.unwrap();

        std::fs::write(dir.path().join("a.md"), "# A\nedited by hand\n").unwrap();
        let status = updater.check_outdated(path).await;
        assert!(status.outdated);
        assert!(matches!(
            status.reason,
            Some(docsync_core::OutdatedReason::ExternallyModified)
        ));

        let record = updater.acknowledge(path).await.unwrap();
        assert_eq!(record.version, 2);
        assert!(!updater.check_outdated(path).await.outdated);
    }

    #[tokio::test]
    async fn test_validate_reports_marker_and_conflict_problems() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.md"),
            "# A\n<!-- PRESERVE-START -->\nkeep\n<<<<<<< existing\nold\n=======\nnew\n>>>>>>> generated\n",
        )
        .unwrap();
        let updater = updater(dir.path()).await;

        let validation = updater.validate(Path::new("a.md")).await.unwrap();
        assert!(!validation.valid);
        assert_eq!(validation.marker_issues.len(), 1);
        assert!(validation.unresolved_conflict_blocks);
    }

    #[tokio::test]
    async fn test_check_all_lists_tracked_documents() {
        let dir = tempfile::tempdir().unwrap();
        let updater = updater(dir.path()).await;
        updater.update(Path::new("a.md"), "# A\n", &UpdateOptions::default()).await.unwrap();
        updater.update(Path::new("b.md"), "# B\n", &UpdateOptions::default()).await.unwrap();
        std::fs::remove_file(dir.path().join("b.md")).unwrap();

        let all = updater.check_all().await;
        assert_eq!(all.len(), 2);
        let (key, status) = &all[1];
        assert_eq!(key, "b.md");
        assert!(matches!(status.reason, Some(docsync_core::OutdatedReason::Missing)));
        assert!(!all[0].1.outdated);
    }
}
