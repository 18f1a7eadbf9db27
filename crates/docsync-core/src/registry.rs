//! Durable per-project store of document identity, version and history.
//!
//! The registry file is loaded wholesale, mutated in memory and saved
//! wholesale. It is not safe to share between concurrent writers; callers
//! hold one lock around every reload → mutate → save cycle.

use crate::config::RegistrySettings;
use crate::error::{DocError, FileOp, Result};
use crate::fsutil::{modified_at, write_atomic};
use crate::hash::{compute_file_hash, compute_hash};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use merge_engine::{ChangeStats, Strategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub const REGISTRY_SCHEMA_VERSION: u32 = 1;

/// What caused a registry update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// First write of generated content.
    Generated,
    /// Generated content merged into an existing document.
    Merged,
    /// A human edit accepted into the registry.
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &str {
        match self {
            Trigger::Generated => "generated",
            Trigger::Merged => "merged",
            Trigger::Manual => "manual",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub trigger: Trigger,
    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub lines_added: usize,
    #[serde(default)]
    pub lines_deleted: usize,
    #[serde(default)]
    pub lines_changed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub path: String,
    pub content_hash: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last update that was not a manual acknowledgement.
    #[serde(default)]
    pub last_generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub completeness_score: u8,
    #[serde(default)]
    pub freshness_score: u8,
    #[serde(default)]
    pub word_count: usize,
}

impl DocumentRecord {
    /// Reference time for staleness and dependency checks.
    pub fn generated_reference(&self) -> DateTime<Utc> {
        self.last_generated_at.unwrap_or(self.created_at)
    }
}

/// On-disk shape of the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub documents: BTreeMap<String, DocumentRecord>,
}

fn default_schema_version() -> u32 {
    REGISTRY_SCHEMA_VERSION
}

impl Default for RegistryFile {
    fn default() -> Self {
        Self {
            schema_version: REGISTRY_SCHEMA_VERSION,
            documents: BTreeMap::new(),
        }
    }
}

/// Backing storage for the registry.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load the full registry. A missing store yields an empty registry.
    async fn load(&self) -> Result<RegistryFile>;

    /// Replace the stored registry.
    async fn save(&self, registry: &RegistryFile) -> Result<()>;

    /// Where the store lives, for log messages.
    fn location(&self) -> String;
}

/// A registry stored as one pretty-printed JSON file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn load(&self) -> Result<RegistryFile> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RegistryFile::default())
            }
            Err(e) => return Err(DocError::file_access(FileOp::Read, &self.path, e)),
        };
        serde_json::from_str(&content).map_err(|e| DocError::RegistryCorruption {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    async fn save(&self, registry: &RegistryFile) -> Result<()> {
        let content = serde_json::to_string_pretty(registry)?;
        write_atomic(&self.path, &content).await
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Metadata accompanying a registration.
#[derive(Debug, Clone)]
pub struct RegistrationMeta {
    pub trigger: Trigger,
    pub strategy: Option<Strategy>,
    pub changes: ChangeStats,
    /// Replaces the recorded dependency list when set.
    pub dependencies: Option<Vec<String>>,
    /// Section headings whose presence drives the completeness score.
    pub expected_sections: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl RegistrationMeta {
    pub fn new(trigger: Trigger, timestamp: DateTime<Utc>) -> Self {
        Self {
            trigger,
            strategy: None,
            changes: ChangeStats::default(),
            dependencies: None,
            expected_sections: Vec::new(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum OutdatedReason {
    NotTracked,
    Missing,
    ExternallyModified,
    DependencyChanged { dependency: String },
    Stale { days: i64 },
}

impl fmt::Display for OutdatedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutdatedReason::NotTracked => write!(f, "not tracked by the registry"),
            OutdatedReason::Missing => write!(f, "file is missing"),
            OutdatedReason::ExternallyModified => {
                write!(f, "content changed outside docsync")
            }
            OutdatedReason::DependencyChanged { dependency } => {
                write!(f, "dependency {dependency} changed since last generation")
            }
            OutdatedReason::Stale { days } => {
                write!(f, "last generated {days} days ago")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutdatedStatus {
    pub outdated: bool,
    #[serde(flatten)]
    pub reason: Option<OutdatedReason>,
}

impl OutdatedStatus {
    fn current() -> Self {
        Self {
            outdated: false,
            reason: None,
        }
    }

    fn because(reason: OutdatedReason) -> Self {
        Self {
            outdated: true,
            reason: Some(reason),
        }
    }
}

/// In-memory view of the registry plus its store.
pub struct DocumentRegistry {
    store: Box<dyn DocumentStore>,
    root: PathBuf,
    settings: RegistrySettings,
    documents: BTreeMap<String, DocumentRecord>,
}

impl DocumentRegistry {
    /// Open a registry, loading its current contents.
    pub async fn open(
        store: Box<dyn DocumentStore>,
        root: impl Into<PathBuf>,
        settings: RegistrySettings,
    ) -> Result<Self> {
        let mut registry = Self {
            store,
            root: root.into(),
            settings,
            documents: BTreeMap::new(),
        };
        registry.load().await?;
        Ok(registry)
    }

    /// Load from the store. A corrupt store is reinitialised empty.
    pub async fn load(&mut self) -> Result<()> {
        match self.store.load().await {
            Ok(file) => {
                if file.schema_version > REGISTRY_SCHEMA_VERSION {
                    tracing::warn!(
                        found = file.schema_version,
                        supported = REGISTRY_SCHEMA_VERSION,
                        "registry written by a newer version"
                    );
                }
                self.documents = file.documents;
                Ok(())
            }
            Err(e @ DocError::RegistryCorruption { .. }) => {
                tracing::warn!(
                    store = %self.store.location(),
                    error = %e,
                    "registry unreadable; starting empty and losing prior version lineage"
                );
                self.documents.clear();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Re-read the store, discarding in-memory state.
    pub async fn reload(&mut self) -> Result<()> {
        self.load().await
    }

    pub async fn save(&self) -> Result<()> {
        let file = RegistryFile {
            schema_version: REGISTRY_SCHEMA_VERSION,
            documents: self.documents.clone(),
        };
        self.store.save(&file).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record new content for `key`, bumping its version by one.
    pub fn register(&mut self, key: &str, content: &str, meta: &RegistrationMeta) -> DocumentRecord {
        let now = meta.timestamp;
        let completeness = completeness_score(content, &meta.expected_sections);
        let words = content.split_whitespace().count();

        let record = self
            .documents
            .entry(key.to_string())
            .or_insert_with(|| DocumentRecord {
                path: key.to_string(),
                content_hash: String::new(),
                version: 0,
                created_at: now,
                updated_at: now,
                last_generated_at: None,
                dependencies: Vec::new(),
                history: Vec::new(),
                completeness_score: 0,
                freshness_score: 100,
                word_count: 0,
            });

        record.version += 1;
        record.updated_at = now;
        if meta.trigger != Trigger::Manual {
            record.last_generated_at = Some(now);
        }
        record.content_hash = compute_hash(content);
        record.word_count = words;
        record.completeness_score = completeness;
        record.freshness_score = 100;
        if let Some(deps) = &meta.dependencies {
            record.dependencies = deps.clone();
        }
        record.history.push(HistoryEntry {
            version: record.version,
            timestamp: now,
            trigger: meta.trigger,
            strategy: meta.strategy,
            lines_added: meta.changes.lines_added,
            lines_deleted: meta.changes.lines_deleted,
            lines_changed: meta.changes.lines_changed,
        });
        let limit = self.settings.history_limit.max(1);
        if record.history.len() > limit {
            let excess = record.history.len() - limit;
            record.history.drain(..excess);
        }

        tracing::debug!(
            path = key,
            version = record.version,
            trigger = %meta.trigger,
            "document registered"
        );
        record.clone()
    }

    /// Decide whether a tracked document needs regeneration.
    pub async fn is_outdated(&self, key: &str, now: DateTime<Utc>) -> OutdatedStatus {
        let Some(record) = self.documents.get(key) else {
            return OutdatedStatus::because(OutdatedReason::NotTracked);
        };

        let path = self.root.join(key);
        match compute_file_hash(&path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return OutdatedStatus::because(OutdatedReason::Missing)
            }
            Err(e) => {
                tracing::warn!(path = key, error = %e, "cannot hash document");
                return OutdatedStatus::because(OutdatedReason::ExternallyModified);
            }
            Ok(hash) if hash != record.content_hash => {
                return OutdatedStatus::because(OutdatedReason::ExternallyModified)
            }
            Ok(_) => {}
        }

        let reference = record.generated_reference();
        for dep in &record.dependencies {
            match modified_at(&self.root.join(dep)).await {
                Some(mtime) if mtime > reference => {
                    return OutdatedStatus::because(OutdatedReason::DependencyChanged {
                        dependency: dep.clone(),
                    })
                }
                Some(_) => {}
                None => tracing::debug!(path = key, dependency = %dep, "dependency not found"),
            }
        }

        let days = (now - reference).num_days();
        if days > self.settings.stale_after_days {
            return OutdatedStatus::because(OutdatedReason::Stale { days });
        }
        OutdatedStatus::current()
    }

    pub fn get(&self, key: &str) -> Option<&DocumentRecord> {
        self.documents.get(key)
    }

    pub fn list(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.documents.values()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Forget a document. Only ever caller-driven.
    pub fn remove(&mut self, key: &str) -> Option<DocumentRecord> {
        self.documents.remove(key)
    }

    /// Recompute freshness for every record.
    pub fn refresh_scores(&mut self, now: DateTime<Utc>) {
        let horizon = self.settings.freshness_horizon_days;
        for record in self.documents.values_mut() {
            record.freshness_score = freshness_score(record.updated_at, now, horizon);
        }
    }
}

/// Linear decay from 100 at zero days to 0 at `horizon_days`.
pub fn freshness_score(updated_at: DateTime<Utc>, now: DateTime<Utc>, horizon_days: i64) -> u8 {
    if horizon_days <= 0 {
        return 0;
    }
    let days = (now - updated_at).num_days().max(0);
    if days >= horizon_days {
        return 0;
    }
    (100 - days * 100 / horizon_days) as u8
}

/// Presence heuristics over document content, 0–100.
///
/// With expected section names, the share of them present as headings.
/// Otherwise four equal checks: a top-level title, at least two sections,
/// at least 50 words, and no placeholder text.
pub fn completeness_score(content: &str, expected_sections: &[String]) -> u8 {
    let sections = merge_engine::parse_sections(content);

    if !expected_sections.is_empty() {
        let present = expected_sections
            .iter()
            .filter(|name| {
                let name = name.to_lowercase();
                sections.keys().any(|k| k.to_lowercase() == name)
            })
            .count();
        return (present * 100 / expected_sections.len()) as u8;
    }

    let headings: Vec<_> = sections.iter().filter(|s| !s.is_preamble()).collect();
    let checks = [
        headings.iter().any(|s| s.level == 1),
        headings.len() >= 2,
        content.split_whitespace().count() >= 50,
        !["TODO", "TBD", "{{"].iter().any(|p| content.contains(p)),
    ];
    (checks.iter().filter(|ok| **ok).count() * 25) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    async fn open(dir: &Path) -> DocumentRegistry {
        let store = JsonFileStore::new(dir.join(".docsync").join("registry.json"));
        DocumentRegistry::open(Box::new(store), dir, RegistrySettings::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_increments_version_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = open(dir.path()).await;
        let now = ts("2026-03-01T10:00:00Z");

        let first = registry.register("docs/api.md", "# API\nHello", &RegistrationMeta::new(Trigger::Generated, now));
        assert_eq!(first.version, 1);
        assert_eq!(first.content_hash, compute_hash("# API\nHello"));

        let second = registry.register("docs/api.md", "# API\nHello again", &RegistrationMeta::new(Trigger::Merged, now));
        assert_eq!(second.version, 2);
        assert_eq!(second.history.len(), 2);
        assert_eq!(second.created_at, now);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = open(dir.path()).await;
        let now = ts("2026-03-01T10:00:00Z");
        for i in 0..15 {
            registry.register("a.md", &format!("v{i}"), &RegistrationMeta::new(Trigger::Merged, now));
        }
        let record = registry.get("a.md").unwrap();
        assert_eq!(record.version, 15);
        assert_eq!(record.history.len(), 10);
        assert_eq!(record.history[0].version, 6);
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = open(dir.path()).await;
        registry.register("a.md", "x", &RegistrationMeta::new(Trigger::Generated, Utc::now()));
        registry.save().await.unwrap();

        let reopened = open(dir.path()).await;
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get("a.md").unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_corrupt_registry_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".docsync").join("registry.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.load().await,
            Err(DocError::RegistryCorruption { .. })
        ));
        let registry = open(dir.path()).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_is_outdated_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = open(dir.path()).await;
        let now = Utc::now();

        assert_eq!(
            registry.is_outdated("docs/a.md", now).await.reason,
            Some(OutdatedReason::NotTracked)
        );

        registry.register("docs/a.md", "# A\n", &RegistrationMeta::new(Trigger::Generated, now));
        assert_eq!(
            registry.is_outdated("docs/a.md", now).await.reason,
            Some(OutdatedReason::Missing)
        );

        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/a.md"), "# A\n").unwrap();
        assert!(!registry.is_outdated("docs/a.md", now).await.outdated);

        let later = now + Duration::days(31);
        assert_eq!(
            registry.is_outdated("docs/a.md", later).await.reason,
            Some(OutdatedReason::Stale { days: 31 })
        );

        std::fs::write(dir.path().join("docs/a.md"), "# A\nedited by hand\n").unwrap();
        assert_eq!(
            registry.is_outdated("docs/a.md", now).await.reason,
            Some(OutdatedReason::ExternallyModified)
        );
    }

    #[tokio::test]
    async fn test_dependency_newer_than_generation() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = open(dir.path()).await;
        let generated = Utc::now() - Duration::hours(1);
        std::fs::write(dir.path().join("a.md"), "# A\n").unwrap();
        std::fs::write(dir.path().join("src.rs"), "fn main() {}").unwrap();

        let mut meta = RegistrationMeta::new(Trigger::Generated, generated);
        meta.dependencies = Some(vec!["src.rs".to_string()]);
        registry.register("a.md", "# A\n", &meta);

        assert_eq!(
            registry.is_outdated("a.md", Utc::now()).await.reason,
            Some(OutdatedReason::DependencyChanged {
                dependency: "src.rs".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_manual_registration_keeps_generation_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = open(dir.path()).await;
        let t0 = ts("2026-01-01T00:00:00Z");
        let t1 = ts("2026-01-05T00:00:00Z");
        registry.register("a.md", "x", &RegistrationMeta::new(Trigger::Generated, t0));
        let record = registry.register("a.md", "y", &RegistrationMeta::new(Trigger::Manual, t1));
        assert_eq!(record.last_generated_at, Some(t0));
        assert_eq!(record.updated_at, t1);
        assert_eq!(record.history[1].trigger, Trigger::Manual);
    }

    #[test]
    fn test_freshness_decay() {
        let t0 = ts("2026-01-01T00:00:00Z");
        assert_eq!(freshness_score(t0, t0, 90), 100);
        assert_eq!(freshness_score(t0, t0 + Duration::days(45), 90), 50);
        assert_eq!(freshness_score(t0, t0 + Duration::days(200), 90), 0);
    }

    #[test]
    fn test_completeness_heuristics() {
        assert_eq!(completeness_score("plain TODO", &[]), 0);
        let body = vec!["word"; 60].join(" ");
        let full = format!("# Title\n{body}\n## Usage\nrun\n");
        assert_eq!(completeness_score(&full, &[]), 100);

        let expected = vec!["Usage".to_string(), "Install".to_string()];
        assert_eq!(completeness_score(&full, &expected), 50);
    }
}
