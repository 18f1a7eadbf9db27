use crate::options::UpdateOptions;
use crate::report::{BatchItem, BatchReport};
use crate::updater::DocumentUpdater;
use merge_engine::{ConflictHandling, StrategyChoice};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;

/// One document to update.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub path: PathBuf,
    pub candidate: String,
    pub options: UpdateOptions,
}

/// A batch job as written in a manifest file; the candidate is read from disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub candidate_file: PathBuf,
    #[serde(default)]
    pub strategy: Option<StrategyChoice>,
    #[serde(default)]
    pub conflict_handling: Option<ConflictHandling>,
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
    #[serde(default)]
    pub expected_sections: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub jobs: Vec<ManifestEntry>,
}

impl Manifest {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Resolve entries into jobs. Candidate files are relative to `base`.
    /// An unreadable candidate is reported as that job's error.
    pub async fn into_jobs(
        self,
        base: &Path,
        defaults: &UpdateOptions,
    ) -> Vec<Result<BatchJob, (PathBuf, String)>> {
        let mut jobs = Vec::with_capacity(self.jobs.len());
        for entry in self.jobs {
            let candidate_path = base.join(&entry.candidate_file);
            match tokio::fs::read_to_string(&candidate_path).await {
                Ok(candidate) => {
                    let mut options = defaults.clone();
                    if let Some(strategy) = entry.strategy {
                        options.strategy = strategy;
                    }
                    if let Some(handling) = entry.conflict_handling {
                        options.conflict_handling = handling;
                    }
                    options.dependencies = entry.dependencies;
                    options.expected_sections = entry.expected_sections;
                    jobs.push(Ok(BatchJob {
                        path: entry.path,
                        candidate,
                        options,
                    }));
                }
                Err(e) => jobs.push(Err((
                    entry.path,
                    format!("cannot read candidate {}: {}", candidate_path.display(), e),
                ))),
            }
        }
        jobs
    }
}

/// Run jobs concurrently. Results come back in input order; a failed job
/// never stops the others.
pub async fn run_batch(updater: Arc<DocumentUpdater>, jobs: Vec<BatchJob>) -> BatchReport {
    let total = jobs.len();
    let mut set = JoinSet::new();
    let mut paths = Vec::with_capacity(total);

    for (idx, job) in jobs.into_iter().enumerate() {
        paths.push(job.path.display().to_string());
        let updater = updater.clone();
        set.spawn(async move {
            let result = updater.update(&job.path, &job.candidate, &job.options).await;
            (idx, result)
        });
    }

    let mut slots: Vec<Option<BatchItem>> = vec![None; total];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, Ok(report))) => {
                slots[idx] = Some(BatchItem {
                    path: report.file_path.clone(),
                    report: Some(report),
                    error: None,
                });
            }
            Ok((idx, Err(e))) => {
                tracing::error!(path = %paths[idx], error = %e, recoverable = e.is_recoverable(), "document update failed");
                slots[idx] = Some(BatchItem {
                    path: paths[idx].clone(),
                    report: None,
                    error: Some(e.to_string()),
                });
            }
            Err(e) => tracing::error!(error = %e, "batch task panicked"),
        }
    }

    let items = slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| {
            slot.unwrap_or_else(|| BatchItem {
                path: paths[idx].clone(),
                report: None,
                error: Some("update task did not complete".to_string()),
            })
        })
        .collect();
    BatchReport { items }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_core::Settings;

    #[tokio::test]
    async fn test_batch_keeps_order_and_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default();
        let updater = Arc::new(
            DocumentUpdater::open(dir.path(), Path::new(".docsync"), &settings)
                .await
                .unwrap(),
        );

        // A directory where the document should be makes that write fail.
        std::fs::create_dir_all(dir.path().join("blocked.md")).unwrap();
        std::fs::write(dir.path().join("blocked.md").join("x"), "x").unwrap();

        let jobs = vec![
            BatchJob {
                path: PathBuf::from("docs/a.md"),
                candidate: "# A\none\n".to_string(),
                options: UpdateOptions::default(),
            },
            BatchJob {
                path: PathBuf::from("blocked.md"),
                candidate: "# B\n".to_string(),
                options: UpdateOptions::default(),
            },
            BatchJob {
                path: PathBuf::from("docs/c.md"),
                candidate: "# C\nthree\n".to_string(),
                options: UpdateOptions::default(),
            },
        ];

        let report = run_batch(updater, jobs).await;
        assert_eq!(report.items.len(), 3);
        assert_eq!(report.items[0].path, "docs/a.md");
        assert!(report.items[0].is_ok());
        assert!(!report.items[1].is_ok());
        assert_eq!(report.items[2].path, "docs/c.md");
        assert!(report.items[2].is_ok());
        assert_eq!(report.succeeded(), 2);
        assert!(dir.path().join("docs/c.md").exists());
    }

    #[tokio::test]
    async fn test_manifest_jobs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("api.gen.md"), "# API\n").unwrap();
        let manifest: Manifest = serde_json::from_str(
            r#"{"jobs": [
                {"path": "docs/api.md", "candidateFile": "api.gen.md", "strategy": "smart"},
                {"path": "docs/gone.md", "candidateFile": "missing.md"}
            ]}"#,
        )
        .unwrap();

        let jobs = manifest.into_jobs(dir.path(), &UpdateOptions::default()).await;
        assert_eq!(jobs.len(), 2);
        let first = jobs[0].as_ref().unwrap();
        assert_eq!(first.candidate, "# API\n");
        assert_eq!(first.options.strategy, StrategyChoice::Smart);
        assert!(jobs[1].is_err());
    }
}
