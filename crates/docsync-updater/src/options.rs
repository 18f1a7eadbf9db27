use docsync_core::Settings;
use merge_engine::{ConflictHandling, StrategyChoice};

/// Per-call options for [`crate::DocumentUpdater::update`].
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub strategy: StrategyChoice,
    pub conflict_handling: ConflictHandling,
    /// Snapshot the previous content before overwriting it.
    pub backup_original: bool,
    pub preserve_metadata: bool,
    /// Snapshots kept per document; 0 keeps all of them.
    pub max_versions: usize,
    /// Replaces the recorded dependency list when set.
    pub dependencies: Option<Vec<String>>,
    pub expected_sections: Vec<String>,
    /// Compute the report without touching disk or registry.
    pub dry_run: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            strategy: StrategyChoice::Auto,
            conflict_handling: ConflictHandling::Smart,
            backup_original: true,
            preserve_metadata: true,
            max_versions: 5,
            dependencies: None,
            expected_sections: Vec::new(),
            dry_run: false,
        }
    }
}

impl UpdateOptions {
    /// Options seeded from the project settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            strategy: settings.defaults.strategy,
            conflict_handling: settings.defaults.conflict_handling,
            backup_original: settings.backups.enabled,
            preserve_metadata: settings.defaults.preserve_metadata,
            max_versions: settings.backups.max_versions,
            ..Default::default()
        }
    }
}
