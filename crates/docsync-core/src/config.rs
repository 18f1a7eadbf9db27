use merge_engine::{ConflictHandling, ResolverConfig, StrategyChoice};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: ResolverConfig,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub backups: BackupSettings,
    #[serde(default)]
    pub defaults: DefaultSettings,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegistrySettings {
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Days since the last generated update after which a document is stale.
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: i64,
    /// Days over which the freshness score decays from 100 to 0.
    #[serde(default = "default_freshness_horizon_days")]
    pub freshness_horizon_days: i64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            stale_after_days: default_stale_after_days(),
            freshness_horizon_days: default_freshness_horizon_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_versions")]
    pub max_versions: usize,
    /// Sibling directory, next to each document, that holds its snapshots.
    #[serde(default = "default_versions_dir")]
    pub directory: String,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_versions: default_max_versions(),
            directory: default_versions_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultSettings {
    #[serde(default)]
    pub strategy: StrategyChoice,
    #[serde(default)]
    pub conflict_handling: ConflictHandling,
    #[serde(default = "default_true")]
    pub preserve_metadata: bool,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyChoice::Auto,
            conflict_handling: ConflictHandling::Smart,
            preserve_metadata: true,
        }
    }
}

fn default_history_limit() -> usize {
    10
}
fn default_stale_after_days() -> i64 {
    30
}
fn default_freshness_horizon_days() -> i64 {
    90
}
fn default_max_versions() -> usize {
    5
}
fn default_versions_dir() -> String {
    "versions".into()
}
fn default_true() -> bool {
    true
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
