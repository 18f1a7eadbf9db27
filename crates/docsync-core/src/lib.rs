pub mod backup;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod hash;
pub mod logging;
pub mod registry;

pub use backup::{BackupManager, Snapshot};
pub use config::Settings;
pub use error::{DocError, FileOp, Recoverability};
pub use registry::{
    DocumentRecord, DocumentRegistry, DocumentStore, HistoryEntry, JsonFileStore, OutdatedReason,
    OutdatedStatus, RegistrationMeta, Trigger,
};

/// Default name of the per-project data directory.
pub const DEFAULT_DATA_DIR: &str = ".docsync";
