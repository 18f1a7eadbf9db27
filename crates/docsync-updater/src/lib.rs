pub mod batch;
pub mod options;
pub mod report;
pub mod updater;

pub use batch::{run_batch, BatchJob, Manifest};
pub use options::UpdateOptions;
pub use report::{Action, BatchItem, BatchReport, UpdateReport};
pub use updater::{DocumentUpdater, DocumentValidation};
