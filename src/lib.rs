pub mod api;
pub mod commands;
pub mod store;
pub mod structures;
pub mod sync;
pub mod views;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{HttpMonitorApi, MonitorApi};
pub use commands::{CheckOutcome, CheckPhase, CommandDispatcher};
pub use store::{CollectionStatus, CollectionStore, CommitOutcome};
pub use structures::errors::{ApiError, ConsoleError};
pub use sync::{CategoryResolution, RefreshReport, SyncCoordinator};
