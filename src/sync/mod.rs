//! Sync engine
//!
//! [`SyncEngine`] validates requests against the target plugin, runs the
//! plugin call and keeps each result in a bounded cache for later retrieval.
//! History is written separately through [`SyncEngine::record_export`] and
//! [`SyncEngine::record_import`] so an audit failure never hides the outcome.
//! [`Scheduler`] drives the same path on an interval and [`DownloadGate`]
//! checks output paths before bytes are served.

mod cache;
mod download;
mod engine;
mod scheduler;
mod types;

pub use cache::ResultCache;
pub use download::DownloadGate;
pub use engine::{EngineConfig, SyncEngine};
pub use scheduler::{
    CreateSchedule, Schedule, ScheduleRequester, Scheduler, SchedulerConfig, UpdateSchedule,
};
pub use types::{
    ExportRequest, ExportResult, ImportRequest, ImportResult, PreviewResult, ValidationReport,
};
