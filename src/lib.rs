//! Fleet Sync - export/import engine for smart-device fleets
//!
//! This library provides the sync subsystem of a fleet-management backend:
//! - Pluggable export/import plugins (archive backups, GitOps trees)
//! - Deterministic preview and dry-run for both directions
//! - Recurring scheduled exports
//! - An append-only audit history with statistics
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   HTTP API (axum)                    │
//! │  /export  │  /import  │  /export/schedules  │  ...  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   Sync Engine                        │
//! │  Validate  │  Execute  │  Result Cache  │ Scheduler │
//! └──────────┬─────────────────────────────┬────────────┘
//!            │                             │
//! ┌──────────▼──────────┐       ┌──────────▼────────────┐
//! │   Plugin Registry   │       │  History (SQLite)     │
//! │  archive │ gitops   │       │  audit + statistics   │
//! └─────────────────────┘       └───────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod fleet;
pub mod plugins;
pub mod sync;

pub use config::Config;
pub use daemon::Daemon;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use fleet::{Device, DeviceFilter, FleetStore};
pub use plugins::{PluginInfo, PluginRegistry, SyncPlugin};
pub use sync::{ExportRequest, ExportResult, ImportRequest, ImportResult, SyncEngine};
