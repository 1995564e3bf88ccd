//! consolesync core library.
//!
//! This crate provides the building blocks for working with console
//! management servers: authenticated sessions, saved-configuration registry
//! operations, CCS inventory listing, and the configuration merge pipeline
//! (workspace management, archive reconciliation, orchestration).

pub mod archive;
pub mod ccs;
pub mod config;
pub mod errors;
pub mod merge;
pub mod models;
pub mod registry;
pub mod session;
pub mod workspace;

// Re-exports for convenience.
pub use config::AppConfig;
pub use errors::CoreError;
pub use merge::{spawn_merge, MergeOrchestrator, MergeSettings, MergeStage};
pub use registry::ConfigRegistry;
pub use session::{ApiClient, Session};
pub use workspace::MergeWorkspace;
