//! Configuration merge pipeline.
//!
//! The [`MergeOrchestrator`] drives one merge run through a fixed sequence
//! of stages:
//!
//! 1. Allocate a fresh temporary workspace.
//! 2. Delete and recreate the `source_Merge` / `target_Merge` staging
//!    configurations on each server.
//! 3. Download both bundles and extract them.
//! 4. Reconcile: copy everything from the source, take the protected
//!    directories from the target.
//! 5. Rewrite the descriptor, repackage, and upload to the target.
//! 6. Remove the workspace, whatever happened before.
//!
//! There is no rollback across the two servers; a failed run leaves the
//! staging configurations behind and reports the stage that failed.

mod job;
mod orchestrator;

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::archive::ReconcileSummary;
use crate::config::MergeConfig;
use crate::workspace::RemovalFailure;

pub use job::{spawn_merge, MergeCompletion, MergeJob};
pub use orchestrator::{
    MergeOrchestrator, SOURCE_STAGING, SOURCE_STAGING_DESCRIPTION, TARGET_STAGING,
    TARGET_STAGING_DESCRIPTION,
};

// ---------------------------------------------------------------------------
// Stage machine
// ---------------------------------------------------------------------------

/// Stages of a merge run, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MergeStage {
    Init,
    ProvisionSource,
    ProvisionTarget,
    DownloadSource,
    DownloadTarget,
    Extract,
    Reconcile,
    RewriteDescriptor,
    Repackage,
    Upload,
    Cleanup,
    Done,
    Failed,
}

impl MergeStage {
    /// True for `Done` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Progress line shown while the stage runs.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Init => "Preparing workspace",
            Self::ProvisionSource => "Creating source staging configuration",
            Self::ProvisionTarget => "Creating target staging configuration",
            Self::DownloadSource => "Downloading source configuration",
            Self::DownloadTarget => "Downloading target configuration",
            Self::Extract => "Extracting archives",
            Self::Reconcile => "Merging configuration trees",
            Self::RewriteDescriptor => "Updating descriptor",
            Self::Repackage => "Packing merged archive",
            Self::Upload => "Uploading merged configuration",
            Self::Cleanup => "Cleaning up",
            Self::Done => "Merge complete",
            Self::Failed => "Merge failed",
        }
    }
}

impl std::fmt::Display for MergeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::ProvisionSource => write!(f, "provision_source"),
            Self::ProvisionTarget => write!(f, "provision_target"),
            Self::DownloadSource => write!(f, "download_source"),
            Self::DownloadTarget => write!(f, "download_target"),
            Self::Extract => write!(f, "extract"),
            Self::Reconcile => write!(f, "reconcile"),
            Self::RewriteDescriptor => write!(f, "rewrite_descriptor"),
            Self::Repackage => write!(f, "repackage"),
            Self::Upload => write!(f, "upload"),
            Self::Cleanup => write!(f, "cleanup"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings and outcome
// ---------------------------------------------------------------------------

/// Per-run merge settings, usually built from [`MergeConfig`].
#[derive(Debug, Clone)]
pub struct MergeSettings {
    pub version: String,
    pub protected_dirs: Vec<String>,
    pub work_dir: Option<PathBuf>,
    pub keep_archive_dir: Option<PathBuf>,
    pub delete_staging_after: bool,
    /// Date stamped into the archive name; today (local time) when `None`.
    pub date: Option<NaiveDate>,
}

impl MergeSettings {
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
}

impl From<&MergeConfig> for MergeSettings {
    fn from(config: &MergeConfig) -> Self {
        Self {
            version: config.version.clone(),
            protected_dirs: config.protected_dirs.clone(),
            work_dir: config.work_dir.clone(),
            keep_archive_dir: config.keep_archive_dir.clone(),
            delete_staging_after: config.delete_staging_after,
            date: None,
        }
    }
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self::from(&MergeConfig::default())
    }
}

/// Result of a successful merge run.
#[derive(Debug)]
pub struct MergeOutcome {
    /// Name of the uploaded archive, without `.zip`.
    pub archive_name: String,
    /// Size in bytes of the uploaded archive.
    pub archive_size: u64,
    pub reconcile: ReconcileSummary,
    /// False when the bundle had no descriptor to rewrite.
    pub descriptor_updated: bool,
    /// Retained copy of the archive, if `keep_archive_dir` was set.
    pub kept_archive: Option<PathBuf>,
    /// Workspace entries that could not be removed.
    pub cleanup_failures: Vec<RemovalFailure>,
}
