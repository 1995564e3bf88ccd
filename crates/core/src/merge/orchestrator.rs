use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, instrument, warn};

use super::{MergeOutcome, MergeSettings, MergeStage};
use crate::archive::{
    extract_archive, reconcile, repackage, rewrite_descriptor, summarize_archive, MergeNaming,
};
use crate::errors::{ArchiveError, MergeCause, MergeError, RegistryError};
use crate::registry::ConfigRegistry;
use crate::workspace::MergeWorkspace;

/// Staging configuration created on the source server.
pub const SOURCE_STAGING: &str = "source_Merge";
/// Staging configuration created on the target server.
pub const TARGET_STAGING: &str = "target_Merge";
pub const SOURCE_STAGING_DESCRIPTION: &str = "Newly created source config to be merged";
pub const TARGET_STAGING_DESCRIPTION: &str = "Newly created target config to be merged";

/// Runs one merge of `source` into `target`.
pub struct MergeOrchestrator<'a> {
    source: &'a dyn ConfigRegistry,
    target: &'a dyn ConfigRegistry,
    settings: MergeSettings,
    progress: Option<UnboundedSender<MergeStage>>,
}

impl<'a> MergeOrchestrator<'a> {
    pub fn new(
        source: &'a dyn ConfigRegistry,
        target: &'a dyn ConfigRegistry,
        settings: MergeSettings,
    ) -> Self {
        Self {
            source,
            target,
            settings,
            progress: None,
        }
    }

    /// Report every stage transition on `tx`.
    pub fn with_progress(mut self, tx: UnboundedSender<MergeStage>) -> Self {
        self.progress = Some(tx);
        self
    }

    fn enter(&self, stage: MergeStage) {
        info!(stage = %stage, "merge stage");
        if let Some(tx) = &self.progress {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(stage);
        }
    }

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Execute the whole pipeline.
    ///
    /// The workspace is removed on every exit path: explicitly after the
    /// stages ran, or by its drop guard if a stage panics.
    #[instrument(skip(self), fields(source = %self.source.host(), target = %self.target.host()))]
    pub async fn run(&self) -> Result<MergeOutcome, MergeError> {
        self.enter(MergeStage::Init);
        let workspace = match &self.settings.work_dir {
            Some(parent) => MergeWorkspace::create_in(parent),
            None => MergeWorkspace::create(),
        }
        .map_err(|e| {
            self.enter(MergeStage::Failed);
            MergeError::new(MergeStage::Init, e)
        })?;

        let result = self.run_stages(&workspace).await;

        self.enter(MergeStage::Cleanup);
        let cleanup_failures = workspace.destroy();

        match result {
            Ok(mut outcome) => {
                outcome.cleanup_failures = cleanup_failures;
                self.enter(MergeStage::Done);
                info!(
                    archive = %outcome.archive_name,
                    bytes = outcome.archive_size,
                    "merge completed"
                );
                Ok(outcome)
            }
            Err(e) => {
                self.enter(MergeStage::Failed);
                error!(stage = %e.stage, error = %e.cause, "merge failed");
                Err(e)
            }
        }
    }

    async fn run_stages(&self, workspace: &MergeWorkspace) -> Result<MergeOutcome, MergeError> {
        // 1. Staging configurations, one server after the other.
        self.enter(MergeStage::ProvisionSource);
        provision(self.source, SOURCE_STAGING, SOURCE_STAGING_DESCRIPTION)
            .await
            .map_err(|e| MergeError::new(MergeStage::ProvisionSource, e))?;

        self.enter(MergeStage::ProvisionTarget);
        provision(self.target, TARGET_STAGING, TARGET_STAGING_DESCRIPTION)
            .await
            .map_err(|e| MergeError::new(MergeStage::ProvisionTarget, e))?;

        // 2. Bundles into the workspace root.
        self.enter(MergeStage::DownloadSource);
        let source_zip = download(self.source, SOURCE_STAGING, workspace.base())
            .await
            .map_err(|e| MergeError::new(MergeStage::DownloadSource, e))?;

        self.enter(MergeStage::DownloadTarget);
        let target_zip = download(self.target, TARGET_STAGING, workspace.base())
            .await
            .map_err(|e| MergeError::new(MergeStage::DownloadTarget, e))?;

        // 3. Local archive work, off the async runtime.
        self.enter(MergeStage::Extract);
        let (source_dir, target_dir) = (
            workspace.source_extract().to_path_buf(),
            workspace.target_extract().to_path_buf(),
        );
        blocking(MergeStage::Extract, move || {
            extract_archive(&source_zip, &source_dir)?;
            extract_archive(&target_zip, &target_dir)
        })
        .await?;

        self.enter(MergeStage::Reconcile);
        let (source_dir, target_dir, output_dir) = (
            workspace.source_extract().to_path_buf(),
            workspace.target_extract().to_path_buf(),
            workspace.merge_output().to_path_buf(),
        );
        let protected = self.settings.protected_dirs.clone();
        let summary = blocking(MergeStage::Reconcile, move || {
            reconcile(&source_dir, &target_dir, &output_dir, &protected)
        })
        .await?;

        self.enter(MergeStage::RewriteDescriptor);
        let naming = MergeNaming::new(
            self.source.host(),
            self.target.host(),
            &self.settings.version,
            self.settings
                .date
                .unwrap_or_else(|| Local::now().date_naive()),
        );
        let archive_name = naming.archive_name();
        let output_dir = workspace.merge_output().to_path_buf();
        let descriptor_updated = blocking(MergeStage::RewriteDescriptor, move || {
            rewrite_descriptor(&output_dir, &naming)
        })
        .await?;

        self.enter(MergeStage::Repackage);
        let (output_dir, base, name) = (
            workspace.merge_output().to_path_buf(),
            workspace.base().to_path_buf(),
            archive_name.clone(),
        );
        let merged_zip = blocking(MergeStage::Repackage, move || {
            repackage(&output_dir, &base, &name)
        })
        .await?;
        self.report_contents(&merged_zip);
        let archive_size = fs::metadata(&merged_zip)
            .map_err(|e| MergeError::new(MergeStage::Repackage, e))?
            .len();
        let kept_archive = self.keep_copy(&merged_zip);

        // 4. Upload through the target session; no retry.
        self.enter(MergeStage::Upload);
        self.target
            .upload_configuration(&merged_zip)
            .await
            .map_err(|e| MergeError::new(MergeStage::Upload, e))?;

        if self.settings.delete_staging_after {
            remove_staging(self.source, SOURCE_STAGING).await;
            remove_staging(self.target, TARGET_STAGING).await;
        }

        Ok(MergeOutcome {
            archive_name,
            archive_size,
            reconcile: summary,
            descriptor_updated,
            kept_archive,
            cleanup_failures: Vec::new(),
        })
    }

    fn report_contents(&self, merged_zip: &Path) {
        match summarize_archive(merged_zip, &self.settings.protected_dirs) {
            Ok(summary) => {
                info!(total = summary.total_entries, "merged archive entries");
                for (dir, files) in &summary.protected_files {
                    info!(dir = %dir, files, "protected directory in merged archive");
                }
            }
            Err(e) => warn!(error = %e, "could not summarize merged archive"),
        }
    }

    /// Copy the archive out of the workspace when retention is configured.
    fn keep_copy(&self, merged_zip: &Path) -> Option<PathBuf> {
        let dir = self.settings.keep_archive_dir.as_ref()?;
        let file_name = merged_zip.file_name()?;
        let dest = dir.join(file_name);
        let copied = fs::create_dir_all(dir).and_then(|_| fs::copy(merged_zip, &dest));
        match copied {
            Ok(_) => {
                info!(path = %dest.display(), "kept copy of merged archive");
                Some(dest)
            }
            Err(e) => {
                warn!(path = %dest.display(), error = %e, "could not keep merged archive");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stage helpers
// ---------------------------------------------------------------------------

/// Delete-then-create, so every run starts from a fresh snapshot. Only the
/// create is allowed to fail the run.
async fn provision(
    registry: &dyn ConfigRegistry,
    name: &str,
    description: &str,
) -> Result<(), RegistryError> {
    match registry.delete_configuration(name).await {
        Ok(()) => debug!(host = registry.host(), name, "removed previous staging configuration"),
        Err(e) if e.is_not_found() => {
            debug!(host = registry.host(), name, "no previous staging configuration")
        }
        Err(e) => warn!(
            host = registry.host(),
            name,
            error = %e,
            "could not delete previous staging configuration, continuing"
        ),
    }
    registry.create_configuration(name, Some(description)).await
}

async fn download(
    registry: &dyn ConfigRegistry,
    name: &str,
    base: &Path,
) -> Result<PathBuf, RegistryError> {
    let dest = base.join(format!("{}.zip", name));
    registry.download_configuration_to(name, &dest).await?;
    Ok(dest)
}

async fn remove_staging(registry: &dyn ConfigRegistry, name: &str) {
    if let Err(e) = registry.delete_configuration(name).await {
        warn!(host = registry.host(), name, error = %e, "could not delete staging configuration");
    }
}

async fn blocking<R, F>(stage: MergeStage, work: F) -> Result<R, MergeError>
where
    R: Send + 'static,
    F: FnOnce() -> Result<R, ArchiveError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| MergeError::new(stage, MergeCause::Worker(e.to_string())))?
        .map_err(|e| MergeError::new(stage, e))
}
