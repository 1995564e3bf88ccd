use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, instrument};
use walkdir::WalkDir;

use crate::errors::ArchiveError;
use crate::workspace::force_remove_tree;

/// What happened to one protected directory during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectedAction {
    /// The target's copy now sits in the output.
    TakenFromTarget { files: usize },
    /// The source had it, the target did not; it is gone from the output.
    Removed,
    /// Neither bundle had it.
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedOutcome {
    pub name: String,
    pub action: ProtectedAction,
}

/// Counts reported after a reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub files_from_source: usize,
    pub protected: Vec<ProtectedOutcome>,
}

fn tree_error(action: &'static str, path: &Path, source: std::io::Error) -> ArchiveError {
    ArchiveError::Tree {
        action,
        path: path.to_path_buf(),
        source,
    }
}

/// Recursively copy `src` (a directory or a single file) to `dst`.
/// Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<usize, ArchiveError> {
    let mut files = 0;
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
            tree_error("read", &path, e.into())
        })?;
        let relative = entry.path().strip_prefix(src).unwrap_or(Path::new(""));
        let dest: PathBuf = if relative.as_os_str().is_empty() {
            dst.to_path_buf()
        } else {
            dst.join(relative)
        };

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(|e| tree_error("create", &dest, e))?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| tree_error("create", parent, e))?;
            }
            fs::copy(entry.path(), &dest).map_err(|e| tree_error("copy", entry.path(), e))?;
            files += 1;
        }
    }
    Ok(files)
}

/// Merge two extracted bundles into `output_dir`.
///
/// Copy-all-then-overlay: every entry of `source_dir` is copied, then each
/// name in `protected` is removed from the output and replaced by the
/// target's copy when the target has one. There is no per-file merging
/// inside protected directories.
#[instrument(skip_all, fields(output = %output_dir.display()))]
pub fn reconcile(
    source_dir: &Path,
    target_dir: &Path,
    output_dir: &Path,
    protected: &[String],
) -> Result<ReconcileSummary, ArchiveError> {
    let files_from_source = copy_tree(source_dir, output_dir)?;
    info!(files = files_from_source, "copied source bundle");

    let mut summary = ReconcileSummary {
        files_from_source,
        protected: Vec::with_capacity(protected.len()),
    };

    for name in protected {
        let merged = output_dir.join(name);
        let existed = merged.exists();
        if existed {
            if let Some(failure) = force_remove_tree(&merged).into_iter().next() {
                return Err(tree_error("remove", &failure.path, failure.cause));
            }
        }

        let from_target = target_dir.join(name);
        let action = if from_target.exists() {
            let files = copy_tree(&from_target, &merged)?;
            info!(dir = %name, files, "protected directory taken from target");
            ProtectedAction::TakenFromTarget { files }
        } else if existed {
            info!(dir = %name, "protected directory removed, target has none");
            ProtectedAction::Removed
        } else {
            ProtectedAction::Absent
        };

        summary.protected.push(ProtectedOutcome {
            name: name.clone(),
            action,
        });
    }

    Ok(summary)
}
