//! Ephemeral per-run merge workspace and forced recursive removal.
//!
//! A [`MergeWorkspace`] is a fresh OS temporary directory holding the two
//! downloaded bundles, their extract directories and the merge output. It
//! is removed when [`MergeWorkspace::destroy`] is called or, failing that,
//! when it is dropped. Removal never aborts part-way: every entry that
//! cannot be deleted is collected as a [`RemovalFailure`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::errors::WorkspaceError;

/// Extract directory of the source bundle.
pub const SOURCE_EXTRACT_DIR: &str = "source";
/// Extract directory of the target bundle.
pub const TARGET_EXTRACT_DIR: &str = "target";
/// Reconciled tree that gets repackaged.
pub const MERGE_OUTPUT_DIR: &str = "mergeFile";

const WORKSPACE_PREFIX: &str = "consolesync-merge-";

// ---------------------------------------------------------------------------
// Forced removal
// ---------------------------------------------------------------------------

/// One entry that could not be removed.
#[derive(Debug)]
pub struct RemovalFailure {
    pub path: PathBuf,
    pub cause: io::Error,
}

impl std::fmt::Display for RemovalFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.cause)
    }
}

/// Remove `path` and everything below it, bottom-up.
///
/// Directories are made writable before they are read and every entry is
/// made writable before it is deleted, so read-only trees produced by
/// extraction are removable. A missing `path` is not a failure.
pub fn force_remove_tree(path: &Path) -> Vec<RemovalFailure> {
    let mut failures = Vec::new();
    match fs::symlink_metadata(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return failures,
        Err(e) => failures.push(RemovalFailure {
            path: path.to_path_buf(),
            cause: e,
        }),
        Ok(meta) if meta.is_dir() => {
            remove_contents(path, &mut failures);
            record(&mut failures, path, fs::remove_dir(path));
        }
        Ok(_) => {
            make_writable(path, false);
            record(&mut failures, path, fs::remove_file(path));
        }
    }
    log_failures(path, &failures);
    failures
}

/// Remove everything below `path`, keeping `path` itself.
pub fn clear_directory(path: &Path) -> Vec<RemovalFailure> {
    let mut failures = Vec::new();
    if path.is_dir() {
        remove_contents(path, &mut failures);
    }
    log_failures(path, &failures);
    failures
}

fn remove_contents(dir: &Path, failures: &mut Vec<RemovalFailure>) {
    make_writable(dir, true);
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            failures.push(RemovalFailure {
                path: dir.to_path_buf(),
                cause: e,
            });
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                failures.push(RemovalFailure {
                    path: dir.to_path_buf(),
                    cause: e,
                });
                continue;
            }
        };
        let path = entry.path();
        // file_type() does not follow symlinks, so a link to a directory is
        // unlinked rather than descended into.
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => {
                remove_contents(&path, failures);
                record(failures, &path, fs::remove_dir(&path));
            }
            Ok(ft) => {
                if !ft.is_symlink() {
                    make_writable(&path, false);
                }
                record(failures, &path, fs::remove_file(&path));
            }
            Err(e) => failures.push(RemovalFailure { path, cause: e }),
        }
    }
}

fn record(failures: &mut Vec<RemovalFailure>, path: &Path, result: io::Result<()>) {
    if let Err(cause) = result {
        failures.push(RemovalFailure {
            path: path.to_path_buf(),
            cause,
        });
    }
}

/// Add owner write permission (plus traverse for directories). Errors are
/// ignored here; the delete that follows reports them.
fn make_writable(path: &Path, is_dir: bool) {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    let mut perms = meta.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let extra = if is_dir { 0o700 } else { 0o600 };
        if perms.mode() & extra == extra {
            return;
        }
        perms.set_mode(perms.mode() | extra);
    }
    #[cfg(not(unix))]
    {
        let _ = is_dir;
        if !perms.readonly() {
            return;
        }
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
    }
    if let Err(e) = fs::set_permissions(path, perms) {
        debug!(path = %path.display(), error = %e, "could not make entry writable");
    }
}

fn log_failures(root: &Path, failures: &[RemovalFailure]) {
    for failure in failures {
        warn!(root = %root.display(), "could not delete {}", failure);
    }
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Temporary directory tree owned by one merge run.
#[derive(Debug)]
pub struct MergeWorkspace {
    root: Option<TempDir>,
    base: PathBuf,
    source_extract: PathBuf,
    target_extract: PathBuf,
    merge_output: PathBuf,
}

impl MergeWorkspace {
    /// Allocate a unique workspace under the OS temporary directory.
    pub fn create() -> Result<Self, WorkspaceError> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir()?;
        Self::populate(dir)
    }

    /// Allocate a unique workspace under `parent`, creating it if needed.
    pub fn create_in(parent: &Path) -> Result<Self, WorkspaceError> {
        fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(parent)?;
        Self::populate(dir)
    }

    fn populate(dir: TempDir) -> Result<Self, WorkspaceError> {
        let base = dir.path().to_path_buf();
        let source_extract = base.join(SOURCE_EXTRACT_DIR);
        let target_extract = base.join(TARGET_EXTRACT_DIR);
        let merge_output = base.join(MERGE_OUTPUT_DIR);
        for sub in [&source_extract, &target_extract, &merge_output] {
            fs::create_dir(sub)?;
        }
        info!(base = %base.display(), "allocated merge workspace");
        Ok(Self {
            root: Some(dir),
            base,
            source_extract,
            target_extract,
            merge_output,
        })
    }

    /// Workspace root; downloaded bundles and the output archive live here.
    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn source_extract(&self) -> &Path {
        &self.source_extract
    }

    pub fn target_extract(&self) -> &Path {
        &self.target_extract
    }

    pub fn merge_output(&self) -> &Path {
        &self.merge_output
    }

    /// Remove the whole workspace and report what could not be deleted.
    pub fn destroy(mut self) -> Vec<RemovalFailure> {
        self.release()
    }

    fn release(&mut self) -> Vec<RemovalFailure> {
        let Some(dir) = self.root.take() else {
            return Vec::new();
        };
        let failures = force_remove_tree(dir.path());
        if failures.is_empty() {
            debug!(base = %self.base.display(), "merge workspace removed");
        } else {
            warn!(
                base = %self.base.display(),
                failures = failures.len(),
                "merge workspace only partially removed"
            );
        }
        // TempDir's own cleanup finds nothing left (or retries the leftovers).
        drop(dir);
        failures
    }
}

impl Drop for MergeWorkspace {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_tree(root: &Path) {
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("top.txt"), "top").unwrap();
        fs::write(root.join("a/one.txt"), "1").unwrap();
        fs::write(root.join("a/b/c/deep.txt"), "deep").unwrap();
    }

    #[cfg(unix)]
    fn make_read_only(root: &Path) {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(root.join("a/b/c/deep.txt"), fs::Permissions::from_mode(0o444))
            .unwrap();
        fs::set_permissions(root.join("a/b/c"), fs::Permissions::from_mode(0o555)).unwrap();
        fs::set_permissions(root.join("a/b"), fs::Permissions::from_mode(0o555)).unwrap();
    }

    #[test]
    fn test_create_allocates_disjoint_subdirectories() {
        let ws = MergeWorkspace::create().unwrap();
        assert!(ws.source_extract().is_dir());
        assert!(ws.target_extract().is_dir());
        assert!(ws.merge_output().is_dir());
        assert_ne!(ws.source_extract(), ws.target_extract());
        assert!(ws.merge_output().starts_with(ws.base()));
        assert!(ws
            .base()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(WORKSPACE_PREFIX));
    }

    #[test]
    fn test_two_workspaces_never_collide() {
        let a = MergeWorkspace::create().unwrap();
        let b = MergeWorkspace::create().unwrap();
        assert_ne!(a.base(), b.base());
    }

    #[test]
    fn test_destroy_removes_read_only_tree() {
        let ws = MergeWorkspace::create().unwrap();
        let base = ws.base().to_path_buf();
        build_tree(ws.merge_output());
        #[cfg(unix)]
        make_read_only(ws.merge_output());

        let failures = ws.destroy();
        assert!(failures.is_empty(), "unexpected failures: {failures:?}");
        assert!(!base.exists());
    }

    #[test]
    fn test_drop_removes_workspace() {
        let base = {
            let ws = MergeWorkspace::create().unwrap();
            fs::write(ws.base().join("source_Merge.zip"), b"zip").unwrap();
            ws.base().to_path_buf()
        };
        assert!(!base.exists());
    }

    #[test]
    fn test_create_in_uses_parent() {
        let parent = tempfile::tempdir().unwrap();
        let nested = parent.path().join("work");
        let ws = MergeWorkspace::create_in(&nested).unwrap();
        assert!(ws.base().starts_with(&nested));
    }

    #[test]
    fn test_clear_directory_keeps_root() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());
        #[cfg(unix)]
        make_read_only(dir.path());

        let failures = clear_directory(dir.path());
        assert!(failures.is_empty());
        assert!(dir.path().is_dir());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_force_remove_missing_path_is_not_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        assert!(force_remove_tree(&dir.path().join("nope")).is_empty());
    }

    #[test]
    fn test_force_remove_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("merged.zip");
        fs::write(&file, b"x").unwrap();
        assert!(force_remove_tree(&file).is_empty());
        assert!(!file.exists());
    }
}
