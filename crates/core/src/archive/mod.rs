//! Archive reconciler.
//!
//! Turns two extracted saved-configuration bundles into one: everything is
//! taken from the source bundle, then the protected directories are replaced
//! wholesale by the target's copies. The embedded descriptor is renamed and
//! the tree is packed again with deterministic entry order and timestamps.

mod descriptor;
mod extract;
mod package;
mod reconcile;

pub use descriptor::{rewrite_descriptor, DescriptorDocument, MergeNaming, DEFAULT_VERSION};
pub use extract::extract_archive;
pub use package::{repackage, summarize_archive, ArchiveSummary};
pub use reconcile::{copy_tree, reconcile, ProtectedAction, ProtectedOutcome, ReconcileSummary};

/// Directories always taken from the target bundle.
pub const PROTECTED_DIRS: &[&str] = &["licensemanager", "tomcat", "security"];

/// Metadata document at the root of every bundle.
pub const DESCRIPTOR_FILE: &str = "descriptor.xml";
