use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, instrument};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::errors::ArchiveError;

/// Entry counts of a packed archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub total_entries: usize,
    /// File count below each protected directory, in the order given.
    pub protected_files: Vec<(String, usize)>,
}

/// Pack `output_dir` into `{destination_dir}/{name}.zip` and return its path.
///
/// Entry names are relative to `output_dir` and `/`-separated, directories
/// are stored as entries, siblings are visited in file-name order, and
/// every entry carries the same fixed timestamp. The same tree therefore
/// always packs to the same bytes.
#[instrument(skip_all, fields(name = %name))]
pub fn repackage(
    output_dir: &Path,
    destination_dir: &Path,
    name: &str,
) -> Result<PathBuf, ArchiveError> {
    let zip_path = destination_dir.join(format!("{}.zip", name));
    let write_error = |detail: String| ArchiveError::Write {
        path: zip_path.clone(),
        detail,
    };

    if zip_path.exists() {
        fs::remove_file(&zip_path)?;
    }

    let file = File::create(&zip_path)?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let mut entries = 0usize;
    for entry in WalkDir::new(output_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| write_error(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(output_dir)
            .map_err(|e| write_error(e.to_string()))?;
        let entry_name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            writer
                .add_directory(format!("{}/", entry_name), options)
                .map_err(|e| write_error(e.to_string()))?;
        } else {
            writer
                .start_file(entry_name, options)
                .map_err(|e| write_error(e.to_string()))?;
            let mut input = BufReader::new(File::open(entry.path())?);
            io::copy(&mut input, &mut writer)?;
        }
        entries += 1;
    }

    let mut inner = writer.finish().map_err(|e| write_error(e.to_string()))?;
    inner.flush()?;

    info!(entries, archive = %zip_path.display(), "merged archive written");
    Ok(zip_path)
}

/// Count the entries of `zip_path`, and the files below each protected
/// directory.
pub fn summarize_archive(zip_path: &Path, protected: &[String]) -> Result<ArchiveSummary, ArchiveError> {
    let archive = ZipArchive::new(BufReader::new(File::open(zip_path)?)).map_err(|e| {
        ArchiveError::Corrupt {
            path: zip_path.to_path_buf(),
            detail: e.to_string(),
        }
    })?;

    let protected_files = protected
        .iter()
        .map(|dir| {
            let prefix = format!("{}/", dir);
            let count = archive
                .file_names()
                .filter(|n| n.starts_with(&prefix) && !n.ends_with('/'))
                .count();
            (dir.clone(), count)
        })
        .collect();

    Ok(ArchiveSummary {
        total_entries: archive.len(),
        protected_files,
    })
}
