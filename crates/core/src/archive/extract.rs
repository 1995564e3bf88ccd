use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;

use tracing::{debug, instrument};
use zip::ZipArchive;

use crate::errors::ArchiveError;

fn corrupt(path: &Path, detail: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Corrupt {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

/// Unpack `zip_path` into `dest`, returning the number of files written.
///
/// Entries whose names are absolute or climb out of `dest` make the whole
/// archive corrupt; nothing outside `dest` is ever written.
#[instrument(skip_all, fields(archive = %zip_path.display()))]
pub fn extract_archive(zip_path: &Path, dest: &Path) -> Result<usize, ArchiveError> {
    let file = File::open(zip_path)?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| corrupt(zip_path, e))?;
    fs::create_dir_all(dest)?;

    let mut files = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| corrupt(zip_path, e))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(corrupt(
                zip_path,
                format!("unsafe entry path '{}'", entry.name()),
            ));
        };
        let out = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut target = File::create(&out)?;
            // Inflate errors surface as io::Error from the entry reader.
            io::copy(&mut entry, &mut target).map_err(|e| corrupt(zip_path, e))?;
        }

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o777))?;
        }
        files += 1;
    }

    debug!(files, dest = %dest.display(), "archive extracted");
    Ok(files)
}
