use crate::errors::{FlashError, FlashResult};
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Extract the first regular-file entry whose name ends with `entry_suffix`.
///
/// The entry lands at `dest_root/<path inside the archive>` and is made executable. Entries
/// whose names would escape `dest_root` are skipped.
pub fn extract_entry(archive: &Path, entry_suffix: &str, dest_root: &Path) -> FlashResult<PathBuf> {
    let corrupt = |reason: String| FlashError::CorruptArchive {
        path: archive.to_path_buf(),
        reason,
    };

    let file = File::open(archive)
        .map_err(|e| FlashError::io(format!("opening {}", archive.display()), e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| corrupt(e.to_string()))?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| corrupt(e.to_string()))?;
        if entry.is_dir() || !entry.name().ends_with(entry_suffix) {
            continue;
        }
        let relative = match entry.enclosed_name() {
            Some(path) => path.to_path_buf(),
            None => {
                log::warn!("skipping unsafe archive entry {}", entry.name());
                continue;
            }
        };

        let outpath = dest_root.join(relative);
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| FlashError::io(format!("creating {}", parent.display()), e))?;
        }
        let mut out = File::create(&outpath)
            .map_err(|e| FlashError::io(format!("creating {}", outpath.display()), e))?;
        io::copy(&mut entry, &mut out).map_err(|e| {
            FlashError::io(format!("extracting {} from {}", entry.name(), archive.display()), e)
        })?;
        fs::set_permissions(&outpath, fs::Permissions::from_mode(0o755))
            .map_err(|e| FlashError::io(format!("chmod {}", outpath.display()), e))?;

        log::info!("extracted {} -> {}", entry.name(), outpath.display());
        return Ok(outpath);
    }

    Err(FlashError::NotFound(entry_suffix.to_string()))
}
