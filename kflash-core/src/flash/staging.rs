use crate::errors::{FlashError, FlashResult};
use kflash_hal::{ContentHandle, ContentOps};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Private directory owned by one operation at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingArea {
    root: PathBuf,
    preserve: Vec<String>,
}

impl WorkingArea {
    pub fn new(root: impl Into<PathBuf>, preserve_extensions: &[String]) -> Self {
        Self {
            root: root.into(),
            preserve: preserve_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.root.join(name)
    }

    /// Remove every file below the root except preserved assets. Directories are kept.
    ///
    /// Returns the number of files removed.
    pub fn clear(&self) -> FlashResult<usize> {
        fs::create_dir_all(&self.root).map_err(|e| {
            FlashError::io(format!("creating working area {}", self.root.display()), e)
        })?;

        let mut removed = 0;
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(|e| {
                let context = format!("scanning working area {}", self.root.display());
                FlashError::io(context, e.into())
            })?;
            if entry.file_type().is_dir() || self.is_preserved(entry.path()) {
                continue;
            }
            fs::remove_file(entry.path())
                .map_err(|e| FlashError::io(format!("removing {}", entry.path().display()), e))?;
            removed += 1;
        }
        log::debug!("cleared {} file(s) from {}", removed, self.root.display());
        Ok(removed)
    }

    fn is_preserved(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.preserve.iter().any(|p| p.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// Copies user content into a [`WorkingArea`].
pub struct PackageStager<'a, C: ContentOps + ?Sized> {
    content: &'a C,
    area: &'a WorkingArea,
}

impl<'a, C: ContentOps + ?Sized> PackageStager<'a, C> {
    pub fn new(content: &'a C, area: &'a WorkingArea) -> Self {
        Self { content, area }
    }

    /// Clear the area, then copy `source` into it under its display name.
    pub fn stage(&self, source: &ContentHandle, fallback_name: &str) -> FlashResult<PathBuf> {
        self.area.clear()?;
        self.stage_into_current(source, fallback_name)
    }

    /// Copy `source` in without clearing first; `fallback_name` is used when the source has
    /// no usable display name.
    pub fn stage_into_current(
        &self,
        source: &ContentHandle,
        fallback_name: &str,
    ) -> FlashResult<PathBuf> {
        self.stage_as(source, &staged_name(self.content.display_name(source), fallback_name))
    }

    /// Copy `source` into the area as `name`.
    pub fn stage_as(&self, source: &ContentHandle, name: &str) -> FlashResult<PathBuf> {
        let name = staged_name(Some(name.to_string()), "input");
        let dest = self.area.join(&name);
        log::info!("staging {} -> {}", source, dest.display());

        let mut reader = self.content.open_read(source)?;
        fs::create_dir_all(self.area.root()).map_err(|e| {
            FlashError::io(format!("creating {}", self.area.root().display()), e)
        })?;
        let mut file = File::create(&dest)
            .map_err(|e| FlashError::io(format!("creating {}", dest.display()), e))?;
        let copied = io::copy(&mut reader, &mut file)
            .map_err(|e| FlashError::io(format!("copying {} to {}", source, dest.display()), e))?;
        file.flush()
            .and_then(|_| file.sync_all())
            .map_err(|e| FlashError::io(format!("syncing {}", dest.display()), e))?;

        let size = fs::metadata(&dest)
            .map_err(|e| FlashError::io(format!("checking {}", dest.display()), e))?
            .len();
        if size == 0 || size != copied {
            return Err(FlashError::io(
                format!("staging {}", source),
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("staged file is {} bytes, expected {}", size, copied),
                ),
            ));
        }
        log::info!("staged {} ({} bytes)", dest.display(), size);
        Ok(dest)
    }
}

/// Reduce a display name to a bare, safe file name.
fn staged_name(display: Option<String>, fallback: &str) -> String {
    display
        .as_deref()
        .and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}
