use crate::errors::{FlashError, FlashResult};
use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Inject `cp -f <helper> <tool_dir>;` before the first line containing `anchor`.
///
/// The installer is rewritten through a temp file and keeps its permissions.
pub fn patch_installer(
    installer: &Path,
    helper_tool: &Path,
    anchor: &str,
    tool_dir: &str,
) -> FlashResult<()> {
    let original = fs::read_to_string(installer)
        .map_err(|e| FlashError::io(format!("reading {}", installer.display()), e))?;
    let patched = insert_before_anchor(
        &original,
        anchor,
        &format!("cp -f {} {};", helper_tool.display(), tool_dir),
    )
    .ok_or_else(|| FlashError::PatchAnchorNotFound(anchor.to_string()))?;

    let mode = fs::metadata(installer)
        .map(|m| m.permissions().mode())
        .unwrap_or(0o755);
    let tmp = installer.with_extension("kflash-tmp");
    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(patched.as_bytes())?;
        file.sync_all()?;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
        fs::rename(&tmp, installer)
    };
    write().map_err(|e| {
        let _ = fs::remove_file(&tmp);
        FlashError::io(format!("rewriting {}", installer.display()), e)
    })?;

    log::info!("patched {} to copy {}", installer.display(), helper_tool.display());
    Ok(())
}

fn insert_before_anchor(text: &str, anchor: &str, line: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len() + line.len() + 1);
    let mut inserted = false;
    for current in text.split_inclusive('\n') {
        if !inserted && current.contains(anchor) {
            out.push_str(line);
            out.push('\n');
            inserted = true;
        }
        out.push_str(current);
    }
    inserted.then_some(out)
}

/// Copy the bundled helper into the working area as `name`, mode 0755.
pub fn export_helper(source: &Path, work_dir: &Path, name: &str) -> FlashResult<PathBuf> {
    let dest = work_dir.join(name);
    fs::create_dir_all(work_dir)
        .map_err(|e| FlashError::io(format!("creating {}", work_dir.display()), e))?;
    fs::copy(source, &dest).map_err(|e| {
        FlashError::io(
            format!("copying helper {} to {}", source.display(), dest.display()),
            e,
        )
    })?;
    fs::set_permissions(&dest, fs::Permissions::from_mode(0o755))
        .map_err(|e| FlashError::io(format!("chmod {}", dest.display()), e))?;
    Ok(dest)
}
