//! Persisting flash logs.

use crate::flash::FlashState;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn log_file_name(unix_seconds: u64) -> String {
    format!("kflash_flash_log_{}.log", unix_seconds)
}

/// Write `state.export_log()` into `dir`, named after the current time.
pub fn write_log(dir: &Path, state: &FlashState) -> Result<PathBuf> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    write_log_at(dir, state, now)
}

pub fn write_log_at(dir: &Path, state: &FlashState, unix_seconds: u64) -> Result<PathBuf> {
    let path = dir.join(log_file_name(unix_seconds));
    write_atomic(&path, state.export_log().as_bytes())?;
    log::info!("flash log written to {}", path.display());
    Ok(path)
}

/// Serialize a snapshot as pretty JSON into `path`.
pub fn write_snapshot(path: &Path, state: &FlashState) -> Result<()> {
    let payload = serde_json::to_string_pretty(state).context("Failed to serialize flash state")?;
    write_atomic(path, payload.as_bytes())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp file: {}", tmp_path.display()))?;
    file.write_all(bytes).context("Failed to write log")?;
    file.sync_all().context("Failed to flush log")?;

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to atomically replace {}", path.display()))?;
    Ok(())
}
