use env_logger::Target;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const DEFAULT_LOG_FILE: &str = "/data/local/tmp/kflash/kflash.log";

/// Initialise logging, appending to `log_file` (or the default location).
///
/// Falls back to stderr when the file cannot be created (read-only FS, no permission).
/// `RUST_LOG` still overrides the `info` default.
pub fn init_with(log_file: Option<PathBuf>) {
    let path = log_file.unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));
    let target = open_target(&path).unwrap_or(Target::Stderr);

    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .target(target)
        .try_init();
}

fn open_target(path: &Path) -> io::Result<Target> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Target::Pipe(Box::new(file)))
}
