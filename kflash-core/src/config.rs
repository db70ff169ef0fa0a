//! Runtime configuration.
//!
//! Loaded from `--config`, then `KFLASH_CONFIG`, then built-in defaults that match an
//! on-device install of the manager.

use anyhow::{Context, Result};
use kflash_hal::ShellConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "KFLASH_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KflashConfig {
    pub paths: PathsConfig,
    pub shell: ShellSection,
    pub flash: FlashSection,
    pub kpm: KpmSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Private working area for flash attempts.
    pub work_dir: PathBuf,
    /// Scratch area for KPM packages before they are loaded.
    pub kpm_cache_dir: PathBuf,
    /// Persistent module store, survives reboots.
    pub module_store: PathBuf,
    /// Bundled helper copied into AnyKernel installers.
    pub helper_tool: PathBuf,
    pub ksud: PathBuf,
    pub magiskboot: PathBuf,
    pub kpmmgr: PathBuf,
    /// Where `ksud boot-patch` writes patched images.
    pub output_dir: PathBuf,
    /// Where exported flash logs go.
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let lib = PathBuf::from("/data/app/kflash/lib/arm64");
        Self {
            work_dir: PathBuf::from("/data/local/tmp/kflash/work"),
            kpm_cache_dir: PathBuf::from("/data/local/tmp/kflash/kpm"),
            module_store: PathBuf::from("/data/adb/kpm"),
            helper_tool: lib.join("libmkbootfs.so"),
            ksud: lib.join("libksud.so"),
            magiskboot: lib.join("libmagiskboot.so"),
            kpmmgr: lib.join("libkpmmgr.so"),
            output_dir: PathBuf::from("/sdcard/Download"),
            log_dir: PathBuf::from("/sdcard/Download"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub root_shell: Vec<String>,
    pub user_shell: Vec<String>,
    /// Unset means privileged processes may run forever.
    pub timeout_secs: Option<u64>,
}

impl Default for ShellSection {
    fn default() -> Self {
        let shell = ShellConfig::default();
        Self {
            root_shell: shell.root_shell,
            user_shell: shell.user_shell,
            timeout_secs: None,
        }
    }
}

impl ShellSection {
    pub fn to_shell_config(&self) -> ShellConfig {
        ShellConfig {
            root_shell: self.root_shell.clone(),
            user_shell: self.user_shell.clone(),
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Installer output keyword and the progress it stands for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMarker {
    pub keyword: String,
    pub progress: f32,
}

impl ProgressMarker {
    pub fn new(keyword: &str, progress: f32) -> Self {
        Self {
            keyword: keyword.to_string(),
            progress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashSection {
    /// Suffix of the installer entry inside a kernel package.
    pub installer_entry: String,
    pub helper_name: String,
    pub patch_anchor: String,
    /// Directory the patched installer copies the helper into.
    pub tool_dir: String,
    /// Sentinel file created in the working area on success.
    pub completion_marker: String,
    /// Optional output line that also counts as the completion signal.
    pub completion_line: Option<String>,
    /// File extensions that survive working-area cleanup.
    pub preserve_extensions: Vec<String>,
    pub markers: Vec<ProgressMarker>,
}

impl Default for FlashSection {
    fn default() -> Self {
        Self {
            installer_entry: "META-INF/com/google/android/update-binary".to_string(),
            helper_name: "mkbootfs".to_string(),
            patch_anchor: "chmod -R 755 tools bin;".to_string(),
            tool_dir: "$AKHOME/tools".to_string(),
            completion_marker: "done".to_string(),
            completion_line: None,
            preserve_extensions: vec!["jpg".to_string(), "png".to_string()],
            markers: vec![
                ProgressMarker::new("extracting", 0.75),
                ProgressMarker::new("installing", 0.85),
                ProgressMarker::new("complete", 0.95),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KpmSection {
    /// Compare the stored copy's sha256 with the staged package after an embed install.
    pub verify_embed: bool,
}

impl Default for KpmSection {
    fn default() -> Self {
        Self { verify_embed: true }
    }
}

impl KflashConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse kflash config")
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Explicit path first, then `KFLASH_CONFIG`, then defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        match env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load_from(Path::new(&path)),
            _ => {
                log::debug!("no config file given; using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Point every writable location below `root`.
    pub fn rooted_at(root: &Path) -> Self {
        let mut cfg = Self::default();
        cfg.paths.work_dir = root.join("work");
        cfg.paths.kpm_cache_dir = root.join("kpm-cache");
        cfg.paths.module_store = root.join("kpm");
        cfg.paths.output_dir = root.join("out");
        cfg.paths.log_dir = root.join("logs");
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = KflashConfig::from_toml_str(
            r#"
            [paths]
            work_dir = "/tmp/kf"

            [shell]
            root_shell = ["sh"]
            timeout_secs = 90
            "#,
        )
        .unwrap();
        assert_eq!(cfg.paths.work_dir, PathBuf::from("/tmp/kf"));
        assert_eq!(cfg.paths.module_store, PathBuf::from("/data/adb/kpm"));
        assert_eq!(cfg.shell.user_shell, vec!["sh"]);
        assert_eq!(
            cfg.shell.to_shell_config().timeout,
            Some(Duration::from_secs(90))
        );
        assert_eq!(cfg.flash.patch_anchor, "chmod -R 755 tools bin;");
        assert!(cfg.kpm.verify_embed);
    }

    #[test]
    fn env_var_selects_config_file() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kflash.toml");
        fs::write(&path, "[flash]\ncompletion_marker = \"ok\"\n").unwrap();

        env::set_var(CONFIG_ENV, &path);
        let cfg = KflashConfig::load(None);
        env::remove_var(CONFIG_ENV);

        assert_eq!(cfg.unwrap().flash.completion_marker, "ok");
    }

    #[test]
    fn invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "paths = 3").unwrap();
        let err = KflashConfig::load(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("bad.toml"));
    }
}
