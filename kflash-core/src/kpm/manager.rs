use super::info::{extract_module_name, is_elf, parse_module_info, parse_module_list, KpmModuleInfo};
use crate::config::KflashConfig;
use crate::errors::{FlashError, KpmError, KpmResult};
use crate::flash::{PackageStager, WorkingArea};
use kflash_hal::{shell_quote, CommandOutput, ContentHandle, DeviceHal};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, TryLockError};

const STAGED_NAME: &str = "module.kpm";

/// Result of a successful unload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallOutcome {
    pub store_file_removed: bool,
    /// Set when store cleanup or the list refresh failed; the module is unloaded regardless.
    pub warning: Option<String>,
    /// Refreshed module list, empty when the refresh failed.
    pub modules: Vec<KpmModuleInfo>,
}

/// Install, unload, control and list loadable kernel modules through `kpmmgr`.
///
/// Only one operation runs at a time; a concurrent call gets [`KpmError::Busy`].
pub struct KpmModuleManager<'a, H: DeviceHal + ?Sized> {
    hal: &'a H,
    config: &'a KflashConfig,
    cache: WorkingArea,
    busy: Mutex<()>,
}

impl<'a, H: DeviceHal + ?Sized> KpmModuleManager<'a, H> {
    pub fn new(hal: &'a H, config: &'a KflashConfig) -> Self {
        Self {
            hal,
            config,
            cache: WorkingArea::new(&config.paths.kpm_cache_dir, &[]),
            busy: Mutex::new(()),
        }
    }

    /// `<store>/<id>.kpm`. Ids that could leave the store directory are refused.
    pub fn store_path(&self, id: &str) -> KpmResult<PathBuf> {
        if !is_valid_module_id(id) {
            return Err(KpmError::InvalidModuleId(id.to_string()));
        }
        Ok(self.config.paths.module_store.join(format!("{}.kpm", id)))
    }

    /// Stage `source`, optionally copy it into the module store, then load it.
    pub fn install(&self, source: &ContentHandle, embed: bool) -> KpmResult<Vec<KpmModuleInfo>> {
        let _busy = self.acquire()?;
        let staged = PackageStager::new(self.hal, &self.cache).stage(source, STAGED_NAME)?;

        let result = self.load_staged(&staged, embed);
        if let Err(err) = self.cache.clear() {
            log::warn!("failed to clear KPM cache: {}", err);
        }
        result?;
        self.list_modules()
    }

    fn load_staged(&self, staged: &Path, embed: bool) -> KpmResult<()> {
        let bytes = fs::read(staged)
            .map_err(|e| FlashError::io(format!("reading {}", staged.display()), e))?;
        let label = staged.display().to_string();
        if !is_elf(&bytes) {
            return Err(KpmError::InvalidPackage(label));
        }
        let id = extract_module_name(&bytes)
            .filter(|id| is_valid_module_id(id))
            .ok_or(KpmError::ModuleIdNotFound(label))?;
        log::info!("installing KPM module {} (embed={})", id, embed);

        if embed {
            self.embed(staged, &id, &bytes)?;
        }

        let output = self.kpmmgr(&format!("load {}", quote_path(staged)))?;
        if let Some(message) = failure_message(&output) {
            return Err(KpmError::LoadFailed(message));
        }
        log::info!("KPM module {} loaded", id);
        Ok(())
    }

    fn embed(&self, staged: &Path, id: &str, bytes: &[u8]) -> KpmResult<()> {
        let store = &self.config.paths.module_store;
        let target = self.store_path(id)?;
        let copy = format!(
            "mkdir -p {} && cp -f {} {}",
            quote_path(store),
            quote_path(staged),
            quote_path(&target)
        );
        let output = self.hal.run_capture(&copy, true)?;
        if !output.success() {
            return Err(KpmError::StoreCopy(format!(
                "exit {}: {}",
                output.code,
                output.stderr_text()
            )));
        }

        if self.config.kpm.verify_embed {
            let expected = format!("{:x}", Sha256::digest(bytes));
            let output = self
                .hal
                .run_capture(&format!("sha256sum {}", quote_path(&target)), true)?;
            let actual = output
                .stdout_text()
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            if actual != expected {
                return Err(KpmError::IntegrityMismatch {
                    id: id.to_string(),
                    expected,
                    actual,
                });
            }
        }
        log::info!("KPM module {} stored at {}", id, target.display());
        Ok(())
    }

    /// Unload `id`, then drop its store file. Only the unload can fail the call.
    pub fn uninstall(&self, id: &str) -> KpmResult<UninstallOutcome> {
        let _busy = self.acquire()?;
        let store_file = self.store_path(id)?;

        let output = self.kpmmgr(&format!("unload {}", shell_quote(id)))?;
        if let Some(message) = failure_message(&output) {
            return Err(KpmError::UnloadFailed {
                id: id.to_string(),
                message,
            });
        }
        log::info!("KPM module {} unloaded", id);

        let mut warnings = Vec::new();
        let store_file_removed = match self.remove_store_file(&store_file) {
            Ok(removed) => removed,
            Err(message) => {
                warnings.push(message);
                false
            }
        };
        let modules = self.list_modules().unwrap_or_else(|err| {
            warnings.push(format!("failed to refresh module list: {}", err));
            Vec::new()
        });
        for message in &warnings {
            log::warn!("{}", message);
        }

        Ok(UninstallOutcome {
            store_file_removed,
            warning: (!warnings.is_empty()).then(|| warnings.join("; ")),
            modules,
        })
    }

    /// `Ok(false)` when there was no store file to remove.
    fn remove_store_file(&self, path: &Path) -> Result<bool, String> {
        let target = quote_path(path);
        let present = self
            .hal
            .run_capture(&format!("ls {}", target), true)
            .map_err(|err| format!("failed to check {}: {}", target, err))?
            .success();
        if !present {
            return Ok(false);
        }
        match self.hal.run_capture(&format!("rm -f {}", target), true) {
            Ok(output) if output.success() => Ok(true),
            Ok(output) => Err(format!(
                "failed to remove {} (exit {}): {}",
                target,
                output.code,
                output.stderr_text()
            )),
            Err(err) => Err(format!("failed to remove {}: {}", target, err)),
        }
    }

    /// Pass `args` to a loaded module and return `kpmmgr`'s exit code.
    pub fn control(&self, id: &str, args: &str) -> KpmResult<i32> {
        let _busy = self.acquire()?;
        let output = self.kpmmgr(&format!(
            "control {} {}",
            shell_quote(id),
            shell_quote(args)
        ))?;
        log::info!("KPM control {} exited with {}", id, output.code);
        Ok(output.code)
    }

    pub fn list(&self) -> KpmResult<Vec<KpmModuleInfo>> {
        let _busy = self.acquire()?;
        self.list_modules()
    }

    /// Number of loaded modules; unparsable output counts as zero.
    pub fn count(&self) -> KpmResult<usize> {
        let _busy = self.acquire()?;
        Ok(self.kpmmgr("num")?.stdout_text().parse().unwrap_or(0))
    }

    pub fn version(&self) -> KpmResult<String> {
        let _busy = self.acquire()?;
        Ok(self.kpmmgr("version")?.stdout_text())
    }

    /// Raw `kpmmgr info` text for one module.
    pub fn detail(&self, id: &str) -> KpmResult<String> {
        let _busy = self.acquire()?;
        Ok(self.kpmmgr(&format!("info {}", shell_quote(id)))?.stdout_text())
    }

    fn list_modules(&self) -> KpmResult<Vec<KpmModuleInfo>> {
        let names = parse_module_list(&self.kpmmgr("list")?.stdout_text());
        let mut modules = Vec::with_capacity(names.len());
        for name in names {
            match self.kpmmgr(&format!("info {}", shell_quote(&name))) {
                Ok(output) => {
                    let text = output.stdout_text();
                    if text.is_empty() {
                        log::debug!("KPM module {} has no info; skipping", name);
                        continue;
                    }
                    modules.push(parse_module_info(&name, &text));
                }
                Err(err) => log::warn!("failed to query KPM module {}: {}", name, err),
            }
        }
        Ok(modules)
    }

    fn kpmmgr(&self, args: &str) -> KpmResult<CommandOutput> {
        let command = format!("{} {}", quote_path(&self.config.paths.kpmmgr), args);
        log::debug!("kpm: {}", command);
        Ok(self.hal.run_capture(&command, true)?)
    }

    fn acquire(&self) -> KpmResult<MutexGuard<'_, ()>> {
        match self.busy.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(KpmError::Busy),
        }
    }
}

/// `kpmmgr` reports failure with a non-zero exit or an `Error...` line.
fn failure_message(output: &CommandOutput) -> Option<String> {
    let stdout = output.stdout_text();
    if output.success() && !stdout.starts_with("Error") {
        return None;
    }
    let stderr = output.stderr_text();
    Some(match (stdout.is_empty(), stderr.is_empty()) {
        (false, _) => stdout,
        (true, false) => stderr,
        (true, true) => format!("exit code {}", output.code),
    })
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

/// Module ids name a single file in the store.
fn is_valid_module_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\', '\0'])
}
