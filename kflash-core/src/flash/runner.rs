//! Flash orchestration.
//!
//! [`FlashRunner::run`] drives one [`InstallRequest`] from `Idle` to a terminal state:
//!
//! 1. resolve the target slot (fails before anything touches the disk)
//! 2. clear the working area and stage the input
//! 3. kernel packages only: extract the installer and patch it to copy the bundled helper
//! 4. check for root, switch the slot property when needed
//! 5. run the installer (or `ksud boot-patch`) and require exit 0 plus the completion marker

use super::archive::extract_entry;
use super::patch::{export_helper, patch_installer};
use super::progress::Milestone;
use super::request::{InstallMethod, InstallRequest, LkmSelection, Slot};
use super::slot::{self, DeviceSlots, SlotPlan, SLOT_SUFFIX_PROP};
use super::staging::{PackageStager, WorkingArea};
use super::state::FlashStateMachine;
use crate::config::KflashConfig;
use crate::errors::{FlashError, FlashResult};
use kflash_hal::{shell_quote, ContentHandle, DeviceHal, PropGuard};
use std::fs;
use std::path::{Path, PathBuf};

const PACKAGE_NAME: &str = "kernel.zip";
const BOOT_IMAGE_NAME: &str = "boot.img";
const LKM_NAME: &str = "kflash-tmp-lkm.ko";

pub struct FlashRunner<'a, H: DeviceHal + ?Sized> {
    hal: &'a H,
    config: &'a KflashConfig,
    area: WorkingArea,
}

impl<'a, H: DeviceHal + ?Sized> FlashRunner<'a, H> {
    pub fn new(hal: &'a H, config: &'a KflashConfig) -> Self {
        let area = WorkingArea::new(&config.paths.work_dir, &config.flash.preserve_extensions);
        Self { hal, config, area }
    }

    /// Run `request` to completion, recording everything in `machine`.
    ///
    /// Any error is also recorded as the machine's terminal `Failed` state.
    pub fn run(&self, request: &InstallRequest, machine: &mut FlashStateMachine) -> FlashResult<()> {
        machine.begin(request.method.label())?;
        log::info!("flash started: {}", request.method.label());

        match self.execute(request, machine) {
            Ok(()) => {
                machine.complete()?;
                log::info!("flash completed");
                Ok(())
            }
            Err(err) => {
                log::error!("flash failed: {}", err);
                machine.fail(&err.to_string())?;
                Err(err)
            }
        }
    }

    fn execute(&self, request: &InstallRequest, machine: &mut FlashStateMachine) -> FlashResult<()> {
        let device = match request.method {
            InstallMethod::DirectInstallToInactiveSlot | InstallMethod::PatchedKernelPackage(_) => {
                DeviceSlots::probe(self.hal)?
            }
            InstallMethod::SelectedFile(_) | InstallMethod::DirectInstall => DeviceSlots::single(),
        };
        let plan = slot::resolve(request, &device)?;

        match &request.method {
            InstallMethod::PatchedKernelPackage(source) => {
                self.flash_package(source, plan, machine)
            }
            InstallMethod::SelectedFile(image) => {
                self.patch_boot(Some(image), &request.lkm, plan, machine)
            }
            InstallMethod::DirectInstall | InstallMethod::DirectInstallToInactiveSlot => {
                self.patch_boot(None, &request.lkm, plan, machine)
            }
        }
    }

    fn flash_package(
        &self,
        source: &ContentHandle,
        plan: SlotPlan,
        machine: &mut FlashStateMachine,
    ) -> FlashResult<()> {
        let flash = &self.config.flash;

        machine.milestone(Milestone::Cleaning)?;
        self.area.clear()?;

        machine.milestone(Milestone::Copying)?;
        let stager = PackageStager::new(self.hal, &self.area);
        let package = stager.stage_into_current(source, PACKAGE_NAME)?;

        machine.milestone(Milestone::Extracting)?;
        let installer = extract_entry(&package, &flash.installer_entry, self.area.root())?;

        machine.milestone(Milestone::Patching)?;
        let helper = export_helper(
            &self.config.paths.helper_tool,
            self.area.root(),
            &flash.helper_name,
        )?;
        patch_installer(&installer, &helper, &flash.patch_anchor, &flash.tool_dir)?;

        self.require_root()?;
        machine.milestone(Milestone::Flashing)?;

        let target = plan.target.filter(|_| plan.switch_suffix);
        let guard = match target {
            Some(slot) => {
                machine.milestone(Milestone::ReadingSlot)?;
                machine.milestone(Milestone::SwitchingSlot)?;
                Some(PropGuard::set(self.hal, SLOT_SUFFIX_PROP, &slot.suffix())?)
            }
            None => None,
        };

        let script = package_script(
            self.area.root(),
            &installer,
            &package,
            target,
            &self.sentinel(),
        );
        let (code, saw_line) = self.stream(&script, machine)?;

        if let Some(guard) = guard {
            machine.milestone(Milestone::RestoringSlot)?;
            drop(guard);
        }
        self.check_completion(code, saw_line)
    }

    fn patch_boot(
        &self,
        image: Option<&ContentHandle>,
        lkm: &LkmSelection,
        plan: SlotPlan,
        machine: &mut FlashStateMachine,
    ) -> FlashResult<()> {
        machine.milestone(Milestone::Cleaning)?;
        self.area.clear()?;

        machine.milestone(Milestone::Copying)?;
        let stager = PackageStager::new(self.hal, &self.area);
        let boot = image
            .map(|handle| stager.stage_as(handle, BOOT_IMAGE_NAME))
            .transpose()?;
        let lkm = match lkm {
            LkmSelection::None => BootLkm::Auto,
            LkmSelection::Module(handle) => BootLkm::File(stager.stage_as(handle, LKM_NAME)?),
            LkmSelection::Kmi(kmi) => BootLkm::Kmi(kmi.clone()),
        };

        self.require_root()?;
        machine.milestone(Milestone::Flashing)?;

        let command = self.boot_patch_command(boot.as_deref(), &lkm, plan.ota);
        let outcome = self.stream(&command, machine);

        for staged in boot.iter().chain(lkm.staged_file()) {
            if let Err(err) = fs::remove_file(staged) {
                log::warn!("failed to remove {}: {}", staged.display(), err);
            }
        }
        let (code, saw_line) = outcome?;
        self.check_completion(code, saw_line)
    }

    fn boot_patch_command(&self, boot: Option<&Path>, lkm: &BootLkm, ota: bool) -> String {
        let paths = &self.config.paths;
        let mut cmd = format!(
            "{} boot-patch --magiskboot {}",
            quote_path(&paths.ksud),
            quote_path(&paths.magiskboot)
        );
        match boot {
            Some(image) => cmd.push_str(&format!(" -b {}", quote_path(image))),
            None => cmd.push_str(" -f"),
        }
        if ota {
            cmd.push_str(" -u");
        }
        match lkm {
            BootLkm::Auto => {}
            BootLkm::File(path) => cmd.push_str(&format!(" -m {}", quote_path(path))),
            BootLkm::Kmi(kmi) => cmd.push_str(&format!(" --kmi {}", shell_quote(kmi))),
        }
        cmd.push_str(&format!(
            " -o {} && touch {}",
            quote_path(&paths.output_dir),
            quote_path(&self.sentinel())
        ));
        cmd
    }

    fn require_root(&self) -> FlashResult<()> {
        if self.hal.root_available() {
            Ok(())
        } else {
            Err(FlashError::RootUnavailable)
        }
    }

    /// Run `script` elevated, feeding every output line to the machine.
    fn stream(&self, script: &str, machine: &mut FlashStateMachine) -> FlashResult<(i32, bool)> {
        log::debug!("root shell script:\n{}", script);
        let mut process = self.hal.spawn_shell(script, true)?;
        let completion_line = self.config.flash.completion_line.as_deref();
        let mut saw_line = false;

        while let Some(line) = process.next_line()? {
            if let Some(expected) = completion_line {
                saw_line |= !expected.is_empty() && line.text.contains(expected);
            }
            machine.record_line(&line.text)?;
        }
        let code = process.wait()?;
        log::info!("installer exited with code {}", code);
        Ok((code, saw_line))
    }

    fn check_completion(&self, code: i32, saw_line: bool) -> FlashResult<()> {
        if code != 0 {
            return Err(FlashError::ProcessExit { code });
        }
        if saw_line || self.sentinel().exists() {
            Ok(())
        } else {
            Err(FlashError::MissingCompletionMarker)
        }
    }

    fn sentinel(&self) -> PathBuf {
        self.area.join(&self.config.flash.completion_marker)
    }
}

enum BootLkm {
    Auto,
    File(PathBuf),
    Kmi(String),
}

impl BootLkm {
    fn staged_file(&self) -> Option<&PathBuf> {
        match self {
            BootLkm::File(path) => Some(path),
            BootLkm::Auto | BootLkm::Kmi(_) => None,
        }
    }
}

/// Root-shell script that runs an extracted AnyKernel installer and touches `sentinel` on success.
pub fn package_script(
    work: &Path,
    installer: &Path,
    package: &Path,
    slot: Option<Slot>,
    sentinel: &Path,
) -> String {
    let bootslot = work.join("bootslot");
    let mut script = format!("export POSTINSTALL={}\n", quote_path(work));
    if let Some(slot) = slot {
        script.push_str(&format!("echo \"{}\" > {}\n", slot, quote_path(&bootslot)));
    }
    script.push_str(&format!(
        "sh {} 3 1 {}",
        quote_path(installer),
        quote_path(package)
    ));
    if slot.is_some() {
        script.push_str(&format!(" \"$(cat {})\"", quote_path(&bootslot)));
    }
    script.push_str(&format!(" && touch {}", quote_path(sentinel)));
    script
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::FlashPhase;
    use kflash_hal::FakeHal;

    #[test]
    fn package_script_without_slot() {
        let script = package_script(
            Path::new("/w"),
            Path::new("/w/META-INF/com/google/android/update-binary"),
            Path::new("/w/ak3.zip"),
            None,
            Path::new("/w/done"),
        );
        assert_eq!(
            script,
            "export POSTINSTALL=/w\nsh /w/META-INF/com/google/android/update-binary 3 1 /w/ak3.zip && touch /w/done"
        );
    }

    #[test]
    fn package_script_passes_slot_through_bootslot() {
        let script = package_script(
            Path::new("/w"),
            Path::new("/w/ub"),
            Path::new("/w/k.zip"),
            Some(Slot::B),
            Path::new("/w/done"),
        );
        assert!(script.contains("echo \"b\" > /w/bootslot\n"));
        assert!(script.ends_with("sh /w/ub 3 1 /w/k.zip \"$(cat /w/bootslot)\" && touch /w/done"));
    }

    #[test]
    fn boot_patch_command_for_inactive_slot_with_kmi() {
        let dir = tempfile::tempdir().unwrap();
        let config = KflashConfig::rooted_at(dir.path());
        let hal = FakeHal::new();
        let runner = FlashRunner::new(&hal, &config);

        let cmd = runner.boot_patch_command(None, &BootLkm::Kmi("android14-6.1".into()), true);
        assert!(cmd.contains(" boot-patch --magiskboot "));
        assert!(cmd.contains(" -f -u --kmi android14-6.1 -o "));
        assert!(cmd.ends_with(&format!("&& touch {}", dir.path().join("work/done").display())));
    }

    #[test]
    fn begin_is_refused_on_a_used_machine() {
        let dir = tempfile::tempdir().unwrap();
        let config = KflashConfig::rooted_at(dir.path());
        let hal = FakeHal::new();
        let mut machine = FlashStateMachine::new(&config.flash.markers);
        machine.begin("x").unwrap();
        machine.fail("old").unwrap();

        let err = FlashRunner::new(&hal, &config)
            .run(&InstallRequest::new(InstallMethod::DirectInstall), &mut machine)
            .unwrap_err();
        assert!(matches!(err, FlashError::Transition(_)));
        assert_eq!(machine.phase(), FlashPhase::Failed);
        assert!(hal.commands().is_empty());
    }
}
