use kflash_core::flash::{
    FlashEvent, FlashPhase, FlashRunner, FlashStateMachine, InstallMethod, InstallRequest,
    LkmSelection, Slot,
};
use kflash_core::{FlashError, KflashConfig};
use kflash_hal::{ContentHandle, FakeHal, FakeResponse, Operation};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::mpsc;
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const PACKAGE: &str = "file:///sdcard/Download/AnyKernel3.zip";
const INSTALLER: &str = "#!/sbin/sh\nAKHOME=/tmp/ak\ncd $AKHOME;\nchmod -R 755 tools bin;\nexec sh ./anykernel.sh\n";

fn build_package(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, body) in entries {
        zip.start_file(*name, options).expect("start entry");
        zip.write_all(body.as_bytes()).expect("write entry");
    }
    zip.finish().expect("finish zip").into_inner()
}

fn anykernel_package() -> Vec<u8> {
    build_package(&[
        ("anykernel.sh", "echo kernel"),
        ("META-INF/com/google/android/update-binary", INSTALLER),
    ])
}

struct Fixture {
    _dir: TempDir,
    config: KflashConfig,
    hal: FakeHal,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let mut config = KflashConfig::rooted_at(dir.path());
        let helper = dir.path().join("libmkbootfs.so");
        fs::write(&helper, b"\x7fELF-helper").expect("write helper");
        config.paths.helper_tool = helper;
        Self {
            _dir: dir,
            config,
            hal: FakeHal::new(),
        }
    }

    fn ab_device(&self, active: &str) -> &Self {
        self.hal
            .respond("getprop ro.build.ab_update", FakeResponse::stdout(["true"]));
        self.hal
            .respond("getprop ro.boot.slot_suffix", FakeResponse::stdout([active]));
        self
    }

    fn work(&self) -> &Path {
        &self.config.paths.work_dir
    }

    fn run(&self, request: &InstallRequest) -> (Result<(), FlashError>, FlashStateMachine) {
        let mut machine = FlashStateMachine::new(&self.config.flash.markers);
        let result = FlashRunner::new(&self.hal, &self.config).run(request, &mut machine);
        (result, machine)
    }

    fn elevated_commands(&self) -> Vec<String> {
        self.hal
            .operations()
            .into_iter()
            .filter_map(|op| match op {
                Operation::Shell {
                    command,
                    elevated: true,
                } => Some(command),
                _ => None,
            })
            .collect()
    }
}

#[test]
fn kernel_package_on_ab_device_switches_and_restores_slot() {
    let fx = Fixture::new();
    fx.ab_device("_a");
    fx.hal.add_content(PACKAGE, anykernel_package());
    fx.hal.respond(
        "update-binary 3 1",
        FakeResponse::stdout([
            "ui_print - Extracting ramdisk",
            "ui_print - Installing kernel",
            "ui_print - Installation complete",
        ])
        .touching(fx.work().join("done")),
    );

    let (tx, rx) = mpsc::sync_channel(256);
    let mut machine = FlashStateMachine::new(&fx.config.flash.markers).with_events(tx);
    let request = InstallRequest::kernel_package(ContentHandle::new(PACKAGE), Some(Slot::B));
    FlashRunner::new(&fx.hal, &fx.config)
        .run(&request, &mut machine)
        .expect("flash succeeds");

    let state = machine.monitor().snapshot();
    assert_eq!(state.phase, FlashPhase::Completed);
    assert_eq!(state.progress, 1.0);
    assert_eq!(
        state.logs,
        vec!["- Extracting ramdisk", "- Installing kernel", "- Installation complete"]
    );

    let installer = fx.work().join("META-INF/com/google/android/update-binary");
    let patched = fs::read_to_string(&installer).expect("read installer");
    assert!(patched.contains(&format!(
        "cp -f {} $AKHOME/tools;\nchmod -R 755 tools bin;",
        fx.work().join("mkbootfs").display()
    )));
    assert!(fx.work().join("mkbootfs").exists());

    let commands = fx.elevated_commands();
    let switch = commands
        .iter()
        .position(|c| c == "resetprop -n ro.boot.slot_suffix _b")
        .expect("slot switched");
    let flash = commands
        .iter()
        .position(|c| c.contains("update-binary 3 1"))
        .expect("installer ran");
    let restore = commands
        .iter()
        .position(|c| c == "resetprop ro.boot.slot_suffix _a")
        .expect("slot restored");
    assert!(switch < flash && flash < restore);
    assert!(commands[flash].contains("echo \"b\" > "));
    assert!(commands[flash].starts_with(&format!("export POSTINSTALL={}\n", fx.work().display())));

    drop(machine);
    let mut last = 0.0_f32;
    for event in rx.iter() {
        if let FlashEvent::Step { progress, .. } = event {
            assert!(progress >= last, "progress went from {} to {}", last, progress);
            last = progress;
        }
    }
    assert!(last >= 0.80);
}

#[test]
fn missing_installer_fails_before_any_privileged_process() {
    let fx = Fixture::new();
    fx.hal
        .add_content(PACKAGE, build_package(&[("anykernel.sh", "echo kernel")]));

    let (result, machine) = fx.run(&InstallRequest::kernel_package(
        ContentHandle::new(PACKAGE),
        None,
    ));

    assert!(matches!(result, Err(FlashError::NotFound(_))));
    assert_eq!(machine.phase(), FlashPhase::Failed);
    assert!(fx.elevated_commands().is_empty());
}

#[test]
fn missing_patch_anchor_fails_without_process_output() {
    let fx = Fixture::new();
    fx.hal.add_content(
        PACKAGE,
        build_package(&[(
            "META-INF/com/google/android/update-binary",
            "#!/sbin/sh\necho legacy installer\n",
        )]),
    );
    fx.hal
        .respond("update-binary 3 1", FakeResponse::stdout(["ui_print - should not run"]));

    let (result, machine) = fx.run(&InstallRequest::kernel_package(
        ContentHandle::new(PACKAGE),
        None,
    ));

    assert!(matches!(result, Err(FlashError::PatchAnchorNotFound(_))));
    let state = machine.state();
    assert_eq!(state.phase, FlashPhase::Failed);
    assert!(state.logs.is_empty());
    assert!(state.error.contains("chmod -R 755 tools bin;"));
    assert!(!fx.hal.ran_command_containing("update-binary 3 1"));
}

#[test]
fn exit_zero_without_sentinel_is_a_failure() {
    let fx = Fixture::new();
    fx.hal.add_content(PACKAGE, anykernel_package());
    fx.hal.respond(
        "update-binary 3 1",
        FakeResponse::stdout(["ui_print - Installation complete"]),
    );

    let (result, machine) = fx.run(&InstallRequest::kernel_package(
        ContentHandle::new(PACKAGE),
        None,
    ));

    assert!(matches!(result, Err(FlashError::MissingCompletionMarker)));
    assert_eq!(machine.phase(), FlashPhase::Failed);
    assert!(!machine.state().is_completed);
    assert_eq!(machine.state().logs, vec!["- Installation complete"]);
}

#[test]
fn configured_completion_line_counts_as_marker() {
    let mut fx = Fixture::new();
    fx.config.flash.completion_line = Some("KFLASH-DONE".to_string());
    fx.hal.add_content(PACKAGE, anykernel_package());
    fx.hal
        .respond("update-binary 3 1", FakeResponse::stdout(["KFLASH-DONE"]));

    let (result, machine) = fx.run(&InstallRequest::kernel_package(
        ContentHandle::new(PACKAGE),
        None,
    ));
    result.expect("completion line accepted");
    assert_eq!(machine.phase(), FlashPhase::Completed);
}

#[test]
fn non_zero_exit_fails_and_still_restores_slot() {
    let fx = Fixture::new();
    fx.ab_device("_b");
    fx.hal.add_content(PACKAGE, anykernel_package());
    fx.hal.respond(
        "update-binary 3 1",
        FakeResponse::stdout(["ui_print ! Unsupported device"])
            .with_code(1)
            .touching(fx.work().join("done")),
    );

    let (result, machine) = fx.run(&InstallRequest::kernel_package(
        ContentHandle::new(PACKAGE),
        Some(Slot::A),
    ));

    assert!(matches!(result, Err(FlashError::ProcessExit { code: 1 })));
    assert_eq!(machine.state().logs, vec!["! Unsupported device"]);
    assert!(fx.hal.ran_command_containing("resetprop ro.boot.slot_suffix _b"));
    assert_eq!(machine.state().export_log(), "! Unsupported device");
    assert_eq!(machine.state().error, "Installer exited with code 1");
}

#[test]
fn ab_package_without_slot_fails_before_staging() {
    let fx = Fixture::new();
    fx.ab_device("_a");
    fx.hal.add_content(PACKAGE, anykernel_package());

    let (result, machine) = fx.run(&InstallRequest::kernel_package(
        ContentHandle::new(PACKAGE),
        None,
    ));

    assert!(matches!(result, Err(FlashError::SlotRequired)));
    assert_eq!(machine.phase(), FlashPhase::Failed);
    assert!(!fx
        .hal
        .has_operation(|op| matches!(op, Operation::OpenContent { .. })));
}

#[test]
fn inactive_slot_install_targets_other_slot() {
    let fx = Fixture::new();
    fx.ab_device("_a");
    fx.hal.respond(
        "boot-patch",
        FakeResponse::stdout(["- Preparing image", "- Flashing new boot image"])
            .touching(fx.work().join("done")),
    );

    let request = InstallRequest::new(InstallMethod::DirectInstallToInactiveSlot);
    let (result, machine) = fx.run(&request);

    result.expect("inactive slot install succeeds");
    assert_eq!(machine.phase(), FlashPhase::Completed);
    let patch = fx
        .elevated_commands()
        .into_iter()
        .find(|c| c.contains("boot-patch"))
        .expect("boot-patch ran");
    assert!(patch.contains(" -f -u -o "));
    assert!(!fx.hal.ran_command_containing("resetprop"));
}

#[test]
fn selected_image_with_lkm_is_staged_and_cleaned_up() {
    let fx = Fixture::new();
    fx.hal
        .add_content("file:///sdcard/boot.img", b"ANDROID!boot".to_vec());
    fx.hal
        .add_content("file:///sdcard/android14-6.1_kernelsu.ko", b"\x7fELF-lkm".to_vec());
    fx.hal.respond(
        "boot-patch",
        FakeResponse::ok().touching(fx.work().join("done")),
    );

    let request = InstallRequest::new(InstallMethod::SelectedFile(ContentHandle::new(
        "file:///sdcard/boot.img",
    )))
    .with_lkm(LkmSelection::Module(ContentHandle::new(
        "file:///sdcard/android14-6.1_kernelsu.ko",
    )));
    let (result, _machine) = fx.run(&request);
    result.expect("boot image patched");

    let patch = fx
        .elevated_commands()
        .into_iter()
        .find(|c| c.contains("boot-patch"))
        .expect("boot-patch ran");
    assert!(patch.contains(&format!(" -b {} ", fx.work().join("boot.img").display())));
    assert!(patch.contains(&format!(" -m {} ", fx.work().join("kflash-tmp-lkm.ko").display())));
    assert!(patch.contains(&format!(" -o {} ", fx.config.paths.output_dir.display())));
    assert!(!fx.work().join("boot.img").exists());
    assert!(!fx.work().join("kflash-tmp-lkm.ko").exists());
}

#[test]
fn missing_root_is_reported() {
    let fx = Fixture::new();
    fx.hal.add_content(PACKAGE, anykernel_package());
    fx.hal.respond("id", FakeResponse::exit(1));

    let (result, _machine) = fx.run(&InstallRequest::kernel_package(
        ContentHandle::new(PACKAGE),
        None,
    ));
    assert!(matches!(result, Err(FlashError::RootUnavailable)));
    assert!(!fx.hal.ran_command_containing("update-binary 3 1"));
}

#[test]
fn spawn_failure_becomes_spawn_error() {
    let fx = Fixture::new();
    fx.hal.add_content(PACKAGE, anykernel_package());
    fx.hal
        .respond("update-binary 3 1", FakeResponse::spawn_failure());

    let (result, machine) = fx.run(&InstallRequest::kernel_package(
        ContentHandle::new(PACKAGE),
        None,
    ));
    assert!(matches!(result, Err(FlashError::Spawn(_))));
    assert!(machine.state().error.starts_with("Failed to start privileged shell"));
}

#[test]
fn retry_needs_a_fresh_machine_and_clears_stale_files() {
    let fx = Fixture::new();
    fx.hal.add_content(PACKAGE, anykernel_package());
    fx.hal.respond_once(
        "update-binary 3 1",
        FakeResponse::ok().touching(fx.work().join("done")),
    );

    let request = InstallRequest::kernel_package(ContentHandle::new(PACKAGE), None);
    let (first, _) = fx.run(&request);
    first.expect("first flash succeeds");
    assert!(fx.work().join("done").exists());

    let (second, machine) = fx.run(&request);
    assert!(matches!(second, Err(FlashError::MissingCompletionMarker)));
    assert_eq!(machine.phase(), FlashPhase::Failed);
}
