use anyhow::{bail, Context};
use clap::Parser;
use kflash_core::flash::{
    DeviceSlots, FlashEvent, FlashPhase, FlashState, InstallMethod, InstallRequest, LkmSelection,
    Slot,
};
use kflash_core::kpm::KpmModuleManager;
use kflash_core::{export, logging, KflashConfig};
use kflash_hal::{ContentHandle, LinuxHal};
use kflash_workflow::FlashSessionHost;
use std::sync::mpsc;
use std::sync::Arc;

pub mod cli;

use cli::{Cli, Command, FlashTarget, KpmAction, LkmArgs};

const EVENT_BUFFER: usize = 256;

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_with(cli.log_file.clone());

    let config = KflashConfig::load(cli.config.as_deref())?;
    let hal = LinuxHal::with_shell(config.shell.to_shell_config());

    match cli.command {
        Command::Flash {
            target,
            json,
            no_export,
            snapshot,
        } => {
            let request = flash_request(target);
            let state = run_flash(Arc::new(hal), Arc::new(config.clone()), request, !json)?;

            if !no_export {
                match export::write_log(&config.paths.log_dir, &state) {
                    Ok(path) => eprintln!("Log saved to {}", path.display()),
                    Err(err) => log::warn!("could not export flash log: {:#}", err),
                }
            }
            if let Some(path) = &snapshot {
                export::write_snapshot(path, &state)?;
                eprintln!("State saved to {}", path.display());
            }
            if json {
                println!("{}", serde_json::to_string_pretty(state.as_ref())?);
            }
            if state.phase != FlashPhase::Completed {
                bail!("Flash failed: {}", state.error);
            }
            if !json {
                println!("Flash completed");
            }
        }
        Command::Kpm { action } => run_kpm(&hal, &config, action)?,
        Command::Slot => {
            let slots = DeviceSlots::probe(&hal).context("Failed to read slot properties")?;
            if !slots.ab {
                println!("A/B: no");
                return Ok(());
            }
            let letter = |slot: Option<Slot>| {
                slot.map(|s| s.letter()).unwrap_or("unknown")
            };
            println!("A/B: yes");
            println!("active: {}", letter(slots.active));
            println!("inactive: {}", letter(slots.inactive()));
        }
    }

    Ok(())
}

fn flash_request(target: FlashTarget) -> InstallRequest {
    match target {
        FlashTarget::Package { source, slot } => {
            InstallRequest::kernel_package(ContentHandle::new(source), slot)
        }
        FlashTarget::Image { source, lkm } => {
            InstallRequest::new(InstallMethod::SelectedFile(ContentHandle::new(source)))
                .with_lkm(lkm_selection(lkm))
        }
        FlashTarget::Direct { lkm } => {
            InstallRequest::new(InstallMethod::DirectInstall).with_lkm(lkm_selection(lkm))
        }
        FlashTarget::Inactive { lkm } => {
            InstallRequest::new(InstallMethod::DirectInstallToInactiveSlot)
                .with_lkm(lkm_selection(lkm))
        }
    }
}

fn lkm_selection(args: LkmArgs) -> LkmSelection {
    match (args.lkm, args.kmi) {
        (Some(module), _) => LkmSelection::Module(ContentHandle::new(module)),
        (None, Some(kmi)) => LkmSelection::Kmi(kmi),
        (None, None) => LkmSelection::None,
    }
}

/// Run one flash in the background and stream its events until the worker finishes.
fn run_flash(
    hal: Arc<LinuxHal>,
    config: Arc<KflashConfig>,
    request: InstallRequest,
    verbose: bool,
) -> anyhow::Result<Arc<FlashState>> {
    let mut host = FlashSessionHost::new(hal, config);
    let (tx, rx) = mpsc::sync_channel(EVENT_BUFFER);
    host.attach(request)?;
    host.start(Some(tx))?;

    // The sender lives in the worker's state machine; recv ends when it is dropped.
    for event in rx {
        if !verbose {
            continue;
        }
        match event {
            FlashEvent::Step { step, progress } => {
                eprintln!("[{:>3.0}%] {}", progress * 100.0, step)
            }
            FlashEvent::Line(line) => println!("{}", line),
            FlashEvent::Failed(error) => eprintln!("! {}", error),
            FlashEvent::Started | FlashEvent::Completed => {}
        }
    }

    host.wait().context("Flash session vanished")
}

fn run_kpm(hal: &LinuxHal, config: &KflashConfig, action: KpmAction) -> anyhow::Result<()> {
    let manager = KpmModuleManager::new(hal, config);
    match action {
        KpmAction::List { json } => {
            let modules = manager.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&modules)?);
            } else if modules.is_empty() {
                println!("No modules loaded");
            } else {
                for module in modules {
                    println!("{}\t{}\t{}", module.id, module.version, module.description);
                }
            }
        }
        KpmAction::Install { source, embed } => {
            let modules = manager.install(&ContentHandle::new(source), embed)?;
            println!("Installed; {} module(s) loaded", modules.len());
        }
        KpmAction::Uninstall { id } => {
            let outcome = manager.uninstall(&id)?;
            if let Some(warning) = &outcome.warning {
                eprintln!("warning: {}", warning);
            }
            println!("Unloaded {}; {} module(s) loaded", id, outcome.modules.len());
        }
        KpmAction::Control { id, args } => {
            let code = manager.control(&id, &args)?;
            println!("{}", code);
        }
        KpmAction::Info { id: Some(id) } => println!("{}", manager.detail(&id)?),
        KpmAction::Info { id: None } => {
            println!("version: {}", manager.version()?);
            println!("modules: {}", manager.count()?);
        }
    }
    Ok(())
}
