//! CLI argument parsing for kflash

use clap::{Args, Parser, Subcommand};
use kflash_core::flash::Slot;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kflash")]
#[command(about = "Flash kernels and manage KPM modules on a rooted device")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (defaults to $KFLASH_CONFIG, then built-in paths)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Append logs to this file instead of the default location
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Flash a kernel or patch a boot image
    Flash {
        #[command(subcommand)]
        target: FlashTarget,

        /// Print the final state as JSON instead of a summary
        #[arg(long, global = true)]
        json: bool,

        /// Skip writing the flash log to the configured log directory
        #[arg(long, global = true)]
        no_export: bool,

        /// Also save the final state as JSON to this file
        #[arg(long, global = true)]
        snapshot: Option<PathBuf>,
    },

    /// Manage kernel patch modules
    Kpm {
        #[command(subcommand)]
        action: KpmAction,
    },

    /// Show the device's A/B slot layout
    Slot,
}

#[derive(Subcommand)]
pub enum FlashTarget {
    /// Run the installer inside an AnyKernel package
    Package {
        source: String,

        /// Slot to flash on A/B devices (a or b)
        #[arg(long)]
        slot: Option<Slot>,
    },
    /// Patch a boot image file into the output directory
    Image {
        source: String,
        #[command(flatten)]
        lkm: LkmArgs,
    },
    /// Patch and flash the current boot partition
    Direct {
        #[command(flatten)]
        lkm: LkmArgs,
    },
    /// Patch and flash the inactive slot (after an OTA)
    Inactive {
        #[command(flatten)]
        lkm: LkmArgs,
    },
}

#[derive(Args, Debug, Default)]
pub struct LkmArgs {
    /// Loadable kernel module to patch in
    #[arg(long, conflicts_with = "kmi")]
    pub lkm: Option<String>,

    /// Kernel module interface to pick the bundled module for
    #[arg(long)]
    pub kmi: Option<String>,
}

#[derive(Subcommand)]
pub enum KpmAction {
    /// List loaded modules
    List {
        #[arg(long)]
        json: bool,
    },
    /// Load a module, optionally keeping it across reboots
    Install {
        source: String,
        #[arg(long)]
        embed: bool,
    },
    /// Unload a module and drop it from the store
    Uninstall { id: String },
    /// Send a control string to a module
    Control { id: String, args: String },
    /// Show one module's raw info, or the manager version and module count
    Info { id: Option<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_package_flash_with_slot() {
        let cli = Cli::try_parse_from([
            "kflash",
            "flash",
            "package",
            "/sdcard/ak3.zip",
            "--slot",
            "_b",
            "--json",
            "--snapshot",
            "/sdcard/state.json",
        ])
        .expect("parse");
        match cli.command {
            Command::Flash {
                target: FlashTarget::Package { source, slot },
                json,
                no_export,
                snapshot,
            } => {
                assert_eq!(source, "/sdcard/ak3.zip");
                assert_eq!(slot, Some(Slot::B));
                assert!(json);
                assert!(!no_export);
                assert_eq!(snapshot, Some(PathBuf::from("/sdcard/state.json")));
            }
            _ => panic!("expected flash package"),
        }
    }

    #[test]
    fn rejects_bad_slot_and_conflicting_lkm() {
        assert!(Cli::try_parse_from(["kflash", "flash", "package", "x.zip", "--slot", "c"]).is_err());
        assert!(Cli::try_parse_from([
            "kflash", "flash", "direct", "--lkm", "a.ko", "--kmi", "android14-6.1",
        ])
        .is_err());
    }

    #[test]
    fn parses_kpm_control() {
        let cli = Cli::try_parse_from(["kflash", "--config", "/etc/k.toml", "kpm", "control", "m", "a b"])
            .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("/etc/k.toml")));
        match cli.command {
            Command::Kpm {
                action: KpmAction::Control { id, args },
            } => {
                assert_eq!(id, "m");
                assert_eq!(args, "a b");
            }
            _ => panic!("expected kpm control"),
        }
    }
}
