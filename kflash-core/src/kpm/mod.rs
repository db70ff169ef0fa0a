//! KPM (loadable kernel module) management.

mod info;
mod manager;

pub use info::{
    extract_module_name, is_elf, parse_module_info, parse_module_list, printable_strings,
    KpmModuleInfo,
};
pub use manager::{KpmModuleManager, UninstallOutcome};
