//! Flash module - staging, installer preparation and privileged execution of one flash.

mod archive;
mod patch;
mod progress;
mod request;
mod runner;
mod slot;
mod staging;
mod state;

pub use archive::extract_entry;
pub use patch::{export_helper, patch_installer};
pub use progress::{strip_ui_print, MarkerSet, Milestone};
pub use request::{InstallMethod, InstallRequest, LkmSelection, Slot};
pub use runner::{package_script, FlashRunner};
pub use slot::{resolve as resolve_slot, DeviceSlots, SlotPlan, AB_UPDATE_PROP, SLOT_SUFFIX_PROP};
pub use staging::{PackageStager, WorkingArea};
pub use state::{FlashEvent, FlashMonitor, FlashPhase, FlashState, FlashStateMachine, TransitionError};
