//! A/B slot resolution.

use super::request::{InstallMethod, InstallRequest, Slot};
use crate::errors::{FlashError, FlashResult};
use kflash_hal::{HalResult, ShellOps};

pub const AB_UPDATE_PROP: &str = "ro.build.ab_update";
pub const SLOT_SUFFIX_PROP: &str = "ro.boot.slot_suffix";

/// Slot layout as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceSlots {
    pub ab: bool,
    pub active: Option<Slot>,
}

impl DeviceSlots {
    pub fn single() -> Self {
        Self::default()
    }

    pub fn ab(active: Slot) -> Self {
        Self {
            ab: true,
            active: Some(active),
        }
    }

    pub fn probe<H: ShellOps + ?Sized>(hal: &H) -> HalResult<Self> {
        let ab_update = hal.getprop(AB_UPDATE_PROP, false)?;
        let suffix = hal.getprop(SLOT_SUFFIX_PROP, false)?;
        let active = Slot::from_suffix(&suffix);
        let slots = Self {
            ab: ab_update.eq_ignore_ascii_case("true") && !suffix.is_empty(),
            active,
        };
        log::info!(
            "device slots: ab={} active={}",
            slots.ab,
            slots.active.map(|s| s.letter()).unwrap_or("-")
        );
        Ok(slots)
    }

    pub fn inactive(&self) -> Option<Slot> {
        if !self.ab {
            return None;
        }
        self.active.map(Slot::other)
    }
}

/// What the runner must do about slots for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotPlan {
    pub target: Option<Slot>,
    /// Override `ro.boot.slot_suffix` while the installer runs.
    pub switch_suffix: bool,
    /// Boot-patch the inactive slot (`ksud boot-patch -u`).
    pub ota: bool,
}

pub fn resolve(request: &InstallRequest, device: &DeviceSlots) -> FlashResult<SlotPlan> {
    match &request.method {
        InstallMethod::DirectInstallToInactiveSlot => {
            let target = device.inactive().ok_or_else(|| {
                FlashError::InactiveSlotUnavailable(if device.ab {
                    "active slot is unknown".to_string()
                } else {
                    "device does not use A/B partitions".to_string()
                })
            })?;
            log::info!("resolved inactive slot: {}", target);
            Ok(SlotPlan {
                target: Some(target),
                switch_suffix: false,
                ota: true,
            })
        }
        InstallMethod::PatchedKernelPackage(_) if device.ab => match request.slot {
            Some(slot) => Ok(SlotPlan {
                target: Some(slot),
                switch_suffix: true,
                ota: false,
            }),
            None => Err(FlashError::SlotRequired),
        },
        InstallMethod::PatchedKernelPackage(_) => {
            if request.slot.is_some() {
                log::info!("ignoring slot selection on a non-A/B device");
            }
            Ok(SlotPlan::default())
        }
        InstallMethod::SelectedFile(_) | InstallMethod::DirectInstall => Ok(SlotPlan::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kflash_hal::{ContentHandle, FakeHal, FakeResponse};

    fn package(slot: Option<Slot>) -> InstallRequest {
        InstallRequest::kernel_package(ContentHandle::new("file:///ak3.zip"), slot)
    }

    #[test]
    fn inactive_slot_is_the_other_one() {
        let plan = resolve(
            &InstallRequest::new(InstallMethod::DirectInstallToInactiveSlot),
            &DeviceSlots::ab(Slot::A),
        )
        .unwrap();
        assert_eq!(plan.target, Some(Slot::B));
        assert!(plan.ota && !plan.switch_suffix);
    }

    #[test]
    fn inactive_slot_needs_an_ab_device() {
        let err = resolve(
            &InstallRequest::new(InstallMethod::DirectInstallToInactiveSlot),
            &DeviceSlots::single(),
        )
        .unwrap_err();
        assert!(matches!(err, FlashError::InactiveSlotUnavailable(_)));
    }

    #[test]
    fn package_on_ab_device_requires_slot() {
        let device = DeviceSlots::ab(Slot::A);
        assert!(matches!(
            resolve(&package(None), &device),
            Err(FlashError::SlotRequired)
        ));
        let plan = resolve(&package(Some(Slot::B)), &device).unwrap();
        assert_eq!(plan.target, Some(Slot::B));
        assert!(plan.switch_suffix);
    }

    #[test]
    fn package_on_single_slot_device_ignores_slot() {
        let plan = resolve(&package(Some(Slot::A)), &DeviceSlots::single()).unwrap();
        assert_eq!(plan, SlotPlan::default());
    }

    #[test]
    fn probe_reads_props_unprivileged() {
        let hal = FakeHal::new();
        hal.respond("getprop ro.build.ab_update", FakeResponse::stdout(["true"]));
        hal.respond("getprop ro.boot.slot_suffix", FakeResponse::stdout(["_b"]));
        let slots = DeviceSlots::probe(&hal).unwrap();
        assert_eq!(slots, DeviceSlots::ab(Slot::B));
        assert!(!hal.has_operation(|op| matches!(
            op,
            kflash_hal::Operation::Shell { elevated: true, .. }
        )));
    }

    #[test]
    fn probe_without_suffix_is_single_slot() {
        let hal = FakeHal::new();
        hal.respond("getprop ro.build.ab_update", FakeResponse::stdout(["true"]));
        assert_eq!(DeviceSlots::probe(&hal).unwrap(), DeviceSlots::single());
    }
}
