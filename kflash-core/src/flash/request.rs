use kflash_hal::ContentHandle;
use std::fmt;
use std::str::FromStr;

/// One of the two boot partitions on an A/B device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    pub fn letter(self) -> &'static str {
        match self {
            Slot::A => "a",
            Slot::B => "b",
        }
    }

    /// Property form, e.g. `_a`.
    pub fn suffix(self) -> String {
        format!("_{}", self.letter())
    }

    /// Parse `a`, `_a`, `b` or `_b` (any case). Anything else is `None`.
    pub fn from_suffix(raw: &str) -> Option<Slot> {
        let raw = raw.trim();
        match raw.strip_prefix('_').unwrap_or(raw).to_ascii_lowercase().as_str() {
            "a" => Some(Slot::A),
            "b" => Some(Slot::B),
            _ => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.letter())
    }
}

impl FromStr for Slot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Slot::from_suffix(s).ok_or_else(|| format!("invalid slot '{}': expected a or b", s))
    }
}

/// How the kernel gets onto the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallMethod {
    /// Patch a user-supplied boot image (written to the output directory).
    SelectedFile(ContentHandle),
    /// Patch and flash the current boot partition in place.
    DirectInstall,
    /// Patch and flash the inactive slot (OTA-style).
    DirectInstallToInactiveSlot,
    /// Run the installer embedded in an AnyKernel-style package.
    PatchedKernelPackage(ContentHandle),
}

impl InstallMethod {
    pub fn label(&self) -> &'static str {
        match self {
            InstallMethod::SelectedFile(_) => "selected boot image",
            InstallMethod::DirectInstall => "direct install",
            InstallMethod::DirectInstallToInactiveSlot => "install to inactive slot",
            InstallMethod::PatchedKernelPackage(_) => "kernel package",
        }
    }
}

/// Loadable kernel module to patch in along with a boot image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LkmSelection {
    /// Let `ksud` pick the module matching the running kernel.
    #[default]
    None,
    Module(ContentHandle),
    Kmi(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub method: InstallMethod,
    pub slot: Option<Slot>,
    pub lkm: LkmSelection,
}

impl InstallRequest {
    pub fn new(method: InstallMethod) -> Self {
        Self {
            method,
            slot: None,
            lkm: LkmSelection::None,
        }
    }

    pub fn kernel_package(source: ContentHandle, slot: Option<Slot>) -> Self {
        Self {
            slot,
            ..Self::new(InstallMethod::PatchedKernelPackage(source))
        }
    }

    pub fn with_slot(mut self, slot: Option<Slot>) -> Self {
        self.slot = slot;
        self
    }

    pub fn with_lkm(mut self, lkm: LkmSelection) -> Self {
        self.lkm = lkm;
        self
    }
}
