//! HAL trait definitions and implementations.
//!
//! This module defines the traits for world-touching operations and provides
//! both real (LinuxHal) and fake (FakeHal) implementations.

pub mod content_ops;
pub mod fake_hal;
pub mod guards;
pub mod linux_hal;
pub mod process_ops;

pub use content_ops::{ContentHandle, ContentOps};
pub use fake_hal::{FakeHal, FakeResponse, Operation};
pub use guards::PropGuard;
pub use linux_hal::{LinuxHal, ShellConfig};
pub use process_ops::{CommandOutput, OutputLine, ProcessHandle, ShellOps, Stream};

/// Complete HAL combining all operation traits.
pub trait DeviceHal: ShellOps + ContentOps + Send + Sync {}

/// Automatically implement DeviceHal for any type implementing all required traits.
impl<T> DeviceHal for T where T: ShellOps + ContentOps + Send + Sync {}
