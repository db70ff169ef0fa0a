//! kflash Hardware Abstraction Layer (HAL).
//!
//! Everything that spawns a process or reads user content lives behind these traits.

pub mod error;
pub mod hal;
pub mod quote;

pub use error::{HalError, HalResult};
pub use hal::*;
pub use quote::shell_quote;
