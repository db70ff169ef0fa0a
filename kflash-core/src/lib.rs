//! kflash core library.
//!
//! `kflash-core` holds the flash and KPM pipelines plus the config, error and logging pieces
//! shared with the session layer and the `kflash` binary.

pub mod config;
pub mod errors;
pub mod export;
pub mod flash;
pub mod kpm;
pub mod logging;

pub use config::KflashConfig;
pub use errors::{FlashError, FlashResult, KpmError, KpmResult};
