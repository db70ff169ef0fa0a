//! kflash workflow orchestration.
//!
//! This crate owns the lifecycle of a flash: a caller-held [`FlashSessionHost`] creates,
//! re-attaches and detaches sessions, and runs each one on its own worker thread while the
//! caller observes snapshots or events.

pub mod session;

pub use session::{DetachOutcome, FlashSession, FlashSessionHost, SessionError};
