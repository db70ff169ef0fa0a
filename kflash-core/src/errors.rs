use crate::flash::TransitionError;
use kflash_hal::HalError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for flash pipeline operations
pub type FlashResult<T> = std::result::Result<T, FlashError>;

/// Result type alias for KPM operations
pub type KpmResult<T> = std::result::Result<T, KpmError>;

#[derive(Error, Debug)]
pub enum FlashError {
    #[error("Failed to start privileged shell: {0}")]
    Spawn(#[source] HalError),

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No archive entry matching '{0}'")]
    NotFound(String),

    #[error("Corrupt archive {}: {reason}", path.display())]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("Installer patch anchor '{0}' not found (incompatible installer)")]
    PatchAnchorNotFound(String),

    #[error("This device has A/B partitions; select a target slot first")]
    SlotRequired,

    #[error("Cannot resolve the inactive slot: {0}")]
    InactiveSlotUnavailable(String),

    #[error("Root access is required")]
    RootUnavailable,

    #[error("Installer exited with code {code}")]
    ProcessExit { code: i32 },

    #[error("Installer finished without producing its completion marker")]
    MissingCompletionMarker,

    #[error("Installer timed out after {0}s")]
    Timeout(u64),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Hal(HalError),
}

impl FlashError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FlashError::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<HalError> for FlashError {
    fn from(err: HalError) -> Self {
        match err {
            err if err.is_spawn_failure() => FlashError::Spawn(err),
            HalError::CommandTimeout { timeout_secs, .. } => FlashError::Timeout(timeout_secs),
            HalError::Io(source) => FlashError::io("talking to the shell", source),
            HalError::ContentNotFound(handle) => FlashError::io(
                format!("opening {}", handle),
                std::io::Error::new(std::io::ErrorKind::NotFound, "content not found"),
            ),
            other => FlashError::Hal(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum KpmError {
    #[error("Another KPM operation is already running")]
    Busy,

    #[error("Failed to stage module: {0}")]
    Stage(#[from] FlashError),

    #[error("{0} is not a kernel module (missing ELF header)")]
    InvalidPackage(String),

    #[error("Could not determine the module name from {0}")]
    ModuleIdNotFound(String),

    #[error("Invalid module id: {0:?}")]
    InvalidModuleId(String),

    #[error("Failed to copy module into store: {0}")]
    StoreCopy(String),

    #[error("Stored module {id} does not match the staged package (sha256 {expected} != {actual})")]
    IntegrityMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to load module: {0}")]
    LoadFailed(String),

    #[error("Failed to unload module {id}: {message}")]
    UnloadFailed { id: String, message: String },

    #[error(transparent)]
    Hal(#[from] HalError),
}
