//! Opaque content sources (user-picked files).

use crate::HalResult;
use std::fmt;
use std::io::Read;
use std::path::Path;

/// URI-like reference to user content: `file:///sdcard/x.zip` or a plain path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHandle(String);

impl ContentHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn from_path(path: &Path) -> Self {
        Self(path.display().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last non-empty path segment, ignoring any query or fragment.
    pub fn last_segment(&self) -> Option<&str> {
        let without_query = self.0.split(['?', '#']).next().unwrap_or_default();
        without_query
            .rsplit(['/', '\\'])
            .find(|segment| !segment.is_empty())
            .filter(|segment| !segment.ends_with(':'))
    }

    /// Local filesystem path for `file://` and bare-path handles.
    pub fn local_path(&self) -> Option<&Path> {
        if let Some(rest) = self.0.strip_prefix("file://") {
            return Some(Path::new(rest));
        }
        if self.0.contains("://") {
            return None;
        }
        Some(Path::new(&self.0))
    }
}

impl fmt::Display for ContentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content resolver trait.
pub trait ContentOps: Send + Sync {
    fn open_read(&self, handle: &ContentHandle) -> HalResult<Box<dyn Read + Send>>;

    fn display_name(&self, handle: &ContentHandle) -> Option<String> {
        handle.last_segment().map(str::to_string)
    }
}
