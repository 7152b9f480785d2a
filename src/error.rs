//! # Error Types
//!
//! Custom error types for the joystick poller using `thiserror`.

use std::io;
use thiserror::Error;

/// Main error type for the joystick poller
#[derive(Debug, Error)]
pub enum JoystickError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// `init` called on a handler whose poll thread is still running
    #[error("Joystick handler is already running")]
    AlreadyRunning,

    /// The background poll thread could not be started
    #[error("Failed to spawn poll thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Failure to bring a device path up as an open, probed device.
///
/// Always recoverable: the registry logs it and retries on the next refresh.
#[derive(Debug, Error)]
pub enum OpenError {
    /// The OS refused to open the node (ENOENT, EACCES, ...)
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The node opened but could not be configured or probed
    #[error("Failed to initialize device at {path}: {source}")]
    Init {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl OpenError {
    /// Errno-equivalent of the underlying OS error, if there is one.
    pub fn errno(&self) -> Option<i32> {
        match self {
            OpenError::Open { source, .. } | OpenError::Init { source, .. } => {
                source.raw_os_error()
            }
        }
    }

    /// Whether two failures are the same for log de-duplication purposes.
    pub(crate) fn same_failure(&self, other: &OpenError) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && self.errno() == other.errno()
    }
}

/// Result type alias for the joystick poller
pub type Result<T> = std::result::Result<T, JoystickError>;
