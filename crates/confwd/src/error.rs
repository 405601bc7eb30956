use std::path::PathBuf;

use thiserror::Error;

use crate::lifecycle::Phase;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} failed (error {code})")]
    Os { operation: &'static str, code: i32 },

    #[error("ConPTY is not available on this system; use --mode inject or --mode legacy")]
    PseudoConsoleUnavailable,

    #[error("hook module not found: {path}")]
    HookModuleMissing { path: PathBuf },

    #[error("DLL injection failed: {reason}")]
    Injection { reason: String },

    #[error(
        "legacy mode cannot forward output while stdout is a console; redirect stdout or use --mode conpty or --mode inject"
    )]
    ConsoleNotCapturable,

    #[error("could not connect to pipe {name}")]
    PipeConnectTimeout { name: String },

    #[error("cannot read argument file {path}: {source}")]
    ArgFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("session cannot move from {from:?} to {to:?}")]
    Lifecycle { from: Phase, to: Phase },

    #[error("console capture is only supported on Windows")]
    UnsupportedPlatform,
}

impl CaptureError {
    /// Exit status for a failure before or instead of the child's own.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        1
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Wrap the calling thread's last OS error.
    #[must_use]
    pub fn last_os(operation: &'static str) -> Self {
        Self::os(operation, std::io::Error::last_os_error())
    }

    #[must_use]
    pub fn os(operation: &'static str, error: std::io::Error) -> Self {
        Self::Os {
            operation,
            code: error.raw_os_error().unwrap_or(-1),
        }
    }

    #[must_use]
    pub fn injection(reason: impl Into<String>) -> Self {
        Self::Injection {
            reason: reason.into(),
        }
    }
}
