//! Timing and sizing knobs for a capture session.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CaptureError, Result};

/// Initial pseudo-console width in cells.
pub const DEFAULT_COLUMNS: i16 = 120;
/// Initial pseudo-console height in rows.
pub const DEFAULT_ROWS: i16 = 30;
/// File name of the hook module, resolved next to the launcher executable.
pub const HOOK_MODULE_NAME: &str = "confwd_hook.dll";

/// Session configuration shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub columns: i16,
    pub rows: i16,
    pub window_timeout: Duration,
    pub window_poll: Duration,
    pub legacy_poll: Duration,
    pub connect_timeout: Duration,
    pub connect_poll: Duration,
    pub shutdown_wait: Duration,
    pub hook_module: String,
    pub buffer_len: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            columns: DEFAULT_COLUMNS,
            rows: DEFAULT_ROWS,
            window_timeout: Duration::from_secs(5),
            window_poll: Duration::from_millis(100),
            legacy_poll: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(5),
            connect_poll: Duration::from_millis(100),
            shutdown_wait: Duration::from_secs(5),
            hook_module: HOOK_MODULE_NAME.to_string(),
            buffer_len: 4096,
        }
    }
}

impl CaptureConfig {
    #[must_use]
    pub fn with_geometry(mut self, columns: i16, rows: i16) -> Self {
        self.columns = columns.max(1);
        self.rows = rows.max(1);
        self
    }

    #[must_use]
    pub fn with_window_discovery(mut self, timeout: Duration, poll: Duration) -> Self {
        self.window_timeout = timeout;
        self.window_poll = poll;
        self
    }

    #[must_use]
    pub fn with_legacy_poll(mut self, poll: Duration) -> Self {
        self.legacy_poll = poll;
        self
    }

    #[must_use]
    pub fn with_connect(mut self, timeout: Duration, poll: Duration) -> Self {
        self.connect_timeout = timeout;
        self.connect_poll = poll;
        self
    }

    #[must_use]
    pub fn with_shutdown_wait(mut self, wait: Duration) -> Self {
        self.shutdown_wait = wait;
        self
    }

    #[must_use]
    pub fn with_hook_module(mut self, name: impl Into<String>) -> Self {
        self.hook_module = name.into();
        self
    }

    #[must_use]
    pub fn with_buffer_len(mut self, len: usize) -> Self {
        self.buffer_len = len.max(1);
        self
    }

    /// The hook module next to `exe`, which must exist.
    pub fn locate_hook_module(&self, exe: &Path) -> Result<PathBuf> {
        let path = exe
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&self.hook_module);
        if !path.is_file() {
            return Err(CaptureError::HookModuleMissing { path });
        }
        Ok(path)
    }

    /// Poll count for a timeout/interval pair, never zero.
    #[must_use]
    pub fn attempts(timeout: Duration, poll: Duration) -> u32 {
        let poll = poll.as_millis().max(1);
        u32::try_from(timeout.as_millis().div_ceil(poll))
            .unwrap_or(u32::MAX)
            .max(1)
    }
}
