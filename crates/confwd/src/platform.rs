//! Host-specific entry points. Everything above this module is portable.

use crate::config::CaptureConfig;
use crate::error::Result;
use crate::request::{CaptureMode, LaunchRequest};

#[cfg(windows)]
mod imp {
    use super::*;
    use crate::backend::conpty::{self, PseudoConsoleBackend};
    use crate::backend::drive;
    use crate::backend::inject::InjectBackend;
    use crate::backend::legacy::LegacyBackend;
    use crate::error::CaptureError;
    use crate::win::console;

    pub fn prepare_console() {
        console::prepare();
    }

    pub fn pseudo_console_available() -> bool {
        conpty::available()
    }

    pub fn dispatch(
        mode: CaptureMode,
        request: &LaunchRequest,
        config: &CaptureConfig,
    ) -> Result<u32> {
        match mode {
            CaptureMode::PseudoConsole => {
                drive(&mut PseudoConsoleBackend::new(config.clone()), request)
            }
            CaptureMode::Legacy => drive(&mut LegacyBackend::new(config.clone()), request),
            CaptureMode::Inject => drive(&mut InjectBackend::new(config.clone()), request),
            CaptureMode::Auto => Err(CaptureError::invalid("capture mode was not resolved")),
        }
    }
}

#[cfg(not(windows))]
mod imp {
    use super::*;
    use crate::error::CaptureError;

    pub fn prepare_console() {}

    pub fn pseudo_console_available() -> bool {
        false
    }

    pub fn dispatch(
        mode: CaptureMode,
        request: &LaunchRequest,
        _config: &CaptureConfig,
    ) -> Result<u32> {
        tracing::debug!(%mode, program = %request.program, "no capture support on this host");
        Err(CaptureError::UnsupportedPlatform)
    }
}

/// Put the launcher's console into UTF-8 mode with VT output enabled.
pub fn prepare_console() {
    imp::prepare_console();
}

/// `true` when the host exports the pseudo console API.
pub fn pseudo_console_available() -> bool {
    imp::pseudo_console_available()
}

/// Run `request` under an already resolved `mode`.
pub fn dispatch(mode: CaptureMode, request: &LaunchRequest, config: &CaptureConfig) -> Result<u32> {
    imp::dispatch(mode, request, config)
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;
    use crate::error::CaptureError;

    #[test]
    fn non_windows_hosts_report_unsupported() {
        assert!(!pseudo_console_available());
        let request = LaunchRequest::new("srcds.exe");
        let result = dispatch(CaptureMode::Inject, &request, &CaptureConfig::default());
        assert!(matches!(result, Err(CaptureError::UnsupportedPlatform)));
    }
}
