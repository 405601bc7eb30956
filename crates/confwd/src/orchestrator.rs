//! Mode selection and the top-level launch sequence.

use crate::backend::resolve_mode;
use crate::config::CaptureConfig;
use crate::error::Result;
use crate::platform;
use crate::request::LaunchRequest;

/// Launch `request` and return the exit code the launcher should report.
///
/// The chosen mode is announced on stderr before the child starts.
pub fn launch(request: &LaunchRequest, config: &CaptureConfig) -> Result<i32> {
    let mode = resolve_mode(request.mode, platform::pseudo_console_available);
    eprintln!("{}", mode.banner());
    tracing::info!(
        requested = %request.mode,
        %mode,
        command_line = %request.command_line(),
        "launching"
    );
    let code = platform::dispatch(mode, request, config)?;
    tracing::info!(exit_code = code, "child exited");
    // NTSTATUS-style codes wrap into the negative range, as the OS reports them.
    Ok(code as i32)
}
