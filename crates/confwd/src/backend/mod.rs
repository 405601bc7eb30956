//! Capture backends and the session driver shared by all of them.
//!
//! A backend turns a [`LaunchRequest`] into a running child whose console
//! output reaches our standard streams. [`drive`] walks every backend
//! through the same `create → run → close` sequence and the matching
//! [`Lifecycle`] transitions, so exit-code propagation and cleanup do not
//! depend on which capture mechanism was picked.

use crate::error::Result;
use crate::lifecycle::Lifecycle;
use crate::request::{CaptureMode, LaunchRequest};

#[cfg(windows)]
pub mod conpty;
#[cfg(windows)]
pub mod inject;
#[cfg(windows)]
pub mod legacy;

/// One capture mechanism.
pub trait CaptureBackend {
    /// Everything the backend acquired for one child.
    type Session;

    fn mode(&self) -> CaptureMode;

    /// Spawn the child. On failure nothing acquired so far is leaked and
    /// no session is returned.
    fn create(&mut self, request: &LaunchRequest) -> Result<Self::Session>;

    /// Forward output until the child exits or its streams close.
    fn run(&mut self, session: &mut Self::Session) -> Result<()>;

    /// Release the session and return the child's exit code. Always called
    /// after `create` succeeded, whatever `run` returned.
    fn close(&mut self, session: Self::Session) -> Result<u32>;
}

/// Pick the backend for a requested mode.
///
/// `Auto` prefers the pseudo console and falls back to injection. Legacy
/// polling is used only when asked for by name.
pub fn resolve_mode(
    requested: CaptureMode,
    pseudo_console_available: impl FnOnce() -> bool,
) -> CaptureMode {
    match requested {
        CaptureMode::Auto if pseudo_console_available() => CaptureMode::PseudoConsole,
        CaptureMode::Auto => CaptureMode::Inject,
        explicit => explicit,
    }
}

/// Run one session to completion and return the child's exit code.
///
/// A failed `run` is logged and does not mask the exit code; only a failed
/// `create` or `close` is returned as an error.
pub fn drive<B: CaptureBackend + ?Sized>(backend: &mut B, request: &LaunchRequest) -> Result<u32> {
    let mut lifecycle = Lifecycle::new();
    let mode = backend.mode();

    let mut session = backend.create(request).inspect_err(|error| {
        tracing::error!(%mode, %error, "session creation failed");
    })?;
    lifecycle.created()?;
    tracing::info!(%mode, program = %request.program, "child created");

    lifecycle.running()?;
    if let Err(error) = backend.run(&mut session) {
        tracing::warn!(%mode, %error, "relay ended with an error");
    }

    let exit_code = backend.close(session)?;
    lifecycle.reaped(exit_code)?;
    tracing::info!(%mode, exit_code, "child reaped");
    Ok(exit_code)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::error::CaptureError;

    use super::*;

    #[derive(Default)]
    struct Fake {
        calls: Rc<RefCell<Vec<&'static str>>>,
        fail_create: bool,
        fail_run: bool,
        exit_code: u32,
    }

    impl CaptureBackend for Fake {
        type Session = ();

        fn mode(&self) -> CaptureMode {
            CaptureMode::Legacy
        }

        fn create(&mut self, _: &LaunchRequest) -> Result<()> {
            self.calls.borrow_mut().push("create");
            if self.fail_create {
                return Err(CaptureError::injection("no module handle"));
            }
            Ok(())
        }

        fn run(&mut self, _: &mut ()) -> Result<()> {
            self.calls.borrow_mut().push("run");
            if self.fail_run {
                return Err(CaptureError::invalid("relay broke"));
            }
            Ok(())
        }

        fn close(&mut self, _: ()) -> Result<u32> {
            self.calls.borrow_mut().push("close");
            Ok(self.exit_code)
        }
    }

    // ── Mode resolution ──────────────────────────────────────────────

    #[test]
    fn auto_prefers_pseudo_console() {
        assert_eq!(resolve_mode(CaptureMode::Auto, || true), CaptureMode::PseudoConsole);
    }

    #[test]
    fn auto_falls_back_to_inject_never_legacy() {
        assert_eq!(resolve_mode(CaptureMode::Auto, || false), CaptureMode::Inject);
    }

    #[test]
    fn explicit_mode_skips_probe() {
        for mode in [CaptureMode::PseudoConsole, CaptureMode::Legacy, CaptureMode::Inject] {
            let resolved = resolve_mode(mode, || -> bool {
                panic!("availability probed for explicit mode")
            });
            assert_eq!(resolved, mode);
        }
    }

    // ── Driver ───────────────────────────────────────────────────────

    #[test]
    fn exit_code_is_propagated() {
        let mut fake = Fake {
            exit_code: 42,
            ..Fake::default()
        };
        let code = drive(&mut fake, &LaunchRequest::new("x.exe")).unwrap();
        assert_eq!(code, 42);
        assert_eq!(*fake.calls.borrow(), ["create", "run", "close"]);
    }

    #[test]
    fn failed_create_never_runs() {
        let mut fake = Fake {
            fail_create: true,
            ..Fake::default()
        };
        let error = drive(&mut fake, &LaunchRequest::new("x.exe")).unwrap_err();
        assert_eq!(error.exit_code(), 1);
        assert_eq!(*fake.calls.borrow(), ["create"]);
    }

    #[test]
    fn failed_run_still_reports_child_exit_code() {
        let mut fake = Fake {
            fail_run: true,
            exit_code: 3,
            ..Fake::default()
        };
        let code = drive(&mut fake, &LaunchRequest::new("x.exe")).unwrap();
        assert_eq!(code, 3);
        assert_eq!(*fake.calls.borrow(), ["create", "run", "close"]);
    }
}
