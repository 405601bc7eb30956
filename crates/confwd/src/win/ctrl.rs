//! Scoped console control handler.
//!
//! The OS only accepts a bare function pointer, so the session's handler is
//! parked in one static slot that [`shim`] reads. The slot is filled by
//! [`CtrlHandlerGuard::install`] and emptied when the guard drops.

use std::sync::{Arc, Mutex, PoisonError};

use windows_sys::Win32::Foundation::BOOL;
use windows_sys::Win32::System::Console::SetConsoleCtrlHandler;

use crate::error::{CaptureError, Result};
use crate::signal::CtrlEvent;

type Handler = Arc<dyn Fn(CtrlEvent) -> bool + Send + Sync>;

static HANDLER: Mutex<Option<Handler>> = Mutex::new(None);

unsafe extern "system" fn shim(ctrl_type: u32) -> BOOL {
    let Some(event) = CtrlEvent::from_raw(ctrl_type) else {
        return 0;
    };
    // Clone out of the lock so a slow handler never blocks uninstall.
    let handler = HANDLER
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    match handler {
        Some(handler) => {
            tracing::info!(?event, "console control event");
            BOOL::from(handler(event))
        }
        None => 0,
    }
}

/// Keeps a control handler registered for its lifetime.
#[derive(Debug)]
pub struct CtrlHandlerGuard {
    _private: (),
}

impl CtrlHandlerGuard {
    /// Register `handler`. It returns `true` when it handled the event.
    pub fn install<F>(handler: F) -> Result<Self>
    where
        F: Fn(CtrlEvent) -> bool + Send + Sync + 'static,
    {
        *HANDLER.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
        if unsafe { SetConsoleCtrlHandler(Some(shim), 1) } == 0 {
            let error = CaptureError::last_os("SetConsoleCtrlHandler");
            HANDLER.lock().unwrap_or_else(PoisonError::into_inner).take();
            return Err(error);
        }
        Ok(Self { _private: () })
    }
}

impl Drop for CtrlHandlerGuard {
    fn drop(&mut self) {
        unsafe { SetConsoleCtrlHandler(Some(shim), 0) };
        HANDLER.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}
