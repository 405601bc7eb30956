//! Console hook module for confwd.
//!
//! # Role
//! Injected into a console program that the launcher started suspended. On
//! load it creates the session's two named pipes, patches the Import Address
//! Table of every loaded module, and starts a thread that waits for the
//! launcher's relay to connect. From then on, everything the host writes to
//! its console is also framed onto the output pipe, and bytes from the input
//! pipe are typed into the host's console as keystrokes.
//!
//! # Modules
//! - [`iat`]: PE import walking and slot patching.
//! - [`table`]: hook targets and the originals they forward to.
//! - [`channel`]: serialized frame sink shared by all interceptors.
//! - [`input`]: byte-to-keystroke relay.
//! - [`console`], [`icon`]: classification and capture helpers.
//!
//! The interceptors and the pipe server are Windows-only; everything they
//! build on is platform-independent and tested on every host.

pub mod channel;
pub mod config;
pub mod console;
pub mod error;
pub mod iat;
pub mod icon;
pub mod input;
pub mod logging;
pub mod table;

#[cfg(windows)]
mod hooks;
#[cfg(windows)]
mod session;

pub use channel::RelayChannel;
pub use config::HookConfig;
pub use error::{HookError, Result};
pub use iat::{ModuleImage, PatchOutcome, SlotWriter};
pub use table::{HookTable, Target};

#[cfg(windows)]
mod entry {
    use std::ffi::c_void;

    use windows_sys::Win32::Foundation::{BOOL, HMODULE};
    use windows_sys::Win32::System::LibraryLoader::DisableThreadLibraryCalls;
    use windows_sys::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

    use crate::session;

    #[allow(non_snake_case)]
    #[unsafe(no_mangle)]
    pub extern "system" fn DllMain(module: HMODULE, reason: u32, reserved: *mut c_void) -> BOOL {
        match reason {
            DLL_PROCESS_ATTACH => {
                unsafe { DisableThreadLibraryCalls(module) };
                session::attach(module);
            }
            // A non-null `reserved` means the process is terminating.
            DLL_PROCESS_DETACH => session::detach(!reserved.is_null()),
            _ => {}
        }
        1
    }

    /// Exported for hosts that load the module without running `DllMain`
    /// initialization to completion. Safe to call more than once.
    #[allow(non_snake_case)]
    #[unsafe(no_mangle)]
    pub extern "system" fn InitializeHook() -> BOOL {
        match session::initialize() {
            Ok(()) => 1,
            Err(error) => {
                tracing::error!(%error, "InitializeHook failed");
                0
            }
        }
    }
}
