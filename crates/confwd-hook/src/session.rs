//! Lifetime of the hook module inside its host.
//!
//! `initialize` creates both named pipes, starts the relay thread, and patches
//! every loaded module without waiting for a launcher to connect, so the
//! loader is never blocked. The relay thread polls for the connection, then
//! turns into the input relay.
//!
//! # Failure Modes
//!
//! | Failure | Effect |
//! |---------|--------|
//! | Pipe creation fails | Initialization fails; no hooks are installed |
//! | No relay connects in time | Thread exits; interceptors keep forwarding to the console only |
//! | Relay disconnects | The channel detaches on the next failed write |
//! | Unload while the host lives | Patched slots stay in place and are reported |

use std::fs::File;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use confwd_wire::SessionKey;
use confwd_wire::text::wide_null;
use windows_sys::Win32::Foundation::{
    ERROR_PIPE_CONNECTED, GetLastError, HMODULE, INVALID_HANDLE_VALUE, WAIT_OBJECT_0,
};
use windows_sys::Win32::Storage::FileSystem::{PIPE_ACCESS_INBOUND, PIPE_ACCESS_OUTBOUND};
use windows_sys::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, PIPE_NOWAIT, PIPE_READMODE_BYTE,
    PIPE_TYPE_BYTE, PIPE_WAIT, SetNamedPipeHandleState,
};
use windows_sys::Win32::System::Threading::WaitForSingleObject;

use crate::config::HookConfig;
use crate::error::{HookError, Result};
use crate::hooks::{CHANNEL, TABLE, hook_loaded_modules, set_own_module};
use crate::input::{inject, pump_input};

struct Session {
    key: SessionKey,
    running: Arc<AtomicBool>,
    relay: Option<JoinHandle<()>>,
    config: HookConfig,
}

static SESSION: Mutex<Option<Session>> = Mutex::new(None);

/// Called from `DllMain` on process attach.
pub(crate) fn attach(module: HMODULE) {
    set_own_module(module);
    crate::logging::init();
    if let Err(error) = initialize() {
        tracing::error!(%error, "hook initialization failed");
    }
}

/// Create the pipes, start the relay thread, and install hooks. Idempotent.
pub(crate) fn initialize() -> Result<()> {
    let mut slot = SESSION.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        return Ok(());
    }

    let config = HookConfig::default();
    let key = SessionKey::for_process(std::process::id());
    let output = create_pipe(&key.output_pipe(), PIPE_ACCESS_OUTBOUND, &config)?;
    let input = create_pipe(&key.input_pipe(), PIPE_ACCESS_INBOUND, &config)?;
    tracing::info!(session = %key, "pipes created");

    let running = Arc::new(AtomicBool::new(true));
    let relay = {
        let running = Arc::clone(&running);
        let config = config.clone();
        thread::Builder::new()
            .name("confwd-hook-relay".into())
            .spawn(move || serve(output, input, &config, &running))
            .map_err(|e| HookError::pipe(key.output_pipe(), e))?
    };

    let patched = hook_loaded_modules();
    tracing::info!(patched, slots = TABLE.install_count(), "hooks installed");

    *slot = Some(Session {
        key,
        running,
        relay: Some(relay),
        config,
    });
    Ok(())
}

/// Called from `DllMain` on process detach.
///
/// When the whole process is exiting, other threads are already gone and
/// the module's code stays mapped, so only the output pipe is flushed.
pub(crate) fn detach(process_exiting: bool) {
    let Some(mut session) = SESSION
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
    else {
        return;
    };

    session.running.store(false, Ordering::Release);
    if let Some(pipe) = CHANNEL.detach() {
        let _ = pipe.sync_all();
        unsafe { DisconnectNamedPipe(pipe.as_raw_handle()) };
    }
    if process_exiting {
        return;
    }

    // Foreign modules keep calling through the patched slots, which point
    // into this module's code once it is gone.
    tracing::warn!(
        session = %session.key,
        slots = TABLE.install_count(),
        "unloading with import patches still in place"
    );
    if let Some(relay) = session.relay.take() {
        join_bounded(relay, session.config.shutdown_wait);
    }
}

// ---------------------------------------------------------------------------
// Pipes
// ---------------------------------------------------------------------------

fn create_pipe(name: &str, access: u32, config: &HookConfig) -> Result<OwnedHandle> {
    let wide = wide_null(name);
    let buffer = u32::try_from(config.buffer_len).unwrap_or(u32::MAX);
    let handle = unsafe {
        CreateNamedPipeW(
            wide.as_ptr(),
            access,
            PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_NOWAIT,
            1,
            buffer,
            buffer,
            0,
            ptr::null(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(HookError::pipe(name, std::io::Error::last_os_error()));
    }
    // SAFETY: a fresh handle owned by nobody else.
    Ok(unsafe { OwnedHandle::from_raw_handle(handle) })
}

fn try_connect(pipe: &OwnedHandle) -> bool {
    if unsafe { ConnectNamedPipe(pipe.as_raw_handle(), ptr::null_mut()) } != 0 {
        return true;
    }
    unsafe { GetLastError() } == ERROR_PIPE_CONNECTED
}

/// Output writes block once connected so frames are never dropped.
fn set_blocking(pipe: &OwnedHandle) -> std::io::Result<()> {
    let mode = PIPE_READMODE_BYTE | PIPE_WAIT;
    let ok = unsafe {
        SetNamedPipeHandleState(pipe.as_raw_handle(), &mode, ptr::null(), ptr::null())
    };
    if ok == 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn accept(
    output: &OwnedHandle,
    input: &OwnedHandle,
    config: &HookConfig,
    running: &AtomicBool,
) -> bool {
    let (mut output_ready, mut input_ready) = (false, false);
    for _ in 0..config.connect_attempts() {
        if !running.load(Ordering::Acquire) {
            return false;
        }
        output_ready = output_ready || try_connect(output);
        input_ready = input_ready || try_connect(input);
        if output_ready && input_ready {
            return true;
        }
        thread::sleep(config.connect_poll);
    }
    false
}

fn serve(output: OwnedHandle, input: OwnedHandle, config: &HookConfig, running: &AtomicBool) {
    if !accept(&output, &input, config, running) {
        tracing::warn!(
            timeout_ms = config.connect_timeout.as_millis() as u64,
            "no relay connected; output stays on the console only"
        );
        return;
    }
    if let Err(error) = set_blocking(&output) {
        tracing::debug!(%error, "output pipe left non-blocking");
    }
    CHANNEL.attach(File::from(output));
    tracing::info!("relay connected");

    let input = File::from(input);
    let result = pump_input(&input, running, config.input_poll, config.buffer_len, |chunk| {
        if let Err(error) = inject(chunk) {
            tracing::debug!(%error, "console input write failed");
        }
    });
    match result {
        Ok(bytes) => tracing::debug!(bytes, "input relay finished"),
        Err(error) => tracing::debug!(%error, "input relay stopped"),
    }
}

fn join_bounded(handle: JoinHandle<()>, wait: Duration) {
    let millis = u32::try_from(wait.as_millis()).unwrap_or(u32::MAX);
    if unsafe { WaitForSingleObject(handle.as_raw_handle(), millis) } == WAIT_OBJECT_0 {
        let _ = handle.join();
    } else {
        tracing::debug!("relay thread still running at unload; detached");
    }
}
