//! DLL injection backend.
//!
//! The child starts suspended in a console of its own. A thread created in
//! the child runs `LoadLibraryW` on the hook module's path, after which the
//! child resumes and the hook streams its console activity over
//! `<key>_out`. Our stdin and shutdown commands travel back over `<key>_in`.
//!
//! # Shutdown
//!
//! On any control event the relay is flagged to stop and the child is asked
//! to exit: known dedicated servers get a `quit` line, anything else gets
//! `WM_CLOSE` on its console window. The handler then waits for the child.
//! The wait is unbounded when the request was delivered and bounded by the
//! shutdown timeout when it was not.

use std::ffi::c_void;
use std::io::{self, IsTerminal};
use std::iter;
use std::mem::transmute;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use confwd_wire::SessionKey;
use confwd_wire::text::wide_null;
use windows_sys::Win32::System::Diagnostics::Debug::WriteProcessMemory;
use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows_sys::Win32::System::Memory::{
    MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE, VirtualAllocEx, VirtualFreeEx,
};
use windows_sys::Win32::System::Threading::{
    CreateRemoteThread, GetExitCodeThread, INFINITE, WaitForSingleObject,
};

use crate::backend::CaptureBackend;
use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use crate::relay::relay_frames;
use crate::request::{CaptureMode, LaunchRequest};
use crate::server::{QUIT_COMMAND, Shutdown};
use crate::win::{
    ChildProcess, ConsoleSink, CtrlHandlerGuard, SharedPipe, SpawnOptions, StdinForwarder,
    console, pipe,
};

const STDIN_JOIN_WAIT: Duration = Duration::from_millis(500);

type ThreadStart = unsafe extern "system" fn(*mut c_void) -> u32;

// ---------------------------------------------------------------------------
// Injection
// ---------------------------------------------------------------------------

/// Memory committed in the child; released on drop.
struct RemoteBuffer<'a> {
    child: &'a ChildProcess,
    address: *mut c_void,
    len: usize,
}

impl<'a> RemoteBuffer<'a> {
    fn alloc(child: &'a ChildProcess, len: usize) -> Result<Self> {
        let address = unsafe {
            VirtualAllocEx(
                child.process_handle(),
                ptr::null(),
                len,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        if address.is_null() {
            return Err(CaptureError::last_os("VirtualAllocEx"));
        }
        Ok(Self {
            child,
            address,
            len,
        })
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.len {
            return Err(CaptureError::injection("module path exceeds remote buffer"));
        }
        let mut written = 0usize;
        let ok = unsafe {
            WriteProcessMemory(
                self.child.process_handle(),
                self.address,
                bytes.as_ptr().cast(),
                bytes.len(),
                &mut written,
            )
        };
        if ok == 0 {
            return Err(CaptureError::last_os("WriteProcessMemory"));
        }
        if written != bytes.len() {
            return Err(CaptureError::injection(format!(
                "wrote {written} of {} path bytes",
                bytes.len()
            )));
        }
        Ok(())
    }
}

impl Drop for RemoteBuffer<'_> {
    fn drop(&mut self) {
        unsafe { VirtualFreeEx(self.child.process_handle(), self.address, 0, MEM_RELEASE) };
    }
}

fn load_library_w() -> Result<ThreadStart> {
    let kernel32 = wide_null("kernel32.dll");
    let module = unsafe { GetModuleHandleW(kernel32.as_ptr()) };
    if module.is_null() {
        return Err(CaptureError::last_os("GetModuleHandleW(kernel32.dll)"));
    }
    let load = unsafe { GetProcAddress(module, b"LoadLibraryW\0".as_ptr()) }
        .ok_or_else(|| CaptureError::injection("LoadLibraryW not exported"))?;
    // SAFETY: LoadLibraryW takes one pointer argument and returns a handle;
    // a thread start routine sees the handle truncated to its exit code.
    Ok(unsafe { transmute::<unsafe extern "system" fn() -> isize, ThreadStart>(load) })
}

/// Load `module` into the suspended child.
fn inject(child: &ChildProcess, module: &Path) -> Result<()> {
    let path: Vec<u8> = module
        .as_os_str()
        .encode_wide()
        .chain(iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect();
    let buffer = RemoteBuffer::alloc(child, path.len())?;
    buffer.write(&path)?;
    tracing::debug!(bytes = path.len(), "module path written to child");

    let start = load_library_w()?;
    let mut thread_id = 0u32;
    let thread = unsafe {
        CreateRemoteThread(
            child.process_handle(),
            ptr::null(),
            0,
            Some(start),
            buffer.address,
            0,
            &mut thread_id,
        )
    };
    if thread.is_null() {
        return Err(CaptureError::last_os("CreateRemoteThread"));
    }
    // SAFETY: fresh handle owned by nobody else.
    let thread = unsafe { OwnedHandle::from_raw_handle(thread) };
    unsafe { WaitForSingleObject(thread.as_raw_handle(), INFINITE) };

    let mut loaded = 0u32;
    if unsafe { GetExitCodeThread(thread.as_raw_handle(), &mut loaded) } == 0 {
        return Err(CaptureError::last_os("GetExitCodeThread"));
    }
    if loaded == 0 {
        return Err(CaptureError::injection(format!(
            "LoadLibraryW returned null for {}",
            module.display()
        )));
    }
    tracing::info!(module = %module.display(), thread_id, "hook module loaded");
    Ok(())
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

pub struct InjectSession {
    child: Arc<ChildProcess>,
    key: SessionKey,
    input: SharedPipe,
    running: Arc<AtomicBool>,
    shutdown: Shutdown,
    forward_stdin: bool,
    stdin: Option<StdinForwarder>,
    ctrl: Option<CtrlHandlerGuard>,
}

#[derive(Debug)]
pub struct InjectBackend {
    config: CaptureConfig,
}

impl InjectBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    fn install_ctrl_handler(&self, session: &InjectSession) -> Result<CtrlHandlerGuard> {
        let child = Arc::clone(&session.child);
        let input = session.input.clone();
        let running = Arc::clone(&session.running);
        let shutdown = session.shutdown;
        let wait = self.config.shutdown_wait;
        CtrlHandlerGuard::install(move |event| {
            running.store(false, Ordering::Release);
            let requested = match shutdown {
                Shutdown::QuitCommand => match input.send(QUIT_COMMAND) {
                    Ok(()) => true,
                    Err(error) => {
                        tracing::debug!(%error, "quit command not delivered");
                        console::close_console_window(child.pid())
                    }
                },
                Shutdown::CloseWindow => console::close_console_window(child.pid()),
            };
            tracing::info!(?event, ?shutdown, requested, "asked child to exit");
            let exited = child.wait((!requested).then_some(wait));
            tracing::debug!(exited, "shutdown wait finished");
            true
        })
    }
}

impl CaptureBackend for InjectBackend {
    type Session = InjectSession;

    fn mode(&self) -> CaptureMode {
        CaptureMode::Inject
    }

    fn create(&mut self, request: &LaunchRequest) -> Result<InjectSession> {
        let module = self.config.locate_hook_module(&std::env::current_exe()?)?;
        let options = SpawnOptions {
            command_line: request.command_line(),
            new_console: true,
            suspended: true,
            hide_window: request.hide_window,
            ..SpawnOptions::default()
        };
        let child = ChildProcess::spawn(&options, None)?;
        if let Err(error) = inject(&child, &module).and_then(|()| child.resume()) {
            child.terminate(1);
            child.wait(Some(self.config.shutdown_wait));
            return Err(error);
        }

        let key = SessionKey::for_process(child.pid());
        let shutdown = Shutdown::for_program(request.program_file_name());
        tracing::info!(session = %key, ?shutdown, "child resumed with hook module");
        Ok(InjectSession {
            child: Arc::new(child),
            key,
            input: SharedPipe::default(),
            running: Arc::new(AtomicBool::new(true)),
            shutdown,
            forward_stdin: request.stdin.resolve(io::stdin().is_terminal()),
            stdin: None,
            ctrl: None,
        })
    }

    fn run(&mut self, session: &mut InjectSession) -> Result<()> {
        session.ctrl = Some(self.install_ctrl_handler(session)?);

        let (timeout, poll) = (self.config.connect_timeout, self.config.connect_poll);
        let connected = pipe::connect(&session.key.output_pipe(), false, timeout, poll)
            .and_then(|output| {
                let input = pipe::connect(&session.key.input_pipe(), true, timeout, poll)?;
                Ok((output, input))
            });
        let (output, input) = match connected {
            Ok(pipes) => pipes,
            Err(error) => {
                tracing::error!(%error, "hook module did not answer; waiting for the child");
                return Ok(());
            }
        };
        session.input.set(input);
        tracing::info!(session = %session.key, "relay connected");

        if session.forward_stdin {
            session.stdin = Some(StdinForwarder::spawn(
                session.input.clone(),
                self.config.buffer_len,
            )?);
        }

        let mut sink = ConsoleSink::new();
        let stats = relay_frames(output, &mut sink, &session.running);
        tracing::debug!(
            frames = stats.frames,
            bytes = stats.bytes,
            skipped = stats.skipped,
            "relay finished"
        );
        Ok(())
    }

    fn close(&mut self, session: InjectSession) -> Result<u32> {
        session.running.store(false, Ordering::Release);
        session.input.close();
        if let Some(stdin) = session.stdin {
            stdin.stop(STDIN_JOIN_WAIT);
        }
        let exit_code = session.child.wait_exit_code()?;
        drop(session.ctrl);
        Ok(exit_code)
    }
}
