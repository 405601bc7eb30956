//! Pseudo-console backend.
//!
//! The child is attached to a ConPTY device fed by two anonymous pipes. Its
//! output arrives as a VT byte stream and is copied to our stdout verbatim.
//!
//! # Teardown
//!
//! 1. Close the pseudo console, which ends the child's console host.
//! 2. Close our end of the input pipe, failing any blocked stdin write.
//! 3. Cancel and join the stdin thread.
//! 4. Wait for the child to exit.
//! 5. Unregister the control handler and release the remaining handles.

use std::ffi::c_void;
use std::fs::File;
use std::io::{self, IsTerminal, Read, Write};
use std::mem::{size_of, transmute};
use std::os::windows::io::{AsRawHandle, OwnedHandle};
use std::ptr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::Duration;

use confwd_wire::text::wide_null;
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::Console::COORD;
use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows_sys::Win32::System::Threading::{
    DeleteProcThreadAttributeList, InitializeProcThreadAttributeList, UpdateProcThreadAttribute,
};

use crate::backend::CaptureBackend;
use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use crate::request::{CaptureMode, LaunchRequest};
use crate::signal::INTERRUPT_BYTE;
use crate::win::{
    ChildProcess, CtrlHandlerGuard, SharedPipe, SpawnOptions, StdinForwarder, console, pipe,
};

const PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE: usize = 0x0002_0016;
const PEEK_INTERVAL: Duration = Duration::from_millis(10);
const STDIN_JOIN_WAIT: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

type CreateFn = unsafe extern "system" fn(COORD, HANDLE, HANDLE, u32, *mut isize) -> i32;
type CloseFn = unsafe extern "system" fn(isize);
type ResizeFn = unsafe extern "system" fn(isize, COORD) -> i32;

#[derive(Clone, Copy)]
struct PseudoConsoleApi {
    create: CreateFn,
    close: CloseFn,
    resize: Option<ResizeFn>,
}

static API: OnceLock<Option<PseudoConsoleApi>> = OnceLock::new();

fn resolve() -> Option<PseudoConsoleApi> {
    let kernel32 = wide_null("kernel32.dll");
    let module = unsafe { GetModuleHandleW(kernel32.as_ptr()) };
    if module.is_null() {
        return None;
    }
    let lookup = |name: &[u8]| unsafe { GetProcAddress(module, name.as_ptr()) };
    let create = lookup(b"CreatePseudoConsole\0")?;
    let close = lookup(b"ClosePseudoConsole\0")?;
    let resize = lookup(b"ResizePseudoConsole\0");
    // SAFETY: each export has the documented signature of its alias.
    unsafe {
        Some(PseudoConsoleApi {
            create: transmute::<unsafe extern "system" fn() -> isize, CreateFn>(create),
            close: transmute::<unsafe extern "system" fn() -> isize, CloseFn>(close),
            resize: resize
                .map(|f| transmute::<unsafe extern "system" fn() -> isize, ResizeFn>(f)),
        })
    }
}

fn api() -> Option<PseudoConsoleApi> {
    *API.get_or_init(|| {
        let api = resolve();
        tracing::debug!(available = api.is_some(), "pseudo console probe");
        api
    })
}

/// `true` if this system provides ConPTY. Probed once per process.
pub fn available() -> bool {
    api().is_some()
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

struct PseudoConsole {
    handle: isize,
    api: PseudoConsoleApi,
}

impl PseudoConsole {
    fn open(
        api: PseudoConsoleApi,
        size: COORD,
        input: &OwnedHandle,
        output: &OwnedHandle,
    ) -> Result<Self> {
        let mut handle = 0isize;
        let hr = unsafe {
            (api.create)(size, input.as_raw_handle(), output.as_raw_handle(), 0, &mut handle)
        };
        if hr < 0 {
            return Err(CaptureError::Os {
                operation: "CreatePseudoConsole",
                code: hr,
            });
        }
        Ok(Self { handle, api })
    }

    fn resize(&self, size: COORD) {
        if let Some(resize) = self.api.resize {
            let hr = unsafe { resize(self.handle, size) };
            tracing::debug!(hr, cols = size.X, rows = size.Y, "pseudo console resized");
        }
    }
}

impl Drop for PseudoConsole {
    fn drop(&mut self) {
        unsafe { (self.api.close)(self.handle) };
        tracing::debug!("pseudo console closed");
    }
}

/// The device, closable from the control handler or from teardown.
#[derive(Clone, Default)]
struct SharedConsole(Arc<Mutex<Option<PseudoConsole>>>);

impl SharedConsole {
    fn resize(&self, size: COORD) {
        if let Some(console) = self.0.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            console.resize(size);
        }
    }

    fn close(&self) {
        let console = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(console);
    }
}

/// Backing store for a one-entry process-thread attribute list.
struct AttributeList {
    buffer: Vec<usize>,
}

impl AttributeList {
    fn with_pseudo_console(console: &PseudoConsole) -> Result<Self> {
        let mut size = 0usize;
        unsafe { InitializeProcThreadAttributeList(ptr::null_mut(), 1, 0, &mut size) };
        let mut buffer = vec![0usize; size.div_ceil(size_of::<usize>()).max(1)];
        let list = buffer.as_mut_ptr().cast::<c_void>();
        if unsafe { InitializeProcThreadAttributeList(list, 1, 0, &mut size) } == 0 {
            return Err(CaptureError::last_os("InitializeProcThreadAttributeList"));
        }
        let attributes = Self { buffer };
        let ok = unsafe {
            UpdateProcThreadAttribute(
                list,
                0,
                PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
                console.handle as *const c_void,
                size_of::<isize>(),
                ptr::null_mut(),
                ptr::null(),
            )
        };
        if ok == 0 {
            return Err(CaptureError::last_os("UpdateProcThreadAttribute"));
        }
        Ok(attributes)
    }

    fn as_mut_ptr(&mut self) -> *mut c_void {
        self.buffer.as_mut_ptr().cast()
    }
}

impl Drop for AttributeList {
    fn drop(&mut self) {
        unsafe { DeleteProcThreadAttributeList(self.as_mut_ptr()) };
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

pub struct PseudoConsoleSession {
    child: Arc<ChildProcess>,
    console: SharedConsole,
    input: SharedPipe,
    output: File,
    forward_stdin: bool,
    stdin: Option<StdinForwarder>,
    ctrl: Option<CtrlHandlerGuard>,
}

#[derive(Debug)]
pub struct PseudoConsoleBackend {
    config: CaptureConfig,
}

impl PseudoConsoleBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    fn install_ctrl_handler(&self, session: &PseudoConsoleSession) -> Result<CtrlHandlerGuard> {
        let input = session.input.clone();
        let console = session.console.clone();
        let child = Arc::clone(&session.child);
        let wait = self.config.shutdown_wait;
        CtrlHandlerGuard::install(move |event| {
            if event.is_interrupt() {
                if let Err(error) = input.send(&[INTERRUPT_BYTE]) {
                    tracing::debug!(%error, "interrupt not delivered");
                }
                return true;
            }
            console.close();
            let exited = child.wait(Some(wait));
            tracing::info!(?event, exited, "closed pseudo console for shutdown");
            true
        })
    }

    /// Copy output until the child exits, then drain what is buffered.
    fn pump_output(&self, session: &mut PseudoConsoleSession) -> io::Result<u64> {
        let mut buffer = vec![0u8; self.config.buffer_len];
        let mut stdout = io::stdout();
        let mut total = 0u64;
        loop {
            let waiting = match pipe::available(&session.output) {
                Ok(waiting) => waiting as usize,
                Err(error) => {
                    tracing::debug!(%error, "output pipe closed");
                    break;
                }
            };
            if waiting > 0 {
                let n = session.output.read(&mut buffer[..waiting.min(buffer.len())])?;
                if n == 0 {
                    break;
                }
                stdout.write_all(&buffer[..n])?;
                stdout.flush()?;
                total += n as u64;
                continue;
            }
            if session.child.wait(Some(Duration::ZERO)) {
                total += drain(&mut session.output, &mut buffer, &mut stdout)?;
                break;
            }
            thread::sleep(PEEK_INTERVAL);
        }
        Ok(total)
    }
}

fn drain(output: &mut File, buffer: &mut [u8], stdout: &mut impl Write) -> io::Result<u64> {
    let mut total = 0u64;
    while let Ok(waiting) = pipe::available(output) {
        if waiting == 0 {
            break;
        }
        let n = output.read(&mut buffer[..(waiting as usize).min(buffer.len())])?;
        if n == 0 {
            break;
        }
        stdout.write_all(&buffer[..n])?;
        total += n as u64;
    }
    stdout.flush()?;
    Ok(total)
}

impl CaptureBackend for PseudoConsoleBackend {
    type Session = PseudoConsoleSession;

    fn mode(&self) -> CaptureMode {
        CaptureMode::PseudoConsole
    }

    fn create(&mut self, request: &LaunchRequest) -> Result<PseudoConsoleSession> {
        let api = api().ok_or(CaptureError::PseudoConsoleUnavailable)?;
        let (input_read, input_write) = pipe::anonymous()?;
        let (output_read, output_write) = pipe::anonymous()?;
        let size = COORD {
            X: self.config.columns,
            Y: self.config.rows,
        };
        let console = PseudoConsole::open(api, size, &input_read, &output_write)?;
        // The device holds its own duplicates of these ends.
        drop(input_read);
        drop(output_write);

        let mut attributes = AttributeList::with_pseudo_console(&console)?;
        let options = SpawnOptions {
            command_line: request.command_line(),
            hide_window: request.hide_window,
            detach_std_handles: true,
            ..SpawnOptions::default()
        };
        let child = ChildProcess::spawn(&options, Some(attributes.as_mut_ptr()))?;
        drop(attributes);
        tracing::info!(
            pid = child.pid(),
            cols = size.X,
            rows = size.Y,
            "child attached to pseudo console"
        );

        Ok(PseudoConsoleSession {
            child: Arc::new(child),
            console: SharedConsole(Arc::new(Mutex::new(Some(console)))),
            input: SharedPipe::new(File::from(input_write)),
            output: File::from(output_read),
            forward_stdin: request.stdin.resolve(io::stdin().is_terminal()),
            stdin: None,
            ctrl: None,
        })
    }

    fn run(&mut self, session: &mut PseudoConsoleSession) -> Result<()> {
        if let Some((columns, rows)) = console::window_size() {
            session.console.resize(COORD {
                X: columns,
                Y: rows,
            });
        }
        session.ctrl = Some(self.install_ctrl_handler(session)?);
        if session.forward_stdin {
            session.stdin = Some(StdinForwarder::spawn(
                session.input.clone(),
                self.config.buffer_len,
            )?);
        }
        let bytes = self.pump_output(session)?;
        tracing::debug!(bytes, "pseudo console output finished");
        Ok(())
    }

    fn close(&mut self, session: PseudoConsoleSession) -> Result<u32> {
        let PseudoConsoleSession {
            child,
            console,
            input,
            mut output,
            stdin,
            ctrl,
            ..
        } = session;

        // Some hosts only finish closing once pending output is read.
        let drainer = thread::Builder::new()
            .name("confwd-drain".into())
            .spawn(move || {
                drain_remaining(&mut output, &mut io::stdout());
            })?;
        console.close();
        input.close();
        if let Some(stdin) = stdin {
            stdin.stop(STDIN_JOIN_WAIT);
        }
        let exit_code = child.wait_exit_code()?;
        drop(ctrl);
        let _ = drainer.join();
        Ok(exit_code)
    }
}

/// Copy what is left of the output pipe. Returns the bytes copied before
/// the pipe closed or failed.
fn drain_remaining<R: Read + ?Sized, W: Write + ?Sized>(output: &mut R, out: &mut W) -> u64 {
    let mut buf = [0u8; 4096];
    let mut copied = 0u64;
    loop {
        let n = match output.read(&mut buf) {
            Ok(0) => return copied,
            Ok(n) => n,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => {
                tracing::debug!(%error, copied, "pseudo console drain stopped");
                return copied;
            }
        };
        if let Err(error) = out.write_all(&buf[..n]) {
            tracing::debug!(%error, copied, "pseudo console drain stopped");
            return copied;
        }
        copied += n as u64;
    }
}
