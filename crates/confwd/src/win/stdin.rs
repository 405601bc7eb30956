//! Stdin forwarding thread and the shared child-input pipe it writes to.

use std::fs::File;
use std::io::{self, Write};
use std::os::windows::io::AsRawHandle;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use windows_sys::Win32::Foundation::WAIT_OBJECT_0;
use windows_sys::Win32::System::Console::{GetStdHandle, STD_INPUT_HANDLE};
use windows_sys::Win32::System::IO::{CancelIoEx, CancelSynchronousIo};
use windows_sys::Win32::System::Threading::WaitForSingleObject;

/// The write end of the child's input, shared between the stdin thread
/// and the control handler. Writes after [`SharedPipe::close`] fail with
/// `BrokenPipe`.
#[derive(Debug, Clone, Default)]
pub struct SharedPipe {
    inner: Arc<Mutex<Option<File>>>,
}

impl SharedPipe {
    pub fn new(pipe: File) -> Self {
        let shared = Self::default();
        shared.set(pipe);
        shared
    }

    pub fn set(&self, pipe: File) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(pipe);
    }

    /// Drop the handle; pending and later writes fail.
    pub fn close(&self) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let pipe = slot
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        pipe.write_all(bytes)?;
        pipe.flush()
    }
}

impl Write for &SharedPipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Background copy of our stdin into the child.
#[derive(Debug)]
pub struct StdinForwarder {
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl StdinForwarder {
    pub fn spawn(target: SharedPipe, buffer_len: usize) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("confwd-stdin".into())
                .spawn(move || {
                    match crate::stdin::pump(io::stdin(), &target, &running, buffer_len) {
                        Ok(bytes) => tracing::debug!(bytes, "stdin forwarding finished"),
                        Err(error) => tracing::debug!(%error, "stdin forwarding stopped"),
                    }
                })?
        };
        Ok(Self { handle, running })
    }

    /// Stop the thread: clear its flag, cancel its blocked read, and join
    /// for at most `wait`. A thread still blocked after that is detached.
    pub fn stop(self, wait: Duration) {
        self.running.store(false, Ordering::Release);
        unsafe {
            CancelIoEx(GetStdHandle(STD_INPUT_HANDLE), ptr::null());
            CancelSynchronousIo(self.handle.as_raw_handle());
        }
        let millis = u32::try_from(wait.as_millis()).unwrap_or(u32::MAX);
        if unsafe { WaitForSingleObject(self.handle.as_raw_handle(), millis) } == WAIT_OBJECT_0 {
            let _ = self.handle.join();
        } else {
            tracing::debug!("stdin thread still blocked; detached");
        }
    }
}
