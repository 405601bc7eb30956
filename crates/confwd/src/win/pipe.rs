//! Anonymous and named pipe helpers.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::ptr;
use std::thread;
use std::time::Duration;

use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::Pipes::{CreatePipe, PeekNamedPipe};

use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};

/// A unidirectional anonymous pipe as `(read, write)`.
pub fn anonymous() -> Result<(OwnedHandle, OwnedHandle)> {
    let mut read: HANDLE = ptr::null_mut();
    let mut write: HANDLE = ptr::null_mut();
    if unsafe { CreatePipe(&mut read, &mut write, ptr::null(), 0) } == 0 {
        return Err(CaptureError::last_os("CreatePipe"));
    }
    // SAFETY: fresh handles owned by nobody else.
    Ok(unsafe {
        (
            OwnedHandle::from_raw_handle(read),
            OwnedHandle::from_raw_handle(write),
        )
    })
}

/// Bytes waiting in a pipe, without consuming them.
pub fn available(pipe: &impl AsRawHandle) -> io::Result<u32> {
    let mut available = 0u32;
    let ok = unsafe {
        PeekNamedPipe(
            pipe.as_raw_handle(),
            ptr::null_mut(),
            0,
            ptr::null_mut(),
            &mut available,
            ptr::null_mut(),
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(available)
}

/// Open a named pipe, retrying until it exists or the timeout passes.
pub fn connect(name: &str, write: bool, timeout: Duration, poll: Duration) -> Result<File> {
    let mut options = OpenOptions::new();
    if write {
        options.write(true);
    } else {
        options.read(true);
    }
    for attempt in 1..=CaptureConfig::attempts(timeout, poll) {
        match options.open(name) {
            Ok(pipe) => {
                tracing::debug!(name, attempt, "pipe connected");
                return Ok(pipe);
            }
            Err(error) => tracing::trace!(name, attempt, %error, "pipe not ready"),
        }
        thread::sleep(poll);
    }
    Err(CaptureError::PipeConnectTimeout {
        name: name.to_string(),
    })
}
