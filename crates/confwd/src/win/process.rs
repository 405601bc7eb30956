//! Child process creation and reaping.

use std::ffi::c_void;
use std::mem::{size_of, zeroed};
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::ptr;
use std::time::Duration;

use confwd_wire::text::wide_null;
use windows_sys::Win32::Foundation::WAIT_OBJECT_0;
use windows_sys::Win32::System::Threading::{
    CREATE_NEW_CONSOLE, CREATE_SUSPENDED, CreateProcessW, EXTENDED_STARTUPINFO_PRESENT,
    GetExitCodeProcess, INFINITE, PROCESS_INFORMATION, ResumeThread, STARTF_USESHOWWINDOW,
    STARTF_USESTDHANDLES, STARTUPINFOEXW, STARTUPINFOW, TerminateProcess, WaitForSingleObject,
};
use windows_sys::Win32::UI::WindowsAndMessaging::SW_HIDE;

use crate::error::{CaptureError, Result};

const STILL_ACTIVE: u32 = 259;

/// How to start a child.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub command_line: String,
    pub new_console: bool,
    pub suspended: bool,
    pub hide_window: bool,
    /// Leave the standard handles unset so the child uses its console.
    pub detach_std_handles: bool,
}

/// A spawned child with its primary thread.
#[derive(Debug)]
pub struct ChildProcess {
    process: OwnedHandle,
    thread: OwnedHandle,
    pid: u32,
}

fn millis(timeout: Option<Duration>) -> u32 {
    timeout.map_or(INFINITE, |t| {
        u32::try_from(t.as_millis()).unwrap_or(INFINITE - 1)
    })
}

impl ChildProcess {
    /// Spawn a child, optionally with a process-thread attribute list.
    pub fn spawn(options: &SpawnOptions, attributes: Option<*mut c_void>) -> Result<Self> {
        let mut info: STARTUPINFOEXW = unsafe { zeroed() };
        info.StartupInfo.cb = if attributes.is_some() {
            size_of::<STARTUPINFOEXW>() as u32
        } else {
            size_of::<STARTUPINFOW>() as u32
        };
        if options.hide_window {
            info.StartupInfo.dwFlags |= STARTF_USESHOWWINDOW;
            info.StartupInfo.wShowWindow = SW_HIDE as u16;
        }
        if options.detach_std_handles {
            info.StartupInfo.dwFlags |= STARTF_USESTDHANDLES;
        }

        let mut flags = 0;
        if options.new_console {
            flags |= CREATE_NEW_CONSOLE;
        }
        if options.suspended {
            flags |= CREATE_SUSPENDED;
        }
        if let Some(list) = attributes {
            info.lpAttributeList = list;
            flags |= EXTENDED_STARTUPINFO_PRESENT;
        }

        let mut command_line = wide_null(&options.command_line);
        let mut process_info: PROCESS_INFORMATION = unsafe { zeroed() };
        let ok = unsafe {
            CreateProcessW(
                ptr::null(),
                command_line.as_mut_ptr(),
                ptr::null(),
                ptr::null(),
                0,
                flags,
                ptr::null(),
                ptr::null(),
                &info.StartupInfo,
                &mut process_info,
            )
        };
        if ok == 0 {
            return Err(CaptureError::last_os("CreateProcessW"));
        }
        tracing::debug!(
            pid = process_info.dwProcessId,
            suspended = options.suspended,
            "process created"
        );
        // SAFETY: both handles are fresh and owned by nobody else.
        Ok(unsafe {
            Self {
                process: OwnedHandle::from_raw_handle(process_info.hProcess),
                thread: OwnedHandle::from_raw_handle(process_info.hThread),
                pid: process_info.dwProcessId,
            }
        })
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub(crate) fn process_handle(&self) -> *mut c_void {
        self.process.as_raw_handle()
    }

    pub fn resume(&self) -> Result<()> {
        if unsafe { ResumeThread(self.thread.as_raw_handle()) } == u32::MAX {
            return Err(CaptureError::last_os("ResumeThread"));
        }
        Ok(())
    }

    /// Wait for exit. Returns `true` if the child has exited.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        unsafe { WaitForSingleObject(self.process.as_raw_handle(), millis(timeout)) }
            == WAIT_OBJECT_0
    }

    pub fn exit_code(&self) -> Result<u32> {
        let mut code = 0u32;
        if unsafe { GetExitCodeProcess(self.process.as_raw_handle(), &mut code) } == 0 {
            return Err(CaptureError::last_os("GetExitCodeProcess"));
        }
        Ok(code)
    }

    /// `false` once the exit-code query stops reporting `STILL_ACTIVE`.
    pub fn is_running(&self) -> bool {
        matches!(self.exit_code(), Ok(STILL_ACTIVE))
    }

    /// Block until exit and return the exit code.
    pub fn wait_exit_code(&self) -> Result<u32> {
        self.wait(None);
        self.exit_code()
    }

    pub fn terminate(&self, exit_code: u32) {
        if unsafe { TerminateProcess(self.process.as_raw_handle(), exit_code) } == 0 {
            tracing::debug!(
                pid = self.pid,
                error = %std::io::Error::last_os_error(),
                "TerminateProcess failed"
            );
        }
    }
}
