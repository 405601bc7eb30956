//! Console plumbing: code pages, window discovery and attachment.

use std::fs::File;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::ptr;
use std::thread;
use std::time::Duration;

use confwd_wire::text::{utf16_to_utf8, wide_null};
use windows_sys::Win32::Foundation::{
    BOOL, DUPLICATE_SAME_ACCESS, DuplicateHandle, GENERIC_READ, GENERIC_WRITE, HANDLE, HWND,
    INVALID_HANDLE_VALUE, LPARAM,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::Console::{
    ATTACH_PARENT_PROCESS, AllocConsole, AttachConsole, CONSOLE_SCREEN_BUFFER_INFO, COORD,
    ENABLE_VIRTUAL_TERMINAL_PROCESSING, FreeConsole, GetConsoleMode, GetConsoleScreenBufferInfo,
    GetConsoleProcessList, GetConsoleWindow, GetStdHandle, ReadConsoleOutputCharacterW,
    STD_OUTPUT_HANDLE, SetConsoleCP, SetConsoleMode, SetConsoleOutputCP,
};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, GetCurrentProcessId};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetClassNameW, GetWindowThreadProcessId, PostMessageW, WM_CLOSE,
};

use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};

const CP_UTF8: u32 = 65001;
const CONSOLE_WINDOW_CLASS: &str = "ConsoleWindowClass";

/// Switch code pages to UTF-8 and enable VT output. Best effort.
pub fn prepare() {
    unsafe {
        SetConsoleOutputCP(CP_UTF8);
        SetConsoleCP(CP_UTF8);
        let out = GetStdHandle(STD_OUTPUT_HANDLE);
        let mut mode = 0u32;
        if GetConsoleMode(out, &mut mode) != 0 {
            SetConsoleMode(out, mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING);
        }
    }
}

/// `true` if `handle` is a console screen buffer or input.
pub fn is_console(handle: HANDLE) -> bool {
    let mut mode = 0u32;
    !handle.is_null()
        && handle != INVALID_HANDLE_VALUE
        && unsafe { GetConsoleMode(handle, &mut mode) } != 0
}

/// `true` if our stdout goes to a file or pipe rather than a console.
pub fn stdout_redirected() -> bool {
    !is_console(unsafe { GetStdHandle(STD_OUTPUT_HANDLE) })
}

/// Visible size of the console our stdout writes to, as `(columns, rows)`.
pub fn window_size() -> Option<(i16, i16)> {
    let out = unsafe { GetStdHandle(STD_OUTPUT_HANDLE) };
    let mut info: CONSOLE_SCREEN_BUFFER_INFO = unsafe { std::mem::zeroed() };
    if unsafe { GetConsoleScreenBufferInfo(out, &mut info) } == 0 {
        return None;
    }
    let window = info.srWindow;
    let columns = window.Right.checked_sub(window.Left)?.checked_add(1)?;
    let rows = window.Bottom.checked_sub(window.Top)?.checked_add(1)?;
    (columns > 0 && rows > 0).then_some((columns, rows))
}

/// A private duplicate of stdout that survives detaching from the console.
pub fn duplicate_stdout() -> Result<File> {
    let source = unsafe { GetStdHandle(STD_OUTPUT_HANDLE) };
    let mut target: HANDLE = ptr::null_mut();
    let ok = unsafe {
        DuplicateHandle(
            GetCurrentProcess(),
            source,
            GetCurrentProcess(),
            &mut target,
            0,
            0,
            DUPLICATE_SAME_ACCESS,
        )
    };
    if ok == 0 {
        return Err(CaptureError::last_os("DuplicateHandle"));
    }
    // SAFETY: fresh duplicate owned by nobody else.
    Ok(File::from(unsafe { OwnedHandle::from_raw_handle(target) }))
}

// ---------------------------------------------------------------------------
// Window discovery
// ---------------------------------------------------------------------------

struct WindowSearch {
    pid: u32,
    found: HWND,
}

unsafe extern "system" fn match_console_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    // SAFETY: `lparam` is the `WindowSearch` passed to `EnumWindows`.
    let search = unsafe { &mut *(lparam as *mut WindowSearch) };
    let mut owner = 0u32;
    unsafe { GetWindowThreadProcessId(hwnd, &mut owner) };
    if owner != search.pid {
        return 1;
    }
    let mut class = [0u16; 64];
    let len = unsafe { GetClassNameW(hwnd, class.as_mut_ptr(), class.len() as i32) };
    let len = usize::try_from(len).unwrap_or(0);
    if utf16_to_utf8(&class[..len]) == CONSOLE_WINDOW_CLASS {
        search.found = hwnd;
        return 0;
    }
    1
}

/// The top-level console window owned by `pid`, if any.
pub fn find_console_window(pid: u32) -> Option<HWND> {
    let mut search = WindowSearch {
        pid,
        found: ptr::null_mut(),
    };
    let lparam = &mut search as *mut WindowSearch as LPARAM;
    unsafe { EnumWindows(Some(match_console_window), lparam) };
    (!search.found.is_null()).then_some(search.found)
}

/// Poll for the child's console window.
pub fn wait_for_console_window(pid: u32, timeout: Duration, poll: Duration) -> Option<HWND> {
    for _ in 0..CaptureConfig::attempts(timeout, poll) {
        if let Some(hwnd) = find_console_window(pid) {
            return Some(hwnd);
        }
        thread::sleep(poll);
    }
    None
}

/// Another process sharing our console, through which we can attach to it
/// again after leaving it.
fn console_peer(attached: &[u32], own: u32, child: u32) -> Option<u32> {
    attached
        .iter()
        .copied()
        .find(|&pid| pid != own && pid != child && pid != 0)
}

fn attached_processes() -> Vec<u32> {
    let mut pids = vec![0u32; 64];
    loop {
        let count = unsafe { GetConsoleProcessList(pids.as_mut_ptr(), pids.len() as u32) };
        let count = count as usize;
        if count <= pids.len() {
            pids.truncate(count);
            return pids;
        }
        pids.resize(count, 0);
    }
}

/// Post `WM_CLOSE` to `pid`'s console window.
///
/// Falls back to attaching to the child's console to look the window up.
/// Afterwards we rejoin our original console through a process still
/// attached to it, or our parent's console when none is left, or a fresh
/// one. Returns `true` if posted.
pub fn close_console_window(pid: u32) -> bool {
    let hwnd = find_console_window(pid).or_else(|| unsafe {
        let peer = console_peer(&attached_processes(), GetCurrentProcessId(), pid);
        FreeConsole();
        let hwnd = if AttachConsole(pid) != 0 {
            let hwnd = GetConsoleWindow();
            FreeConsole();
            hwnd
        } else {
            ptr::null_mut()
        };
        let rejoined = peer.is_some_and(|peer| AttachConsole(peer) != 0)
            || AttachConsole(ATTACH_PARENT_PROCESS) != 0;
        if !rejoined {
            tracing::debug!(?peer, "original console gone; allocating a new one");
            AllocConsole();
        }
        (!hwnd.is_null()).then_some(hwnd)
    });
    match hwnd {
        Some(hwnd) => unsafe { PostMessageW(hwnd, WM_CLOSE, 0, 0) } != 0,
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// While alive, this process is attached to another process's console.
///
/// Dropping it detaches and allocates a fresh console for the launcher.
#[derive(Debug)]
pub struct ConsoleSwap {
    screen: OwnedHandle,
}

impl ConsoleSwap {
    pub fn attach(pid: u32) -> Result<Self> {
        unsafe { FreeConsole() };
        if unsafe { AttachConsole(pid) } == 0 {
            let error = CaptureError::last_os("AttachConsole");
            unsafe { AllocConsole() };
            return Err(error);
        }
        let name = wide_null("CONOUT$");
        let handle = unsafe {
            CreateFileW(
                name.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                ptr::null(),
                OPEN_EXISTING,
                0,
                ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            let error = CaptureError::last_os("CreateFileW(CONOUT$)");
            unsafe {
                FreeConsole();
                AllocConsole();
            }
            return Err(error);
        }
        // SAFETY: fresh handle owned by nobody else.
        let screen = unsafe { OwnedHandle::from_raw_handle(handle) };
        Ok(Self { screen })
    }

    /// Cursor row and buffer width of the attached screen buffer.
    pub fn cursor(&self) -> Result<(i16, i16)> {
        let mut info: CONSOLE_SCREEN_BUFFER_INFO = unsafe { std::mem::zeroed() };
        if unsafe { GetConsoleScreenBufferInfo(self.screen.as_raw_handle(), &mut info) } == 0 {
            return Err(CaptureError::last_os("GetConsoleScreenBufferInfo"));
        }
        Ok((info.dwCursorPosition.Y, info.dwSize.X))
    }

    /// Characters of one screen row.
    pub fn read_row(&self, row: i16, width: i16, cells: &mut Vec<u16>) -> Result<()> {
        let width = usize::try_from(width).unwrap_or(0);
        cells.clear();
        cells.resize(width, 0);
        let mut read = 0u32;
        let ok = unsafe {
            ReadConsoleOutputCharacterW(
                self.screen.as_raw_handle(),
                cells.as_mut_ptr(),
                width as u32,
                COORD { X: 0, Y: row },
                &mut read,
            )
        };
        if ok == 0 {
            return Err(CaptureError::last_os("ReadConsoleOutputCharacterW"));
        }
        cells.truncate(read as usize);
        Ok(())
    }
}

impl Drop for ConsoleSwap {
    fn drop(&mut self) {
        unsafe {
            FreeConsole();
            AllocConsole();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_skips_launcher_and_child() {
        assert_eq!(console_peer(&[10, 20, 30], 10, 20), Some(30));
        assert_eq!(console_peer(&[20, 10, 7], 10, 20), Some(7));
    }

    #[test]
    fn no_peer_when_alone() {
        assert_eq!(console_peer(&[10], 10, 20), None);
        assert_eq!(console_peer(&[], 10, 20), None);
        assert_eq!(console_peer(&[10, 20, 0], 10, 20), None);
    }
}
