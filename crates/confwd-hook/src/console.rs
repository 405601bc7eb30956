//! Console classification helpers used by the interceptors.

use confwd_wire::MessageKind;

/// Row 0 of the screen buffer is the host's status line.
pub fn is_status_row(y: i16) -> bool {
    y == 0
}

/// Attribute word to forward for a status-row attribute write.
pub fn status_attribute(attributes: &[u16]) -> Option<u16> {
    attributes.first().copied()
}

pub fn stream_kind(is_stderr: bool) -> MessageKind {
    if is_stderr {
        MessageKind::Stderr
    } else {
        MessageKind::Stdout
    }
}

#[cfg(windows)]
pub use self::win::*;

#[cfg(windows)]
mod win {
    use std::ptr;

    use confwd_wire::text::utf16_to_utf8;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Globalization::{CP_ACP, MultiByteToWideChar};
    use windows_sys::Win32::Storage::FileSystem::{FILE_TYPE_CHAR, GetFileType};
    use windows_sys::Win32::System::Console::{GetConsoleMode, GetStdHandle, STD_ERROR_HANDLE};

    /// `true` for a character device that also answers `GetConsoleMode`.
    pub fn is_console_handle(handle: HANDLE) -> bool {
        if unsafe { GetFileType(handle) } != FILE_TYPE_CHAR {
            return false;
        }
        let mut mode = 0u32;
        unsafe { GetConsoleMode(handle, &mut mode) != 0 }
    }

    /// Compares against the process's current error handle, not one cached
    /// at start-up; hosts may redirect it.
    pub fn is_current_stderr(handle: HANDLE) -> bool {
        handle == unsafe { GetStdHandle(STD_ERROR_HANDLE) }
    }

    /// Decode text in the active ANSI code page.
    pub fn ansi_to_utf8(bytes: &[u8]) -> String {
        if bytes.is_empty() {
            return String::new();
        }
        let len = bytes.len() as i32;
        let needed =
            unsafe { MultiByteToWideChar(CP_ACP, 0, bytes.as_ptr(), len, ptr::null_mut(), 0) };
        if needed <= 0 {
            return String::from_utf8_lossy(bytes).into_owned();
        }
        let mut wide = vec![0u16; needed as usize];
        let written = unsafe {
            MultiByteToWideChar(CP_ACP, 0, bytes.as_ptr(), len, wide.as_mut_ptr(), needed)
        };
        wide.truncate(written.max(0) as usize);
        utf16_to_utf8(&wide)
    }
}
