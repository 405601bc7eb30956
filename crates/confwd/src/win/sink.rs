//! Relay sink bound to this process's own console.

use std::io::{self, IsTerminal, Stderr, Stdout};
use std::ptr;

use confwd_wire::IconImage;
use confwd_wire::text::wide_null;
use windows_sys::Win32::System::Console::{GetConsoleWindow, SetConsoleTitleW};
use windows_sys::Win32::UI::WindowsAndMessaging::{CreateIcon, DestroyIcon, HICON, SendMessageW};

use crate::icon::planes;
use crate::relay::{RelaySink, StreamSink};

const WM_GETICON: u32 = 0x007F;
const WM_SETICON: u32 = 0x0080;
const ICON_BIG: usize = 1;

/// Streams go to our stdout/stderr; titles and icons to our console window.
#[derive(Debug)]
pub struct ConsoleSink {
    streams: StreamSink<Stdout, Stderr>,
    icon: HICON,
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            streams: StreamSink::new(io::stdout(), io::stderr(), io::stderr().is_terminal()),
            icon: ptr::null_mut(),
        }
    }
}

impl RelaySink for ConsoleSink {
    fn stdout(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.streams.stdout(bytes)
    }

    fn stderr(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.streams.stderr(bytes)
    }

    fn status_line(&mut self, text: &str, attribute: u16) -> io::Result<()> {
        self.streams.status_line(text, attribute)
    }

    fn title(&mut self, title: &str) -> io::Result<()> {
        let wide = wide_null(title);
        if unsafe { SetConsoleTitleW(wide.as_ptr()) } == 0 {
            tracing::debug!(error = %io::Error::last_os_error(), "SetConsoleTitleW failed");
        }
        Ok(())
    }

    fn icon(&mut self, icon: &IconImage) -> io::Result<()> {
        let Some(planes) = planes(icon) else {
            tracing::debug!(width = icon.width, height = icon.height, "icon not rebuildable");
            return Ok(());
        };
        let window = unsafe { GetConsoleWindow() };
        if window.is_null() {
            return Ok(());
        }
        let created = unsafe {
            CreateIcon(
                ptr::null_mut(),
                planes.width,
                planes.height,
                1,
                planes.bits_per_pixel,
                planes.and_bits.as_ptr(),
                planes.xor_bits.as_ptr(),
            )
        };
        if created.is_null() {
            tracing::debug!(error = %io::Error::last_os_error(), "CreateIcon failed");
            return Ok(());
        }
        unsafe { SendMessageW(window, WM_SETICON, ICON_BIG, created as isize) };
        let previous = std::mem::replace(&mut self.icon, created);
        if !previous.is_null() {
            unsafe { DestroyIcon(previous) };
        }
        Ok(())
    }
}

/// Take `icon` off the window if it is still the one shown there, so the
/// window never references a destroyed icon.
fn unset_icon(icon: HICON, mut send: impl FnMut(u32, usize, isize) -> isize) {
    if send(WM_GETICON, ICON_BIG, 0) == icon as isize {
        send(WM_SETICON, ICON_BIG, 0);
    }
}

impl Drop for ConsoleSink {
    fn drop(&mut self) {
        if self.icon.is_null() {
            return;
        }
        let window = unsafe { GetConsoleWindow() };
        if !window.is_null() {
            unset_icon(self.icon, |message, wparam, lparam| unsafe {
                SendMessageW(window, message, wparam, lparam)
            });
        }
        unsafe { DestroyIcon(self.icon) };
    }
}
