//! Relay of launcher keystrokes into the host's console input queue.
//!
//! Bytes arriving on the input pipe become one key-down record each. CR and
//! LF both map to the Enter key; everything else takes the virtual key the
//! active keyboard layout assigns to that character, without modifier state.

use std::io::{self, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Virtual-key code for Enter.
pub const VK_RETURN: u16 = 0x0D;

/// Win32 `ERROR_NO_DATA`: a non-blocking pipe has nothing to read.
const ERROR_NO_DATA: i32 = 232;

/// A synthesized key-down event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub virtual_key: u16,
    pub ch: u8,
}

/// Map one input byte to a keystroke. `vk_for` looks up the layout's key.
pub fn keystroke(byte: u8, vk_for: impl Fn(u8) -> u16) -> KeyStroke {
    match byte {
        b'\n' | b'\r' => KeyStroke {
            virtual_key: VK_RETURN,
            ch: b'\r',
        },
        other => KeyStroke {
            virtual_key: vk_for(other) & 0xFF,
            ch: other,
        },
    }
}

pub fn keystrokes(bytes: &[u8], vk_for: impl Fn(u8) -> u16) -> Vec<KeyStroke> {
    bytes.iter().map(|&b| keystroke(b, &vk_for)).collect()
}

/// Read `source` until it closes or `running` clears, handing each chunk to
/// `deliver`.
///
/// "No data yet" from a non-blocking pipe sleeps for `poll` and retries.
/// Returns the number of bytes delivered.
pub fn pump_input<R: Read>(
    mut source: R,
    running: &AtomicBool,
    poll: Duration,
    buffer_len: usize,
    mut deliver: impl FnMut(&[u8]),
) -> io::Result<u64> {
    let mut buf = vec![0u8; buffer_len.max(1)];
    let mut total = 0u64;
    while running.load(Ordering::Acquire) {
        match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                deliver(&buf[..n]);
                total += n as u64;
            }
            Err(e) if is_no_data(&e) => thread::sleep(poll),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

fn is_no_data(error: &io::Error) -> bool {
    error.kind() == ErrorKind::WouldBlock || error.raw_os_error() == Some(ERROR_NO_DATA)
}

/// Write keystrokes for `bytes` into this process's console input queue.
#[cfg(windows)]
pub fn inject(bytes: &[u8]) -> io::Result<u32> {
    use windows_sys::Win32::System::Console::{
        GetStdHandle, INPUT_RECORD, INPUT_RECORD_0, KEY_EVENT_RECORD, KEY_EVENT_RECORD_0,
        STD_INPUT_HANDLE, WriteConsoleInputA,
    };
    use windows_sys::Win32::UI::Input::KeyboardAndMouse::{
        MAPVK_VK_TO_VSC, MapVirtualKeyA, VkKeyScanA,
    };

    const KEY_EVENT: u16 = 0x0001;

    let stdin = unsafe { GetStdHandle(STD_INPUT_HANDLE) };
    if stdin.is_null() || stdin as isize == -1 {
        return Err(io::Error::last_os_error());
    }

    let records: Vec<INPUT_RECORD> = keystrokes(bytes, |b| unsafe { VkKeyScanA(b as _) } as u16)
        .into_iter()
        .map(|key| INPUT_RECORD {
            EventType: KEY_EVENT,
            Event: INPUT_RECORD_0 {
                KeyEvent: KEY_EVENT_RECORD {
                    bKeyDown: 1,
                    wRepeatCount: 1,
                    wVirtualKeyCode: key.virtual_key,
                    wVirtualScanCode: unsafe {
                        MapVirtualKeyA(u32::from(key.virtual_key), MAPVK_VK_TO_VSC)
                    } as u16,
                    // Low byte doubles as the ANSI character.
                    uChar: KEY_EVENT_RECORD_0 {
                        UnicodeChar: u16::from(key.ch),
                    },
                    dwControlKeyState: 0,
                },
            },
        })
        .collect();

    let mut written = 0u32;
    let ok = unsafe {
        WriteConsoleInputA(stdin, records.as_ptr(), records.len() as u32, &mut written)
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(written)
}
