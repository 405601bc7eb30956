//! Diagnostics for the hook module.
//!
//! The host owns stdout and stderr, so events go to the debugger channel
//! (`OutputDebugStringW`) instead, one line per event, prefixed so they can
//! be filtered in a debug viewer. Verbosity comes from `CONFWD_HOOK_LOG`.

use std::io::{self, Write};

use tracing_subscriber::EnvFilter;

/// Prefix on every emitted line.
pub const PREFIX: &str = "[confwd-hook] ";

const FILTER_ENV: &str = "CONFWD_HOOK_LOG";

/// Buffers one formatted event and emits it on flush or drop.
#[derive(Debug, Default)]
pub struct DebugOutput {
    line: Vec<u8>,
}

impl DebugOutput {
    /// Text of the buffered line, prefixed and NUL-free.
    pub fn render(&self) -> String {
        let text = String::from_utf8_lossy(&self.line);
        let mut out = String::with_capacity(PREFIX.len() + text.len());
        out.push_str(PREFIX);
        out.extend(text.chars().filter(|c| *c != '\0'));
        out
    }

    fn emit(&mut self) {
        if self.line.is_empty() {
            return;
        }
        emit_debug_string(&self.render());
        self.line.clear();
    }
}

impl Write for DebugOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.line.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit();
        Ok(())
    }
}

impl Drop for DebugOutput {
    fn drop(&mut self) {
        self.emit();
    }
}

#[cfg(windows)]
fn emit_debug_string(text: &str) {
    use confwd_wire::text::wide_null;
    use windows_sys::Win32::System::Diagnostics::Debug::OutputDebugStringW;

    let wide = wide_null(text);
    unsafe { OutputDebugStringW(wide.as_ptr()) };
}

#[cfg(not(windows))]
fn emit_debug_string(text: &str) {
    let _ = io::stderr().write_all(text.as_bytes());
}

/// Install the debugger-channel subscriber. A host that already installed a
/// global subscriber keeps it.
pub fn init() {
    let filter = EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(DebugOutput::default)
        .with_ansi(false)
        .without_time()
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_prefixes_and_strips_nul() {
        let mut out = DebugOutput::default();
        out.write_all(b"pipes created\0 for 42\n").unwrap();
        assert_eq!(out.render(), "[confwd-hook] pipes created for 42\n");
        out.line.clear();
    }

    #[test]
    fn flush_clears_the_line() {
        let mut out = DebugOutput::default();
        out.write_all(b"x").unwrap();
        out.flush().unwrap();
        assert!(out.line.is_empty());
    }
}
