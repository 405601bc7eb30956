//! Legacy screen-buffer polling backend.
//!
//! The child gets a console of its own. The launcher gives up its console,
//! attaches to the child's, and polls the screen buffer row by row. A
//! process owns at most one console, so our stdout only survives the swap
//! when it is a file or pipe; a console stdout cannot be forwarded to.

use std::fs::File;
use std::io::Write;
use std::thread;

use crate::backend::CaptureBackend;
use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use crate::request::{CaptureMode, LaunchRequest, StdinPolicy};
use crate::screen::{ConsoleState, render_row};
use crate::win::console::{self, ConsoleSwap};
use crate::win::{ChildProcess, SpawnOptions};

pub struct LegacySession {
    child: ChildProcess,
}

#[derive(Debug)]
pub struct LegacyBackend {
    config: CaptureConfig,
}

impl LegacyBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    fn poll(&self, child: &ChildProcess, mut out: File) -> Result<u64> {
        let screen = ConsoleSwap::attach(child.pid())?;
        let mut state = ConsoleState::new();
        let mut cells = Vec::new();
        let mut rows = 0u64;
        loop {
            let exited = !child.is_running();
            let (cursor, width) = screen.cursor()?;
            let pending = if exited {
                state.finish(cursor)
            } else {
                state.advance(cursor)
            };
            for row in pending {
                screen.read_row(row, width, &mut cells)?;
                let line = render_row(&cells);
                if exited && row == cursor && line.is_empty() {
                    continue;
                }
                writeln!(out, "{line}")?;
                rows += 1;
            }
            out.flush()?;
            if exited {
                return Ok(rows);
            }
            thread::sleep(self.config.legacy_poll);
        }
    }
}

impl CaptureBackend for LegacyBackend {
    type Session = LegacySession;

    fn mode(&self) -> CaptureMode {
        CaptureMode::Legacy
    }

    fn create(&mut self, request: &LaunchRequest) -> Result<LegacySession> {
        let options = SpawnOptions {
            command_line: request.command_line(),
            new_console: true,
            hide_window: request.hide_window,
            ..SpawnOptions::default()
        };
        let child = ChildProcess::spawn(&options, None)?;
        let window = console::wait_for_console_window(
            child.pid(),
            self.config.window_timeout,
            self.config.window_poll,
        );
        if window.is_none() {
            tracing::warn!(
                pid = child.pid(),
                timeout_ms = self.config.window_timeout.as_millis() as u64,
                "child console window not found; polling anyway"
            );
        }
        if request.stdin == StdinPolicy::ForceOn {
            tracing::warn!("stdin forwarding is not available in legacy mode; ignoring --stdin");
        }
        Ok(LegacySession { child })
    }

    fn run(&mut self, session: &mut LegacySession) -> Result<()> {
        if !console::stdout_redirected() {
            tracing::warn!("{}", CaptureError::ConsoleNotCapturable);
            session.child.wait(None);
            return Ok(());
        }
        let out = console::duplicate_stdout()?;
        let rows = self.poll(&session.child, out)?;
        tracing::debug!(rows, "legacy polling finished");
        Ok(())
    }

    fn close(&mut self, session: LegacySession) -> Result<u32> {
        session.child.wait_exit_code()
    }
}
