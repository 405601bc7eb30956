//! Launch a console program and forward its console through ours.
//!
//! Three capture mechanisms are supported:
//!
//! - **Pseudo console**: the child writes into a ConPTY whose output pipe is
//!   copied to our stdout byte for byte.
//! - **Legacy**: the child gets its own console and we poll its screen
//!   buffer, emitting completed rows.
//! - **Injection**: `confwd_hook.dll` is loaded into the child, intercepts
//!   console writes, and streams them back as framed messages (see
//!   [`confwd_wire`]).
//!
//! The portable parts (argument handling, mode selection, relay decoding,
//! screen diffing) live at the top level; everything that touches the
//! Windows API is under `win` and the backend modules.

pub mod backend;
pub mod cli;
pub mod cmdline;
pub mod config;
pub mod error;
pub mod icon;
pub mod lifecycle;
pub mod logging;
pub mod orchestrator;
pub mod platform;
pub mod relay;
pub mod request;
pub mod screen;
pub mod server;
pub mod signal;
pub mod stdin;
#[cfg(windows)]
pub mod win;

pub use backend::{CaptureBackend, drive, resolve_mode};
pub use cli::{Cli, run, run_from_env};
pub use config::CaptureConfig;
pub use error::{CaptureError, Result};
pub use relay::{RelaySink, RelayStats, StreamSink, relay_frames};
pub use request::{CaptureMode, LaunchRequest, StdinPolicy};
