//! Win32 plumbing used by the capture backends.

pub mod console;
pub mod ctrl;
pub mod pipe;
pub mod process;
pub mod sink;
pub mod stdin;

pub use ctrl::CtrlHandlerGuard;
pub use process::{ChildProcess, SpawnOptions};
pub use sink::ConsoleSink;
pub use stdin::{SharedPipe, StdinForwarder};
