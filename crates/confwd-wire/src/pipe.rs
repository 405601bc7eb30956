//! Session key and named-pipe names.
//!
//! Both ends derive the same names from the target's process ID, so no name
//! has to be passed across the process boundary.

use std::fmt;

/// Prefix shared by every session key.
pub const SESSION_PREFIX: &str = "ConsoleForwarder";

const PIPE_NAMESPACE: &str = r"\\.\pipe\";

/// Identifies one hook-module session: `ConsoleForwarder_<pid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Key for the process that hosts the hook module.
    #[must_use]
    pub fn for_process(pid: u32) -> Self {
        Self(format!("{SESSION_PREFIX}_{pid}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Output pipe: the hook module writes, the relay reads.
    #[must_use]
    pub fn output_pipe(&self) -> String {
        format!("{PIPE_NAMESPACE}{}_out", self.0)
    }

    /// Input pipe: the relay writes, the hook module reads.
    #[must_use]
    pub fn input_pipe(&self) -> String {
        format!("{PIPE_NAMESPACE}{}_in", self.0)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
