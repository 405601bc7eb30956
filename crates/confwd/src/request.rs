//! The resolved launch tuple handed from the command line to the core.

use std::fmt;
use std::str::FromStr;

use crate::error::CaptureError;

/// Which capture mechanism to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    #[default]
    Auto,
    PseudoConsole,
    Legacy,
    Inject,
}

impl CaptureMode {
    /// Banner shown on stderr once the mode is resolved.
    #[must_use]
    pub const fn banner(self) -> &'static str {
        match self {
            Self::Auto => "Using automatic mode selection",
            Self::PseudoConsole => "Using ConPTY mode",
            Self::Legacy => "Using Legacy console buffer mode",
            Self::Inject => "Using DLL injection mode",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::PseudoConsole => "conpty",
            Self::Legacy => "legacy",
            Self::Inject => "inject",
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureMode {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "conpty" => Ok(Self::PseudoConsole),
            "legacy" => Ok(Self::Legacy),
            "inject" => Ok(Self::Inject),
            _ => Err(CaptureError::invalid(format!(
                "unknown mode `{s}` (expected auto, conpty, legacy or inject)"
            ))),
        }
    }
}

/// Whether local standard input is forwarded to the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdinPolicy {
    /// Forward iff stdin is an interactive terminal at launch.
    #[default]
    Auto,
    ForceOn,
    ForceOff,
}

impl StdinPolicy {
    /// Decide once, at session start.
    #[must_use]
    pub const fn resolve(self, stdin_is_terminal: bool) -> bool {
        match self {
            Self::Auto => stdin_is_terminal,
            Self::ForceOn => true,
            Self::ForceOff => false,
        }
    }
}

/// Immutable description of one launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub program: String,
    pub args: Vec<String>,
    pub hide_window: bool,
    pub stdin: StdinPolicy,
    pub mode: CaptureMode,
}

impl LaunchRequest {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            hide_window: false,
            stdin: StdinPolicy::Auto,
            mode: CaptureMode::Auto,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: CaptureMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_stdin(mut self, stdin: StdinPolicy) -> Self {
        self.stdin = stdin;
        self
    }

    #[must_use]
    pub fn hidden(mut self, hide_window: bool) -> Self {
        self.hide_window = hide_window;
        self
    }

    /// Program and arguments joined into a single command line.
    #[must_use]
    pub fn command_line(&self) -> String {
        crate::cmdline::build_command_line(&self.program, &self.args)
    }

    /// Final path component of the program, used for server detection.
    #[must_use]
    pub fn program_file_name(&self) -> &str {
        self.program
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or(&self.program)
    }
}
