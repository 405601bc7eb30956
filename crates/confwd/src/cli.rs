//! Command-line glue: `confwd [options] <program> [program-args...]`.
//!
//! Options are recognized only before the program token. Everything from
//! the program onward belongs to the child, including tokens starting with
//! `-`. `@file` tokens anywhere are replaced by the lines of that file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::{ArgAction, CommandFactory, Parser};

use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use crate::request::{CaptureMode, LaunchRequest, StdinPolicy};

#[derive(Debug, Parser)]
#[command(
    name = "confwd",
    about = "Run a console program in its own console and forward its output to this one",
    version
)]
pub struct Cli {
    /// Capture mechanism: auto, conpty, legacy or inject.
    #[arg(long, value_name = "MODE", default_value = "auto")]
    pub mode: CaptureMode,

    /// Hide the child's console window.
    #[arg(long, overrides_with = "show")]
    pub hide: bool,

    /// Show the child's console window (default).
    #[arg(long, overrides_with = "hide")]
    pub show: bool,

    /// Always forward standard input to the child.
    #[arg(long = "stdin", overrides_with = "no_stdin")]
    pub force_stdin: bool,

    /// Never forward standard input to the child.
    #[arg(long = "no-stdin", overrides_with = "force_stdin")]
    pub no_stdin: bool,

    /// More diagnostics on stderr (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Program to launch.
    #[arg(value_name = "PROGRAM")]
    pub program: Option<String>,

    /// Arguments passed to the program verbatim.
    #[arg(value_name = "ARGS", allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Cli {
    #[must_use]
    pub fn stdin_policy(&self) -> StdinPolicy {
        if self.force_stdin {
            StdinPolicy::ForceOn
        } else if self.no_stdin {
            StdinPolicy::ForceOff
        } else {
            StdinPolicy::Auto
        }
    }

    /// The launch tuple, or `None` when no program was named.
    #[must_use]
    pub fn into_request(self) -> Option<LaunchRequest> {
        let stdin = self.stdin_policy();
        let program = self.program?;
        Some(
            LaunchRequest::new(program)
                .with_args(self.args)
                .with_mode(self.mode)
                .with_stdin(stdin)
                .hidden(self.hide),
        )
    }
}

// ---------------------------------------------------------------------------
// Argument files
// ---------------------------------------------------------------------------

/// Parse the contents of an argument file into tokens.
#[must_use]
pub fn parse_argfile(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|line| line.trim_matches([' ', '\t', '\r', '\n']))
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.strip_prefix('"')
                .and_then(|rest| rest.strip_suffix('"'))
                .unwrap_or(line)
                .to_string()
        })
        .collect()
}

fn read_argfile(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path).map_err(|source| CaptureError::ArgFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_argfile(&contents))
}

/// Replace every `@path` token with the contents of `path`.
pub fn expand_argfiles<I>(tokens: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = String>,
{
    let mut expanded = Vec::new();
    for token in tokens {
        match token.strip_prefix('@') {
            Some(path) if !path.is_empty() => {
                expanded.extend(read_argfile(&PathBuf::from(path))?);
            }
            _ => expanded.push(token),
        }
    }
    Ok(expanded)
}

// ---------------------------------------------------------------------------
// Option/program split
// ---------------------------------------------------------------------------

/// Insert `--` before the program token so clap leaves child arguments
/// alone. `tokens` excludes the launcher's own name.
#[must_use]
pub fn split_program(tokens: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(tokens.len() + 1);
    let mut iter = tokens.into_iter();
    while let Some(token) = iter.next() {
        if token == "--" {
            out.push(token);
            out.extend(iter);
            return out;
        }
        if token == "/?" {
            out.push("--help".to_string());
            continue;
        }
        if token.len() > 1 && token.starts_with('-') {
            let takes_value = token == "--mode";
            out.push(token);
            if takes_value && let Some(value) = iter.next() {
                out.push(value);
            }
            continue;
        }
        out.push("--".to_string());
        out.push(token);
        out.extend(iter);
        return out;
    }
    out
}

/// Argument files expanded and the program split off, ready for clap.
pub fn prepare_args<I>(argv: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = OsString>,
{
    let mut argv = argv
        .into_iter()
        .map(|arg| arg.to_string_lossy().into_owned());
    let bin = argv.next().unwrap_or_else(|| "confwd".to_string());
    let tokens = expand_argfiles(argv)?;
    let mut prepared = vec![bin];
    prepared.extend(split_program(tokens));
    Ok(prepared)
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Parse the process arguments and run. Returns the exit code.
pub fn run_from_env() -> Result<i32> {
    let args = prepare_args(std::env::args_os())?;
    let cli = Cli::try_parse_from(args).unwrap_or_else(|error| error.exit());
    run(cli)
}

pub fn run(cli: Cli) -> Result<i32> {
    crate::logging::init(cli.verbose);
    let Some(request) = cli.into_request() else {
        Cli::command().print_help()?;
        println!();
        return Ok(0);
    };
    crate::platform::prepare_console();
    crate::orchestrator::launch(&request, &CaptureConfig::default())
}
