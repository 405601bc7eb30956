//! Diagnostic logging to stderr.
//!
//! The child's stdout owns our stdout, so every diagnostic goes to stderr.
//! `CONFWD_LOG` takes precedence; otherwise `-v` selects `info` and `-vv`
//! selects `debug` over the default `warn`.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "CONFWD_LOG";

/// Filter directive implied by the `-v` count.
#[must_use]
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

fn log_filter(verbosity: u8) -> EnvFilter {
    let directive = std::env::var(LOG_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default_directive(verbosity).to_string());
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(verbosity: u8) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbosity))
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::default_directive;

    #[test]
    fn verbosity_steps_through_levels() {
        assert_eq!(default_directive(0), "warn");
        assert_eq!(default_directive(1), "info");
        assert_eq!(default_directive(2), "debug");
        assert_eq!(default_directive(9), "debug");
    }
}
