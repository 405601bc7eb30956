//! Command-line construction for `CreateProcessW`.
//!
//! A token is wrapped in double quotes when it is empty or contains a space
//! or tab; every other token is passed through untouched. Tokens are joined
//! with single spaces, program first.

/// Quote one token if needed.
#[must_use]
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "\"\"".to_string();
    }
    if arg.contains([' ', '\t']) {
        format!("\"{arg}\"")
    } else {
        arg.to_string()
    }
}

/// Join program and arguments into one command line.
#[must_use]
pub fn build_command_line<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    let mut line = quote_arg(program);
    for arg in args {
        line.push(' ');
        line.push_str(&quote_arg(arg.as_ref()));
    }
    line
}
