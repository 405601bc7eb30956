//! Graceful shutdown strategy for known dedicated-server executables.

/// Executables that accept a `quit` line on their console input.
pub const QUIT_AWARE_SERVERS: [&str; 5] = [
    "srcds.exe",
    "hl2.exe",
    "csgo.exe",
    "left4dead2.exe",
    "portal2.exe",
];

/// Line written to a quit-aware server's input.
pub const QUIT_COMMAND: &[u8] = b"quit\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Write [`QUIT_COMMAND`] to the child's input pipe.
    QuitCommand,
    /// Post `WM_CLOSE` to the child's console window.
    CloseWindow,
}

impl Shutdown {
    /// Pick a strategy from the program's file name.
    #[must_use]
    pub fn for_program(file_name: &str) -> Self {
        if QUIT_AWARE_SERVERS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(file_name))
        {
            Self::QuitCommand
        } else {
            Self::CloseWindow
        }
    }
}
