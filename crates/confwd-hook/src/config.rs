use std::time::Duration;

/// Timing and sizing of the hook module's pipe server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookConfig {
    /// How long the acceptor waits for a relay to connect both pipes.
    pub connect_timeout: Duration,
    /// Interval between non-blocking connect attempts.
    pub connect_poll: Duration,
    /// Sleep between reads while the input pipe is empty.
    pub input_poll: Duration,
    /// Pipe buffer size and input read size, in bytes.
    pub buffer_len: usize,
    /// Bound on joining the relay thread at unload.
    pub shutdown_wait: Duration,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            connect_poll: Duration::from_millis(100),
            input_poll: Duration::from_millis(50),
            buffer_len: 4096,
            shutdown_wait: Duration::from_secs(1),
        }
    }
}

impl HookConfig {
    /// Number of connect attempts that fit in the timeout.
    pub fn connect_attempts(&self) -> u32 {
        if self.connect_poll.is_zero() {
            return 1;
        }
        let attempts = self.connect_timeout.as_millis() / self.connect_poll.as_millis().max(1);
        u32::try_from(attempts).unwrap_or(u32::MAX).max(1)
    }
}
