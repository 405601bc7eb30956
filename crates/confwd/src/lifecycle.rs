//! Session state machine: `Idle → Created → Running → Reaped`.

use crate::error::{CaptureError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Created,
    Running,
    Reaped,
}

impl Phase {
    /// The only phase reachable from this one.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Created),
            Self::Created => Some(Self::Running),
            Self::Running => Some(Self::Reaped),
            Self::Reaped => None,
        }
    }
}

/// Tracks one session's position in the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    phase: Phase,
    exit_code: Option<u32>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: Phase::Idle,
            exit_code: None,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }

    fn advance(&mut self, to: Phase) -> Result<()> {
        if self.phase.next() != Some(to) {
            return Err(CaptureError::Lifecycle {
                from: self.phase,
                to,
            });
        }
        tracing::debug!(from = ?self.phase, ?to, "session transition");
        self.phase = to;
        Ok(())
    }

    pub fn created(&mut self) -> Result<()> {
        self.advance(Phase::Created)
    }

    pub fn running(&mut self) -> Result<()> {
        self.advance(Phase::Running)
    }

    pub fn reaped(&mut self, exit_code: u32) -> Result<()> {
        self.advance(Phase::Reaped)?;
        self.exit_code = Some(exit_code);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_path_records_exit_code() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.created().unwrap();
        lifecycle.running().unwrap();
        lifecycle.reaped(42).unwrap();
        assert_eq!(lifecycle.phase(), Phase::Reaped);
        assert_eq!(lifecycle.exit_code(), Some(42));
    }

    #[test]
    fn cannot_run_before_create() {
        let mut lifecycle = Lifecycle::new();
        match lifecycle.running() {
            Err(CaptureError::Lifecycle { from, to }) => {
                assert_eq!((from, to), (Phase::Idle, Phase::Running));
            }
            other => panic!("expected lifecycle error, got {other:?}"),
        }
        assert_eq!(lifecycle.phase(), Phase::Idle);
    }

    #[test]
    fn no_transition_after_reaped() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.created().unwrap();
        lifecycle.running().unwrap();
        lifecycle.reaped(0).unwrap();
        assert!(lifecycle.created().is_err());
        assert!(lifecycle.reaped(1).is_err());
        assert_eq!(lifecycle.exit_code(), Some(0));
    }

    #[test]
    fn create_twice_is_rejected() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.created().unwrap();
        assert!(lifecycle.created().is_err());
    }
}
