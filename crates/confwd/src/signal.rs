//! Console control events delivered to the launcher.

/// Byte written to a pseudo console to raise an interrupt in the child.
pub const INTERRUPT_BYTE: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlEvent {
    Interrupt,
    Break,
    Close,
    Logoff,
    Shutdown,
}

impl CtrlEvent {
    /// Decode a `CTRL_*_EVENT` value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Interrupt),
            1 => Some(Self::Break),
            2 => Some(Self::Close),
            5 => Some(Self::Logoff),
            6 => Some(Self::Shutdown),
            _ => None,
        }
    }

    /// `true` for Ctrl+C and Ctrl+Break.
    #[must_use]
    pub const fn is_interrupt(self) -> bool {
        matches!(self, Self::Interrupt | Self::Break)
    }
}

#[cfg(test)]
mod tests {
    use super::CtrlEvent;

    #[test]
    fn raw_values_decode() {
        assert_eq!(CtrlEvent::from_raw(0), Some(CtrlEvent::Interrupt));
        assert_eq!(CtrlEvent::from_raw(1), Some(CtrlEvent::Break));
        assert_eq!(CtrlEvent::from_raw(2), Some(CtrlEvent::Close));
        assert_eq!(CtrlEvent::from_raw(5), Some(CtrlEvent::Logoff));
        assert_eq!(CtrlEvent::from_raw(6), Some(CtrlEvent::Shutdown));
        assert_eq!(CtrlEvent::from_raw(3), None);
        assert_eq!(CtrlEvent::from_raw(4), None);
    }

    #[test]
    fn only_c_and_break_interrupt() {
        assert!(CtrlEvent::Interrupt.is_interrupt());
        assert!(CtrlEvent::Break.is_interrupt());
        assert!(!CtrlEvent::Close.is_interrupt());
        assert!(!CtrlEvent::Shutdown.is_interrupt());
    }
}
