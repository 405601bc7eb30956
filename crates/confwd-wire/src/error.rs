use thiserror::Error;

/// Errors raised while encoding or decoding relay frames and icon payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unknown message kind: 0x{byte:02X}")]
    UnknownKind { byte: u8 },

    #[error("truncated frame: expected {expected} bytes, got {available}")]
    Truncated { expected: usize, available: usize },

    #[error("trailing bytes: frame is {frame_len} bytes but buffer is {buffer_len}")]
    TrailingBytes { frame_len: usize, buffer_len: usize },

    #[error("payload too large: {declared} bytes")]
    PayloadTooLarge { declared: usize },

    #[error("invalid icon payload: {reason}")]
    InvalidIcon { reason: &'static str },
}
