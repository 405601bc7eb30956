#![forbid(unsafe_code)]

//! Wire format shared by the confwd launcher and its injected hook module.
//!
//! # Role
//! The hook module runs inside a foreign process and streams what that
//! process writes to its console back to the launcher over a named pipe.
//! This crate owns everything both sides must agree on:
//!
//! - [`frame`]: the `[kind][len][payload]` relay frame codec and a blocking
//!   stream reader.
//! - [`icon`]: the payload layout of `Icon` frames.
//! - [`pipe`]: session key and pipe names derived from the target PID.
//! - [`text`]: UTF-16 conversions used at the Win32 boundary.
//!
//! Nothing here touches the OS, so the codec is tested on every host.

pub mod error;
pub mod frame;
pub mod icon;
pub mod pipe;
pub mod text;

pub use error::CodecError;
pub use frame::{
    DEFAULT_STATUS_ATTRIBUTE, FrameReader, HEADER_LEN, MAX_PAYLOAD_LEN, MessageKind, RawFrame,
    RelayMessage, decode, decode_streaming, encode, write_frame,
};
pub use icon::IconImage;
pub use pipe::{SESSION_PREFIX, SessionKey};
