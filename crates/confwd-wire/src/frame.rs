//! Relay frame codec for the hook-module → launcher byte stream.
//!
//! Every captured event crosses the output pipe as one frame:
//!
//! ```text
//! +----------+-------------+----------------------------+
//! | kind (1) | len (4, LE) | payload (len bytes)        |
//! +----------+-------------+----------------------------+
//! ```
//!
//! - **kind**: 1-byte discriminator (0x01..=0x06), see [`MessageKind`].
//! - **len**: 4-byte little-endian unsigned payload length.
//! - **payload**: kind-specific bytes (text, an attribute word, or an icon).
//!
//! There is no terminator; the stream ends when the pipe closes. Frames are
//! consumed in arrival order, and ordering across kinds is significant: a
//! `StatusLineAttribute` colours the `StatusLine` text that preceded it.

use std::io::{self, Read, Write};

use crate::error::CodecError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Frame header size: 1 byte kind + 4 bytes length.
pub const HEADER_LEN: usize = 5;

/// Largest payload a reader accepts before treating the stream as corrupt.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Status-line colour assumed until the host reports one:
/// foreground green | foreground intensity | background intensity.
pub const DEFAULT_STATUS_ATTRIBUTE: u16 = 0x008A;

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Wire discriminator for relay frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Stdout = 0x01,
    Stderr = 0x02,
    StatusLine = 0x03,
    StatusLineAttribute = 0x04,
    Title = 0x05,
    Icon = 0x06,
}

impl MessageKind {
    /// All kinds in wire order.
    pub const ALL: [MessageKind; 6] = [
        MessageKind::Stdout,
        MessageKind::Stderr,
        MessageKind::StatusLine,
        MessageKind::StatusLineAttribute,
        MessageKind::Title,
        MessageKind::Icon,
    ];

    /// Parse a raw byte into a known kind, or `None` for reserved codes.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Stdout),
            0x02 => Some(Self::Stderr),
            0x03 => Some(Self::StatusLine),
            0x04 => Some(Self::StatusLineAttribute),
            0x05 => Some(Self::Title),
            0x06 => Some(Self::Icon),
            _ => None,
        }
    }

    /// Return the wire byte for this kind.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// RelayMessage
// ---------------------------------------------------------------------------

/// One decoded frame: kind + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl RelayMessage {
    pub fn new(kind: MessageKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Payload length as carried in the header.
    pub fn len(&self) -> u32 {
        // Construction through `encode` guarantees this fits.
        self.payload.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Build a `StatusLineAttribute` frame from a console attribute word.
    pub fn status_attribute(attribute: u16) -> Self {
        Self::new(
            MessageKind::StatusLineAttribute,
            attribute.to_le_bytes().to_vec(),
        )
    }

    /// Interpret a `StatusLineAttribute` payload as its attribute word.
    pub fn attribute_word(&self) -> Option<u16> {
        match (self.kind, self.payload.as_slice()) {
            (MessageKind::StatusLineAttribute, [lo, hi, ..]) => {
                Some(u16::from_le_bytes([*lo, *hi]))
            }
            _ => None,
        }
    }
}

/// A frame whose kind byte has not been validated yet.
///
/// Stream readers hand these out so the consumer can skip reserved kinds
/// without losing its position in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub kind: u8,
    pub payload: Vec<u8>,
}

impl RawFrame {
    /// Validate the kind byte.
    pub fn into_message(self) -> Result<RelayMessage, CodecError> {
        let kind =
            MessageKind::from_u8(self.kind).ok_or(CodecError::UnknownKind { byte: self.kind })?;
        Ok(RelayMessage {
            kind,
            payload: self.payload,
        })
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn checked_len(payload: &[u8]) -> Result<u32, CodecError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge {
            declared: payload.len(),
        });
    }
    u32::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge {
        declared: payload.len(),
    })
}

/// Encode a frame into a fresh buffer.
///
/// The whole frame is assembled before it is written anywhere, so a single
/// `write_all` puts the header and payload on the wire together. Payloads
/// over [`MAX_PAYLOAD_LEN`] are refused, matching what a reader accepts.
pub fn encode(kind: MessageKind, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let len = checked_len(payload)?;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push(kind.as_u8());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Encode and write a frame to `writer`.
pub fn write_frame<W: Write>(writer: &mut W, kind: MessageKind, payload: &[u8]) -> io::Result<()> {
    let buf = encode(kind, payload).map_err(io::Error::other)?;
    writer.write_all(&buf)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn parse_header(buf: &[u8]) -> Result<(u8, usize), CodecError> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            expected: HEADER_LEN,
            available: buf.len(),
        });
    }
    let len = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge { declared: len });
    }
    Ok((buf[0], len))
}

/// Decode a buffer that holds exactly one frame.
///
/// Rejects truncated frames, reserved kinds, oversized payloads, and trailing bytes.
pub fn decode(buf: &[u8]) -> Result<RelayMessage, CodecError> {
    let (message, consumed) = decode_streaming(buf)?;
    if consumed != buf.len() {
        return Err(CodecError::TrailingBytes {
            frame_len: consumed,
            buffer_len: buf.len(),
        });
    }
    Ok(message)
}

/// Decode the next frame from the front of `buf`.
///
/// Returns `(message, bytes_consumed)`. Unlike [`decode`], trailing bytes are
/// left for the next call.
pub fn decode_streaming(buf: &[u8]) -> Result<(RelayMessage, usize), CodecError> {
    let (kind, len) = parse_header(buf)?;
    let total = HEADER_LEN + len;
    if buf.len() < total {
        return Err(CodecError::Truncated {
            expected: total,
            available: buf.len(),
        });
    }
    let frame = RawFrame {
        kind,
        payload: buf[HEADER_LEN..total].to_vec(),
    };
    Ok((frame.into_message()?, total))
}

// ---------------------------------------------------------------------------
// Stream reader
// ---------------------------------------------------------------------------

/// Pulls frames off a blocking byte stream (the output pipe).
///
/// A clean end-of-stream before a kind byte yields `Ok(None)`; a stream that
/// ends inside a header or payload is an `UnexpectedEof` error. Short reads
/// are retried until the requested byte count arrives.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read the next frame.
    pub fn read_frame(&mut self) -> io::Result<Option<RawFrame>> {
        let mut kind = [0u8; 1];
        loop {
            match self.inner.read(&mut kind) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        let mut len = [0u8; 4];
        self.inner.read_exact(&mut len)?;
        let len = u32::from_le_bytes(len) as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                CodecError::PayloadTooLarge { declared: len },
            ));
        }

        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload)?;
        Ok(Some(RawFrame {
            kind: kind[0],
            payload,
        }))
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = io::Result<RawFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_frame().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_attribute_bits() {
        const FOREGROUND_GREEN: u16 = 0x0002;
        const FOREGROUND_INTENSITY: u16 = 0x0008;
        const BACKGROUND_INTENSITY: u16 = 0x0080;
        assert_eq!(
            DEFAULT_STATUS_ATTRIBUTE,
            FOREGROUND_GREEN | FOREGROUND_INTENSITY | BACKGROUND_INTENSITY
        );
    }

    /// Reader that hands out at most `chunk` bytes per call.
    struct Trickle<'a> {
        data: &'a [u8],
        chunk: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.chunk.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    // -- Envelope tests --

    #[test]
    fn stdout_wire_format() {
        let encoded = encode(MessageKind::Stdout, b"hi\n").unwrap();
        assert_eq!(encoded, [0x01, 0x03, 0x00, 0x00, 0x00, b'h', b'i', b'\n']);
    }

    #[test]
    fn length_is_little_endian() {
        let payload = vec![0xAB; 0x0102];
        let encoded = encode(MessageKind::Stderr, &payload).unwrap();
        assert_eq!(&encoded[..HEADER_LEN], &[0x02, 0x02, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn decode_roundtrip_each_kind() {
        for kind in MessageKind::ALL {
            let encoded = encode(kind, b"payload").unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(decoded, RelayMessage::new(kind, b"payload".to_vec()));
        }
    }

    #[test]
    fn empty_payload_roundtrip() {
        let encoded = encode(MessageKind::Title, &[]).unwrap();
        assert_eq!(encoded.len(), HEADER_LEN);
        assert!(decode(&encoded).unwrap().is_empty());
    }

    #[test]
    fn truncated_header_rejected() {
        let result = decode(&[0x01, 0x00]);
        assert!(matches!(
            result,
            Err(CodecError::Truncated {
                expected: HEADER_LEN,
                available: 2
            })
        ));
    }

    #[test]
    fn truncated_payload_rejected() {
        let mut encoded = encode(MessageKind::Stdout, b"abcdef").unwrap();
        encoded.truncate(encoded.len() - 2);
        assert!(matches!(
            decode(&encoded),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut encoded = encode(MessageKind::Stdout, b"x").unwrap();
        encoded.push(0xFF);
        assert!(matches!(
            decode(&encoded),
            Err(CodecError::TrailingBytes { .. })
        ));
    }

    #[test]
    fn reserved_kinds_rejected() {
        for byte in [0x00, 0x07, 0xFF] {
            let buf = [byte, 0, 0, 0, 0];
            assert!(matches!(
                decode(&buf),
                Err(CodecError::UnknownKind { byte: b }) if b == byte
            ));
        }
    }

    #[test]
    fn oversized_length_rejected() {
        let len = (MAX_PAYLOAD_LEN as u32 + 1).to_le_bytes();
        let buf = [0x01, len[0], len[1], len[2], len[3]];
        assert!(matches!(
            decode(&buf),
            Err(CodecError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn encode_refuses_what_reader_would_reject() {
        let at_limit = vec![b'x'; MAX_PAYLOAD_LEN];
        let frame = encode(MessageKind::Stdout, &at_limit).unwrap();
        let read = FrameReader::new(frame.as_slice()).read_frame().unwrap();
        assert_eq!(read.map(|f| f.payload.len()), Some(MAX_PAYLOAD_LEN));

        let over = vec![b'x'; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            encode(MessageKind::Stdout, &over),
            Err(CodecError::PayloadTooLarge { declared }) if declared == MAX_PAYLOAD_LEN + 1
        ));
    }

    #[test]
    fn streaming_decode_multiple_frames() {
        let first = encode(MessageKind::StatusLine, b"status").unwrap();
        let second = RelayMessage::status_attribute(0x008A);
        let second_bytes = encode(second.kind, &second.payload).unwrap();
        let mut buf = first.clone();
        buf.extend_from_slice(&second_bytes);

        let (m1, used1) = decode_streaming(&buf).unwrap();
        assert_eq!(m1.kind, MessageKind::StatusLine);
        assert_eq!(used1, first.len());

        let (m2, used2) = decode_streaming(&buf[used1..]).unwrap();
        assert_eq!(m2.attribute_word(), Some(0x008A));
        assert_eq!(used2, second_bytes.len());
    }

    // -- MessageKind tests --

    #[test]
    fn kind_roundtrip_all() {
        for byte in 0x01..=0x06u8 {
            assert_eq!(MessageKind::from_u8(byte).unwrap().as_u8(), byte);
        }
    }

    #[test]
    fn attribute_word_requires_attribute_kind() {
        let msg = RelayMessage::new(MessageKind::StatusLine, vec![0x8A, 0x00]);
        assert_eq!(msg.attribute_word(), None);
        let short = RelayMessage::new(MessageKind::StatusLineAttribute, vec![0x8A]);
        assert_eq!(short.attribute_word(), None);
    }

    // -- FrameReader tests --

    #[test]
    fn reader_reassembles_trickled_frames() {
        let mut stream = encode(MessageKind::Stdout, b"hello world").unwrap();
        stream.extend(encode(MessageKind::Stderr, b"oops").unwrap());
        let mut reader = FrameReader::new(Trickle {
            data: &stream,
            chunk: 3,
        });

        let first = reader.read_frame().unwrap().unwrap();
        assert_eq!(first.kind, 0x01);
        assert_eq!(first.payload, b"hello world");
        let second = reader.read_frame().unwrap().unwrap();
        assert_eq!(second.kind, 0x02);
        assert_eq!(second.payload, b"oops");
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn reader_clean_eof_is_none() {
        let mut reader = FrameReader::new(io::empty());
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn reader_eof_inside_frame_is_error() {
        let mut stream = encode(MessageKind::Stdout, b"cut short").unwrap();
        stream.truncate(HEADER_LEN + 2);
        let mut reader = FrameReader::new(stream.as_slice());
        let err = reader.read_frame().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn reader_passes_reserved_kinds_through() {
        let stream = [0x42, 0x01, 0x00, 0x00, 0x00, 0x7F];
        let mut reader = FrameReader::new(&stream[..]);
        let frame = reader.read_frame().unwrap().unwrap();
        assert_eq!(frame.kind, 0x42);
        assert!(matches!(
            frame.into_message(),
            Err(CodecError::UnknownKind { byte: 0x42 })
        ));
    }

    #[test]
    fn write_frame_matches_encode() {
        let mut out = Vec::new();
        write_frame(&mut out, MessageKind::Title, "naïve".as_bytes()).unwrap();
        assert_eq!(out, encode(MessageKind::Title, "naïve".as_bytes()).unwrap());
    }
}
