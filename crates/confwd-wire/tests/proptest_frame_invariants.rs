//! Property-based invariant tests for the relay wire format (public API only).
//!
//! 1. encode → decode reproduces (kind, length, payload) exactly
//! 2. concatenated frames stream back in order through `FrameReader`
//! 3. `FrameReader` is insensitive to how the stream is chunked
//! 4. icon payloads round-trip, including mask-only icons
//! 5. truncating an encoded frame anywhere is never a successful decode

use std::io::{self, Read};

use confwd_wire::{FrameReader, HEADER_LEN, IconImage, MessageKind, decode, encode};
use proptest::prelude::*;

// ── Helpers ──────────────────────────────────────────────────────────

fn arb_kind() -> impl Strategy<Value = MessageKind> {
    prop::sample::select(MessageKind::ALL.to_vec())
}

fn arb_frame() -> impl Strategy<Value = (MessageKind, Vec<u8>)> {
    (arb_kind(), prop::collection::vec(any::<u8>(), 0..512))
}

fn arb_icon() -> impl Strategy<Value = IconImage> {
    (
        1..256i32,
        1..256i32,
        prop::sample::select(vec![1, 4, 8, 24, 32]),
        0..64i32,
        0..64i32,
        prop::collection::vec(any::<u8>(), 0..1024),
        prop::collection::vec(any::<u8>(), 1..256),
    )
        .prop_map(|(width, height, bpp, hx, hy, color, mask)| IconImage {
            width,
            height,
            bits_per_pixel: bpp,
            hotspot_x: hx,
            hotspot_y: hy,
            color,
            mask,
        })
}

struct Chunked {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl Read for Chunked {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = self.chunk.min(buf.len()).min(remaining.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Round-trip law
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn encode_decode_roundtrip((kind, payload) in arb_frame()) {
        let encoded = encode(kind, &payload).unwrap();
        prop_assert_eq!(encoded.len(), HEADER_LEN + payload.len());
        let decoded = decode(&encoded).unwrap();
        prop_assert_eq!(decoded.kind, kind);
        prop_assert_eq!(decoded.len() as usize, payload.len());
        prop_assert_eq!(decoded.payload, payload);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2 + 3. Streams preserve order regardless of chunking
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn stream_preserves_order(
        frames in prop::collection::vec(arb_frame(), 0..16),
        chunk in 1usize..64,
    ) {
        let mut data = Vec::new();
        for (kind, payload) in &frames {
            data.extend(encode(*kind, payload).unwrap());
        }
        let reader = FrameReader::new(Chunked { data, pos: 0, chunk });
        let read: Vec<(u8, Vec<u8>)> = reader
            .map(|frame| frame.map(|f| (f.kind, f.payload)))
            .collect::<io::Result<_>>()
            .unwrap();
        let expected: Vec<(u8, Vec<u8>)> = frames
            .into_iter()
            .map(|(kind, payload)| (kind.as_u8(), payload))
            .collect();
        prop_assert_eq!(read, expected);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Icon round-trip
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn icon_roundtrip(icon in arb_icon()) {
        let bytes = icon.to_bytes().unwrap();
        let parsed = IconImage::from_bytes(&bytes).unwrap();
        prop_assert_eq!(parsed, icon);
    }

    #[test]
    fn mask_only_icon_roundtrip(mut icon in arb_icon()) {
        icon.color.clear();
        let parsed = IconImage::from_bytes(&icon.to_bytes().unwrap()).unwrap();
        prop_assert!(parsed.is_mask_only());
        prop_assert_eq!(parsed, icon);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Truncation is always detected
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn truncated_frame_never_decodes(
        (kind, payload) in arb_frame(),
        cut in any::<prop::sample::Index>(),
    ) {
        let encoded = encode(kind, &payload).unwrap();
        let at = cut.index(encoded.len());
        prop_assert!(decode(&encoded[..at]).is_err());
    }
}
