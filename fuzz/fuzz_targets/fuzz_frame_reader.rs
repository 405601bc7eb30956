#![no_main]

use confwd_wire::{FrameReader, HEADER_LEN, decode_streaming};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Streaming decode and the reader must agree frame for frame.
    let mut reader = FrameReader::new(data);
    let mut offset = 0usize;
    while let Ok(Some(raw)) = reader.read_frame() {
        let consumed = HEADER_LEN + raw.payload.len();
        assert!(offset + consumed <= data.len(), "reader ran past input");
        if let Ok((message, used)) = decode_streaming(&data[offset..]) {
            assert_eq!(used, consumed, "decoders disagree on frame length");
            assert_eq!(message.payload, raw.payload);
        }
        offset += consumed;
    }
});
