#![no_main]

use std::sync::atomic::AtomicBool;

use confwd::{StreamSink, relay_frames};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let colour = data.first().is_some_and(|b| b & 1 == 1);
    let mut sink = StreamSink::new(Vec::new(), Vec::new(), colour);
    let stats = relay_frames(data, &mut sink, &AtomicBool::new(true));
    assert!(stats.skipped <= stats.frames);
    let (out, err) = sink.into_inner();
    // Every output byte came out of a frame payload.
    assert!(out.len() as u64 <= stats.bytes);
    let _ = err;
});
