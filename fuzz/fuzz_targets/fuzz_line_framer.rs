//! Fuzz the line framer with arbitrary byte streams.
//!
//! The first input byte picks a chunk size so the same corpus exercises
//! byte-at-a-time and burst delivery.

#![no_main]

use blebridge::at::framer::{LINE_CAP, LineFramer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&chunk_hint, stream)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(chunk_hint).clamp(1, 64);

    let framer = LineFramer::new();
    for piece in stream.chunks(chunk) {
        framer.feed(piece);
        assert!(framer.pending_len() <= LINE_CAP);
        if framer.take_line().is_some() {
            framer.release();
        }
    }
});
