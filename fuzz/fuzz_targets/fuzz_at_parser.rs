//! Fuzz the AT tokenizer: parsing must be total over arbitrary UTF-8.

#![no_main]

use blebridge::at::parser;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = core::str::from_utf8(data) {
        let _ = parser::parse(line);
    }
});
