//! Fuzz the OTA state machine with interleaved control and data writes.
//!
//! Input is consumed as length-prefixed records: `[kind][len][payload]`,
//! kind 0 = control attribute write, otherwise data attribute write.

#![no_main]

use blebridge::adapters::flash::SimFlash;
use blebridge::ota::{CTRL_REBOOT, OtaAttr, OtaService, Version};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut flash = SimFlash::new(0, 0x8_0000);
    let mut ota = OtaService::new(&mut flash, Version::new(1, 0, 0));

    let mut rest = data;
    while let [kind, len, tail @ ..] = rest {
        let take = usize::from(*len).min(tail.len());
        let (payload, next) = tail.split_at(take);
        if *kind == 0 {
            // Skip the reboot action itself; the transition guards around
            // it are still exercised.
            if payload.first() != Some(&CTRL_REBOOT) {
                let _ = ota.control(payload);
            }
        } else {
            ota.data(payload);
        }
        rest = next;
    }

    // Status and version reads are legal in every state.
    let mut status = [0u8; 1];
    ota.read(OtaAttr::Control, Some(&mut status));
    let mut version = [0u8; 8];
    ota.read(OtaAttr::Version, Some(&mut version));
});
