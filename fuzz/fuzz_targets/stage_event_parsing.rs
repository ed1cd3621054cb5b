#![no_main]

//! Fuzz target for stage event decoding.
//!
//! Event lines arrive from producers the forwarder does not control, so
//! decoding must reject anything malformed without panicking. Whatever does
//! decode must survive an encode and decode unchanged.

use libfuzzer_sys::fuzz_target;
use stagecast_core::StageEvent;

fuzz_target!(|data: &[u8]| {
    let Ok(event) = StageEvent::from_json(data) else {
        return;
    };

    let encoded = event.to_json().unwrap_or_default();
    let decoded = StageEvent::from_json(&encoded);
    assert_eq!(decoded.ok().as_ref(), Some(&event));
});
