#![no_main]

use libfuzzer_sys::fuzz_target;
use signaling_protocol::codec::{decode_request, decode_response};

fuzz_target!(|data: &[u8]| {
    // Frames arrive as WebSocket text; skip inputs that are not UTF-8
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Decoding must never panic, only return Err for invalid input
    let _ = decode_request(text);
    let _ = decode_response(text);
});
