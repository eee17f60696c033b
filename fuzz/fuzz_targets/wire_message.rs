#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(message) = dirtysoap_coord::fuzzing::decode_wire_message_input(input) {
            debug_assert!(!message.kind().is_empty());
        }
    }
});
