#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Exercise the raw-byte deserialization path (includes serde_json's
    // own UTF-8 validation and error handling for invalid sequences).
    let _ = serde_json::from_slice::<arena_observer::protocol::BattleMessage>(data);

    // Also exercise the str-based path plus the classification lookup the
    // dispatcher performs on the `type` discriminator.
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = serde_json::from_str::<arena_observer::protocol::BattleMessage>(s);
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(s) {
            if let Some(wire_type) = value.get("type").and_then(|t| t.as_str()) {
                let _ = arena_observer::classify(wire_type);
            }
        }
    }
});
