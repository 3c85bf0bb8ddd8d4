#![no_main]

use boardgame_protocol::core::codec::{Codec, JsonCodec};
use boardgame_protocol::protocol::handshake::IntroductionMessage;
use boardgame_protocol::protocol::registry::TypeRegistry;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Fuzz the introduction a server reads from an unauthenticated peer
    let Ok(registry) = TypeRegistry::with_defaults() else {
        return;
    };
    let Ok(map) = JsonCodec.decode(data) else {
        return;
    };

    if let Ok(intro) = registry.deserialize::<IntroductionMessage>(&map) {
        // If parsing succeeds, the re-encoded form must parse to the same value
        if let Ok(again) = registry.encode(&intro).and_then(|m| JsonCodec.encode(&m)) {
            let map = JsonCodec.decode(&again).unwrap_or_default();
            let _ = registry.deserialize::<IntroductionMessage>(&map);
        }
    }
    let _ = registry.parse(&map);
});
