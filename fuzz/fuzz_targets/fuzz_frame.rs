#![no_main]

use boardgame_protocol::core::frame::{frame, unframe, FrameCodec};
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // A single frame either parses or reports how much is missing
    if let Ok((payload, used)) = unframe(data) {
        assert_eq!(used, payload.len() + 2);
        assert_eq!(frame(&payload).ok().as_deref(), Some(&data[..used]));
    }

    // Streaming decode never panics and never yields more than the input holds
    let mut buf = BytesMut::from(data);
    let mut codec = FrameCodec;
    let mut total = 0usize;
    while let Ok(Some(payload)) = codec.decode(&mut buf) {
        total += payload.len() + 2;
    }
    assert!(total <= data.len());
    let _ = codec.decode_eof(&mut buf);
});
