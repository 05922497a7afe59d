//! Fuzz target: `FrameDecoder::feed` and `decode_reply`
//!
//! Feeds arbitrary bytes into the streaming decoder, split at a
//! data-chosen point, and parses every frame it yields as a board reply.
//! Neither may panic; emitted frames must be delimited and bounded.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use koovdev::rpc::codec::{self, END, FrameDecoder, MAX_FRAME_SIZE, START};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&split, stream)) = data.split_first() else {
        return;
    };
    let cut = usize::from(split).min(stream.len());

    let mut decoder = FrameDecoder::new();
    let mut check = |frame: &[u8]| {
        assert_eq!(frame.first(), Some(&START));
        assert_eq!(frame.last(), Some(&END));
        assert!(frame.len() <= MAX_FRAME_SIZE, "frame exceeds MAX_FRAME_SIZE");
        let _ = codec::decode_reply(frame);
    };
    decoder.feed(&stream[..cut], &mut check);
    decoder.feed(&stream[cut..], &mut check);

    // After a reset the decoder must accept bytes cleanly again.
    decoder.reset();
    decoder.feed(stream, &mut check);
});
