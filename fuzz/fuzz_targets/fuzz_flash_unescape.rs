//! Fuzz target: flash image byte stuffing
//!
//! `unescape` must reject malformed input without panicking, and any
//! image must survive `escape` → `unescape` unchanged with no literal
//! end byte left in the escaped form.
//!
//! cargo fuzz run fuzz_flash_unescape

#![no_main]

use koovdev::rpc::codec::{self, END};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = codec::unescape(data);

    let escaped = codec::escape(data);
    assert!(!escaped.contains(&END), "end byte survived escaping");
    assert_eq!(codec::unescape(&escaped).as_deref(), Ok(data));

    // Chunking never splits an image into an oversized write frame.
    for chunk in escaped.chunks(codec::FLASH_CHUNK) {
        assert!(codec::flash_write(chunk).is_ok());
    }
});
