#![no_main]

use libfuzzer_sys::fuzz_target;
use packet_handler::utils::compression::{compress, decompress, CompressionKind};

const MAX_OUTPUT: usize = 8192;

fuzz_target!(|data: &[u8]| {
    for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
        if let Ok(compressed) = compress(data, kind, 1) {
            if let Ok(out) = decompress(&compressed, kind, data.len()) {
                assert_eq!(out, data);
            }
        }

        // Malformed input must respect the output bound
        if let Ok(out) = decompress(data, kind, MAX_OUTPUT) {
            assert!(out.len() <= MAX_OUTPUT);
        }
    }
});
