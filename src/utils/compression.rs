//! LZ4 / Zstd helpers with bounded decompression.

use crate::error::{HandlerError, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    Lz4,
    Zstd,
}

/// Minimum entropy threshold for compression (0.0-8.0 bits per byte)
/// Data above this threshold is unlikely to compress well
const MIN_ENTROPY_THRESHOLD: f64 = 6.5;

/// Calculate Shannon entropy of data (bits per byte)
fn calculate_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut freq = [0u32; 256];
    for &byte in data {
        freq[byte as usize] += 1;
    }

    let len = data.len() as f64;
    freq.iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = f64::from(count) / len;
            -p * p.log2()
        })
        .sum()
}

/// True if the payload is big enough and does not look like ciphertext
fn should_compress(data: &[u8], threshold_bytes: usize) -> bool {
    if data.len() < threshold_bytes {
        return false;
    }
    let sample_size = data.len().min(512);
    calculate_entropy(&data[..sample_size]) < MIN_ENTROPY_THRESHOLD
}

/// Compresses data using the specified compression algorithm
///
/// # Errors
/// Returns `HandlerError::CompressionFailure` if compression fails
pub fn compress(data: &[u8], kind: CompressionKind, level: i32) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            zstd::stream::copy_encode(data, &mut out, level)
                .map_err(|_| HandlerError::CompressionFailure)?;
            Ok(out)
        }
    }
}

/// Decompresses data, refusing to produce more than `max_output` bytes.
///
/// # Errors
/// Returns `HandlerError::DecompressionFailure` if the input is malformed or claims (or
/// produces) more than `max_output` bytes.
pub fn decompress(data: &[u8], kind: CompressionKind, max_output: usize) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => {
            // lz4_flex prepends the uncompressed size as a 4-byte little-endian integer;
            // check it before the crate allocates.
            if data.len() < 4 {
                return Err(HandlerError::DecompressionFailure);
            }
            let claimed_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed_size > max_output {
                return Err(HandlerError::DecompressionFailure);
            }

            lz4_flex::decompress_size_prepended(data).map_err(|_| HandlerError::DecompressionFailure)
        }
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            let reader =
                zstd::stream::Decoder::new(data).map_err(|_| HandlerError::DecompressionFailure)?;

            // One byte past the limit tells an oversized stream apart from an exact fit
            reader
                .take(max_output as u64 + 1)
                .read_to_end(&mut out)
                .map_err(|_| HandlerError::DecompressionFailure)?;
            if out.len() > max_output {
                return Err(HandlerError::DecompressionFailure);
            }
            Ok(out)
        }
    }
}

/// Compress `data` when it meets the threshold, looks compressible and actually shrinks.
///
/// Returns `None` when the payload should be sent as-is.
pub fn maybe_compress(
    data: &[u8],
    kind: CompressionKind,
    level: i32,
    threshold_bytes: usize,
) -> Result<Option<Vec<u8>>> {
    if !should_compress(data, threshold_bytes) {
        return Ok(None);
    }
    let compressed = compress(data, kind, level)?;
    if compressed.len() < data.len() {
        Ok(Some(compressed))
    } else {
        Ok(None)
    }
}
