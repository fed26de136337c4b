//! Brotli codec for stored record payloads.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicI64, Ordering};

use thiserror::Error;

const BUFFER_SIZE: usize = 4096;
const QUALITY: u32 = 5;
const LG_WINDOW: u32 = 22;
const MAX_DOUBLINGS: u32 = 24;
const MAX_OUTPUT: u64 = 1 << 30;

static BYTES_SAVED: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    EncodeFailure(#[source] std::io::Error),
    #[error("decode failed: {0}")]
    DecodeFailure(String),
}

/// Compresses `text`. Adds the difference in size to the bytes-saved counter.
pub fn encode(text: &str) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(text.len() / 2 + 16);
    {
        let mut writer = brotli::CompressorWriter::new(&mut out, BUFFER_SIZE, QUALITY, LG_WINDOW);
        writer.write_all(text.as_bytes()).map_err(CodecError::EncodeFailure)?;
        writer.flush().map_err(CodecError::EncodeFailure)?;
    }
    BYTES_SAVED.fetch_add(text.len() as i64 - out.len() as i64, Ordering::Relaxed);
    Ok(out)
}

/// Decompresses into a bounded buffer, doubling the bound whenever it fills
/// exactly. Gives up after [`MAX_DOUBLINGS`] retries or 1 GiB of output.
pub fn decode(bytes: &[u8]) -> Result<String, CodecError> {
    let base = (bytes.len() as u64).max(1);
    let mut multiplier: u64 = 2;

    for _ in 0..=MAX_DOUBLINGS {
        let capacity = base.saturating_mul(multiplier).min(MAX_OUTPUT);
        let mut out = Vec::new();
        brotli::Decompressor::new(bytes, BUFFER_SIZE)
            .take(capacity)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::DecodeFailure(e.to_string()))?;

        if (out.len() as u64) < capacity {
            return String::from_utf8(out).map_err(|e| CodecError::DecodeFailure(e.to_string()));
        }
        if capacity >= MAX_OUTPUT {
            break;
        }
        multiplier = multiplier.saturating_mul(2);
    }
    Err(CodecError::DecodeFailure(format!(
        "output exceeded bound after {MAX_DOUBLINGS} doublings"
    )))
}

/// Bytes saved by compression since process start. Negative when small
/// payloads grew.
pub fn bytes_saved() -> i64 {
    BYTES_SAVED.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_empty() {
        let enc = encode("").unwrap();
        assert_eq!(decode(&enc).unwrap(), "");
    }

    #[test]
    fn round_trips_non_ascii() {
        let text = "päth/ünïcödé/文件/😀 ".repeat(50);
        assert_eq!(decode(&encode(&text).unwrap()).unwrap(), text);
    }

    #[test]
    fn round_trips_highly_compressible_multi_megabyte() {
        // Compresses far beyond 2x, so the bound has to double several times.
        let text = "a".repeat(4 * 1024 * 1024);
        let enc = encode(&text).unwrap();
        assert!(enc.len() < text.len() / 100);
        assert_eq!(decode(&enc).unwrap(), text);
    }

    #[test]
    fn round_trips_json_payload() {
        let text = (0..20_000)
            .map(|i| format!("{{\"Path\":\"/usr/lib/file{i}\",\"Size\":{i}}}"))
            .collect::<Vec<_>>()
            .join(",");
        assert_eq!(decode(&encode(&text).unwrap()).unwrap(), text);
    }

    #[test]
    fn garbage_input_does_not_panic() {
        let _ = decode(&[0x11, 0x00, 0x13, 0x37, 0xde, 0xad]);
        let _ = decode(&[0xff; 64]);
    }

    #[test]
    fn non_utf8_payload_is_a_decode_failure() {
        let mut raw = Vec::new();
        {
            let mut w = brotli::CompressorWriter::new(&mut raw, BUFFER_SIZE, QUALITY, LG_WINDOW);
            w.write_all(&[0xc3, 0x28, 0xa0, 0xa1]).unwrap();
        }
        assert!(matches!(decode(&raw), Err(CodecError::DecodeFailure(_))));
    }

    #[test]
    fn compression_updates_counter() {
        let before = bytes_saved();
        encode(&"b".repeat(10_000)).unwrap();
        assert!(bytes_saved() > before);
    }
}
