//! Flate (zlib/deflate) codec

use std::io::{Read, Write};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::warn;
use crate::error::{PDFError, PDFResult};

/// Inflate zlib data, keeping what was produced before any corruption
pub(super) fn decode(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() * 4);
    match ZlibDecoder::new(data).read_to_end(&mut output) {
        Ok(_) => Ok(output),
        Err(err) if !output.is_empty() => {
            warn!("Flate stream corrupt after {} bytes: {}", output.len(), err);
            Ok(output)
        }
        Err(err) => {
            // Some producers omit the zlib header
            let mut raw = Vec::with_capacity(data.len() * 4);
            match DeflateDecoder::new(data).read_to_end(&mut raw) {
                Ok(_) => {
                    warn!("Flate stream has no zlib header, decoded as raw deflate");
                    Ok(raw)
                }
                Err(_) if !raw.is_empty() => {
                    warn!("Raw deflate corrupt after {} bytes: {}", raw.len(), err);
                    Ok(raw)
                }
                Err(_) => Err(PDFError::Compression(format!("flate decode failed: {}", err))),
            }
        }
    }
}

pub(super) fn encode(data: &[u8], level: u32) -> PDFResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| PDFError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| PDFError::Compression(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_truncated_stream_keeps_prefix() {
        let data = b"The quick brown fox jumps over the lazy dog. ".repeat(200);
        let encoded = encode(&data, 0).unwrap();
        let truncated = &encoded[..encoded.len() / 2];
        let decoded = decode(truncated).unwrap();
        assert!(!decoded.is_empty());
        assert!(data.starts_with(&decoded));
    }

    #[test_log::test]
    fn test_garbage_is_an_error() {
        assert!(matches!(
            decode(&[0xFF, 0xFF, 0xFF, 0xFF]),
            Err(PDFError::Compression(_))
        ));
    }
}
