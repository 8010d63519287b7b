//! Algorithm-tagged compression for deflated log entries.

use perch_core::config::CompressionKind;
use perch_core::error::{Error, Result};

pub(crate) fn algorithm_tag(kind: CompressionKind) -> u8 {
    match kind {
        CompressionKind::None => 0,
        CompressionKind::Zstd => 1,
        CompressionKind::Snappy => 2,
    }
}

pub(crate) fn compress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::None => Ok(data.to_vec()),
        CompressionKind::Zstd => zstd::encode_all(data, 3).map_err(|e| Error::Coding {
            message: format!("zstd compression failed: {}", e),
        }),
        CompressionKind::Snappy => {
            snap::raw::Encoder::new()
                .compress_vec(data)
                .map_err(|e| Error::Coding {
                    message: format!("snappy compression failed: {}", e),
                })
        }
    }
}

pub(crate) fn decompress(data: &[u8], algorithm: u8) -> Result<Vec<u8>> {
    match algorithm {
        0 => Ok(data.to_vec()),
        1 => zstd::decode_all(data).map_err(|e| Error::Coding {
            message: format!("zstd decompression failed: {}", e),
        }),
        2 => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| Error::Coding {
                message: format!("snappy decompression failed: {}", e),
            }),
        other => Err(Error::coding(format!("unknown compression algorithm: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_algorithms() {
        let data = vec![7u8; 4096];
        for kind in [CompressionKind::None, CompressionKind::Zstd, CompressionKind::Snappy] {
            let compressed = compress(&data, kind).unwrap();
            let restored = decompress(&compressed, algorithm_tag(kind)).unwrap();
            assert_eq!(restored, data);
        }
    }

    #[test]
    fn unknown_algorithm_fails() {
        assert!(decompress(b"x", 9).is_err());
    }
}
