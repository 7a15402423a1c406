use std::io::{Read, Write};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};

use crate::error::CodecError;

/// 压缩算法接口
pub trait Compressor: Send + Sync {
    fn name(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// gzip 压缩
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new(6)
    }
}

impl Compressor for GzipCompressor {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(self.level));
        encoder.write_all(data).map_err(CodecError::Compress)?;
        encoder.finish().map_err(CodecError::Compress)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut decoder = GzDecoder::new(data);
        let mut decoded = Vec::with_capacity(data.len() * 2);
        decoder.read_to_end(&mut decoded).map_err(CodecError::Decompress)?;
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_round_trip() {
        let original = b"Hello, World! This is a test message for compression.".repeat(40);
        let compressor = GzipCompressor::default();

        let compressed = compressor.compress(&original).unwrap();
        assert!(compressed.len() < original.len());

        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(original, decompressed);
    }

    #[test]
    fn test_gzip_rejects_garbage() {
        let compressor = GzipCompressor::default();
        let result = compressor.decompress(b"definitely not gzip");
        assert!(matches!(result, Err(CodecError::Decompress(_))));
    }
}
