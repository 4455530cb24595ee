//! Gzip codec stages
//!
//! Incremental gzip encode/decode built on `flate2`'s write-side adapters.
//! Each call drains the adapter's output buffer so memory stays bounded to
//! one codec window regardless of stream size.

use std::io::Write;

use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression as GzLevel;

use objmirror_common::{MirrorError, Result};

use super::Codec;

/// Streaming gzip compressor
pub struct GzipEncoder {
    inner: Option<GzEncoder<Vec<u8>>>,
}

impl GzipEncoder {
    pub fn new() -> Self {
        Self {
            inner: Some(GzEncoder::new(Vec::new(), GzLevel::default())),
        }
    }
}

impl Default for GzipEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for GzipEncoder {
    fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let encoder = self
            .inner
            .as_mut()
            .ok_or_else(|| MirrorError::codec("gzip encoder already finished"))?;
        encoder.write_all(chunk)?;
        Ok(std::mem::take(encoder.get_mut()))
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let encoder = self
            .inner
            .take()
            .ok_or_else(|| MirrorError::codec("gzip encoder already finished"))?;
        Ok(encoder.finish()?)
    }
}

/// Streaming gzip decompressor
pub struct GzipDecoder {
    inner: Option<GzDecoder<Vec<u8>>>,
}

impl GzipDecoder {
    pub fn new() -> Self {
        Self {
            inner: Some(GzDecoder::new(Vec::new())),
        }
    }
}

impl Default for GzipDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for GzipDecoder {
    fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let decoder = self
            .inner
            .as_mut()
            .ok_or_else(|| MirrorError::codec("gzip decoder already finished"))?;
        decoder.write_all(chunk)?;
        Ok(std::mem::take(decoder.get_mut()))
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let decoder = self
            .inner
            .take()
            .ok_or_else(|| MirrorError::codec("gzip decoder already finished"))?;
        Ok(decoder.finish()?)
    }
}
