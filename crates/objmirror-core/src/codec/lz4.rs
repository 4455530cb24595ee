//! LZ4 frame codec stages
//!
//! The LZ-family codec, built on `lz4_flex`'s frame format. The encoder is
//! incremental; the decoder buffers its input because the frame reader
//! consumes a complete stream.

use std::io::{Read, Write};

use lz4_flex::frame::{FrameDecoder, FrameEncoder};

use objmirror_common::{MirrorError, Result};

use super::Codec;

/// Streaming LZ4 frame compressor
pub struct Lz4Encoder {
    inner: Option<FrameEncoder<Vec<u8>>>,
}

impl Lz4Encoder {
    pub fn new() -> Self {
        Self {
            inner: Some(FrameEncoder::new(Vec::new())),
        }
    }
}

impl Default for Lz4Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for Lz4Encoder {
    fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let encoder = self
            .inner
            .as_mut()
            .ok_or_else(|| MirrorError::codec("lz4 encoder already finished"))?;
        encoder.write_all(chunk)?;
        Ok(std::mem::take(encoder.get_mut()))
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let encoder = self
            .inner
            .take()
            .ok_or_else(|| MirrorError::codec("lz4 encoder already finished"))?;
        encoder
            .finish()
            .map_err(|e| MirrorError::codec(format!("lz4 finish failed: {}", e)))
    }
}

/// LZ4 frame decompressor; buffers the stream until `finish`
pub struct Lz4Decoder {
    buffer: Vec<u8>,
}

impl Lz4Decoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }
}

impl Default for Lz4Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for Lz4Decoder {
    fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        Ok(Vec::new())
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let buffer = std::mem::take(&mut self.buffer);
        let mut decoder = FrameDecoder::new(buffer.as_slice());
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| MirrorError::codec(format!("lz4 decode failed: {}", e)))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(codec: &mut dyn Codec, input: &[u8], chunk_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in input.chunks(chunk_size) {
            out.extend(codec.transform(chunk).unwrap());
        }
        out.extend(codec.finish().unwrap());
        out
    }

    #[test]
    fn test_round_trip_chunked() {
        let input: Vec<u8> = (0..60_000u32).map(|i| (i / 7 % 251) as u8).collect();
        for chunk_size in [1usize, 33, 4096] {
            let compressed = run(&mut Lz4Encoder::new(), &input, chunk_size);
            let decompressed = run(&mut Lz4Decoder::new(), &compressed, chunk_size);
            assert_eq!(decompressed, input);
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        let mut decoder = Lz4Decoder::new();
        decoder.transform(b"definitely not an lz4 frame").unwrap();
        assert!(decoder.finish().is_err());
    }
}
