//! Checksum utilities
//!
//! SHA-256 helpers backing the ledger fingerprints and the checksum-based
//! transfer skip.

use sha2::{Digest, Sha256};
use std::io::Read;

use crate::error::Result;

/// Compute the hex-encoded SHA-256 digest of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the hex-encoded SHA-256 digest of any readable source
pub fn sha256_reader<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_sha256_hex() {
        let checksum = sha256_hex(b"hello world");
        assert_eq!(
            checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sha256_reader_matches_slice_digest() {
        let data = b"streaming and buffered digests agree";
        let mut cursor = Cursor::new(&data[..]);
        assert_eq!(sha256_reader(&mut cursor).unwrap(), sha256_hex(data));
    }
}
