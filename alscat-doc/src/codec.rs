//! Container codec for project documents.
//!
//! Documents are stored either as gzip-compressed XML or as plain text. The
//! format is detected from the two-byte gzip magic; plain input passes through
//! unchanged. Encoding always compresses, so any edited document is written
//! back in the compressed form regardless of how it was read.

use std::io::{Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::{DocError, Result};

/// Gzip member header magic.
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Upper bound on decompressed document size.
pub const DEFAULT_MAX_DECOMPRESSED: usize = 50_000_000;

/// Returns true when `bytes` starts with the gzip magic.
pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[..2] == GZIP_MAGIC
}

/// Decode raw document bytes into text.
///
/// Compressed payloads are inflated up to `max_bytes` of output; anything
/// larger fails with [`DocError::TooLarge`]. Invalid UTF-8 is replaced, never
/// rejected.
pub fn decode(bytes: &[u8], max_bytes: usize) -> Result<String> {
    if !is_compressed(bytes) {
        if bytes.len() > max_bytes {
            return Err(DocError::TooLarge { limit: max_bytes });
        }
        return Ok(String::from_utf8_lossy(bytes).into_owned());
    }

    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .take(limit)
        .read_to_end(&mut out)
        .map_err(|e| DocError::Decompress(e.to_string()))?;

    if out.len() > max_bytes {
        return Err(DocError::TooLarge { limit: max_bytes });
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Read and decode a document from disk.
pub fn decode_file(path: &Path, max_bytes: usize) -> Result<String> {
    let bytes = std::fs::read(path)?;
    decode(&bytes, max_bytes)
}

/// Compress document text for write-back.
pub fn encode(text: &str) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(text.len() / 4), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .map_err(|e| DocError::Encode(e.to_string()))?;
    encoder.finish().map_err(|e| DocError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plain_text_passes_through() {
        let text = "<Ableton><LiveSet/></Ableton>";
        let decoded = decode(text.as_bytes(), DEFAULT_MAX_DECOMPRESSED).unwrap();
        assert_eq!(decoded, text);
    }

    #[test]
    fn encode_produces_gzip_magic() {
        let bytes = encode("<LiveSet/>").unwrap();
        assert!(is_compressed(&bytes));
        assert!(!is_compressed(b"<LiveSet/>"));
        assert!(!is_compressed(&[0x1F]));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let text = "x".repeat(4096);
        let bytes = encode(&text).unwrap();
        let err = decode(&bytes, 1024).unwrap_err();
        assert!(matches!(err, DocError::TooLarge { limit: 1024 }));

        // Exactly at the ceiling is fine.
        assert_eq!(decode(&bytes, 4096).unwrap().len(), 4096);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let bytes = [b'a', 0xFF, 0xFE, b'b'];
        let decoded = decode(&bytes, DEFAULT_MAX_DECOMPRESSED).unwrap();
        assert!(decoded.starts_with('a'));
        assert!(decoded.ends_with('b'));
        assert!(decoded.contains('\u{FFFD}'));
    }

    #[test]
    fn corrupt_gzip_header_is_an_error() {
        // Magic present but compression method is not deflate.
        let bytes = [0x1F, 0x8B, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(
            decode(&bytes, DEFAULT_MAX_DECOMPRESSED),
            Err(DocError::Decompress(_))
        ));
    }

    #[test]
    fn decode_file_reads_compressed_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Song.als");
        std::fs::write(&path, encode("<Tempo Value=\"120\"/>").unwrap()).unwrap();
        let text = decode_file(&path, DEFAULT_MAX_DECOMPRESSED).unwrap();
        assert_eq!(text, "<Tempo Value=\"120\"/>");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn decode_inverts_encode(text in "\\PC{0,512}") {
            let bytes = encode(&text).unwrap();
            let back = decode(&bytes, DEFAULT_MAX_DECOMPRESSED).unwrap();
            prop_assert_eq!(back, text);
        }
    }
}
