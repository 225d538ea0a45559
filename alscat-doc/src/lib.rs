pub mod codec;
pub mod parser;
pub mod ramify;

use std::path::PathBuf;

pub use codec::{DEFAULT_MAX_DECOMPRESSED, decode, decode_file, encode, is_compressed};
pub use parser::{ClipCounts, DocumentParser, DocumentSummary, HeuristicParser, TrackCounts};
pub use ramify::{RamifyMode, RamifyReport, flip_ram_flags, ramify_file};

/// Error type for document decoding, encoding and patching.
#[derive(thiserror::Error, Debug)]
pub enum DocError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decompressed document exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Decompression failed: {0}")]
    Decompress(String),

    #[error("Compression failed: {0}")]
    Encode(String),

    #[error("Backup failed for {path}: {message}")]
    Backup { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, DocError>;

/// Project-document extensions (sets and clips).
pub const DOCUMENT_EXTENSIONS: &[&str] = &["als", "alc"];

/// Returns true when `ext` (with or without the leading dot) names a project document.
pub fn is_document_extension(ext: &str) -> bool {
    let ext = ext.trim_start_matches('.');
    DOCUMENT_EXTENSIONS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_extensions_ignore_case_and_dot() {
        assert!(is_document_extension(".als"));
        assert!(is_document_extension("ALC"));
        assert!(!is_document_extension(".adg"));
        assert!(!is_document_extension("wav"));
    }
}
