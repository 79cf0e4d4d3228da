//! Error types for the cache stores.

use std::path::PathBuf;

/// Errors raised while reading or writing cache store files.
///
/// Read-side errors are fail-safe at the call sites: a manifest or result
/// file that cannot be read is treated as absent and the lookup becomes a
/// miss. Write-side errors make the invocation fall back to the real
/// compiler.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An I/O error on a store file.
    #[error("store I/O error at {path}: {source}")]
    Io {
        /// The file that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The file does not start with the expected magic bytes.
    #[error("bad magic bytes (not a cache store file)")]
    BadMagic,

    /// The format version is not the one this build writes.
    #[error("unsupported format version {actual}, expected {expected}")]
    BadVersion {
        /// The version this build understands.
        expected: u8,
        /// The version found in the file.
        actual: u8,
    },

    /// The compression type byte is unknown.
    #[error("unknown compression type {0}")]
    BadCompression(u8),

    /// The body checksum did not match the stored epilogue.
    #[error("checksum mismatch (actual {actual:016x}, expected {expected:016x})")]
    ChecksumMismatch {
        /// Checksum stored in the file.
        expected: u64,
        /// Checksum of the bytes actually read.
        actual: u64,
    },

    /// The body is structurally invalid (truncated or with out-of-range
    /// indexes).
    #[error("corrupt store file: {0}")]
    Corrupt(String),
}
