//! Persistent cache stores: the manifest (mapping include-file states to
//! result keys) and the result bundle (the cached compiler artifacts).
//!
//! Both files share the same framing: a fixed header carrying magic bytes,
//! a format version, the compression variant and the uncompressed body
//! length, followed by a (possibly zstd-compressed) big-endian body that
//! ends with an XXH64 checksum of the uncompressed body bytes. All reads
//! are fail-safe: corruption is reported as an error that callers turn into
//! a cache miss.

pub mod error;
pub mod header;
pub mod manifest;
pub mod result;

pub use error::StoreError;
pub use header::{probe, Compression, Header};
pub use manifest::{
    manifest_dump, manifest_get, manifest_put, Manifest, StatMatchMode, VerifyOptions,
    MANIFEST_MAGIC, MANIFEST_VERSION, MAX_MANIFEST_ENTRIES, MAX_MANIFEST_FILE_INFO_ENTRIES,
};
pub use result::{
    result_dump, result_get, result_put, RESULT_MAGIC, RESULT_VERSION, STDERR_NAME,
};
