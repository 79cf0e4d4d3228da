//! Content hashing for cache keys and include-file fingerprints.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use blake2::Blake2bVar;
use digest::{Update, VariableOutput};

/// Number of bytes in a [`Digest`].
pub const DIGEST_LEN: usize = 20;

/// A 160-bit content digest.
///
/// Two digests compare by bytewise equality. The `Display` form is lowercase
/// hex and is what appears in cache file names.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Wraps raw digest bytes, e.g. read back from a manifest file.
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Streaming hasher producing a [`Digest`].
///
/// Inputs that are concatenations of multiple logical fields are kept
/// collision-free by calling [`DigestHasher::delimiter`] between fields: it
/// mixes in a zero byte followed by a label naming the field, so two
/// different field splits of the same byte sequence hash differently.
///
/// The hasher is `Clone` so that a partially-fed state (the "common" part of
/// a cache key) can be forked and extended along several lookup paths.
#[derive(Clone)]
pub struct DigestHasher {
    inner: Blake2bVar,
}

impl DigestHasher {
    /// Creates an empty hasher.
    pub fn new() -> Self {
        let inner = Blake2bVar::new(DIGEST_LEN).expect("digest length is a valid blake2b size");
        Self { inner }
    }

    /// Feeds raw bytes into the hash.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Feeds a string into the hash.
    pub fn update_str(&mut self, data: &str) {
        self.update(data.as_bytes());
    }

    /// Feeds an integer into the hash, in decimal text form.
    pub fn update_int(&mut self, value: i64) {
        self.update(value.to_string().as_bytes());
    }

    /// Marks a field boundary: a zero byte followed by `label`.
    pub fn delimiter(&mut self, label: &str) {
        self.update(&[0]);
        self.update(label.as_bytes());
    }

    /// Returns the digest of everything fed so far. The hasher itself can
    /// keep accumulating input afterwards.
    pub fn finish(&self) -> Digest {
        let mut out = [0u8; DIGEST_LEN];
        self.inner
            .clone()
            .finalize_variable(&mut out)
            .expect("output buffer matches digest length");
        Digest(out)
    }
}

impl Default for DigestHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Streams a file's contents into `hasher`.
pub fn hash_file(hasher: &mut DigestHasher, path: &Path) -> io::Result<()> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; 65536];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        hasher.update(&buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let mut a = DigestHasher::new();
        a.update(b"hello world");
        let mut b = DigestHasher::new();
        b.update(b"hello world");
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn different_inputs_differ() {
        let mut a = DigestHasher::new();
        a.update(b"hello");
        let mut b = DigestHasher::new();
        b.update(b"world");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn delimiter_separates_fields() {
        // "ab" + "c" must not collide with "a" + "bc".
        let mut a = DigestHasher::new();
        a.update(b"ab");
        a.delimiter("field");
        a.update(b"c");

        let mut b = DigestHasher::new();
        b.update(b"a");
        b.delimiter("field");
        b.update(b"bc");

        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn finish_does_not_consume() {
        let mut h = DigestHasher::new();
        h.update(b"prefix");
        let first = h.finish();
        h.update(b"suffix");
        let second = h.finish();
        assert_ne!(first, second);

        // Forking at the prefix reproduces the first digest.
        let mut again = DigestHasher::new();
        again.update(b"prefix");
        assert_eq!(again.finish(), first);
    }

    #[test]
    fn clone_forks_state() {
        let mut common = DigestHasher::new();
        common.update(b"common input");

        let mut left = common.clone();
        left.update(b"left");
        let mut right = common.clone();
        right.update(b"right");

        assert_ne!(left.finish(), right.finish());
    }

    #[test]
    fn update_int_matches_text() {
        let mut a = DigestHasher::new();
        a.update_int(-1234567890123);
        let mut b = DigestHasher::new();
        b.update(b"-1234567890123");
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn display_is_forty_hex_chars() {
        let h = DigestHasher::new();
        let s = h.finish().to_string();
        assert_eq!(s.len(), 40);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn roundtrip_bytes() {
        let mut h = DigestHasher::new();
        h.update(b"bytes");
        let d = h.finish();
        assert_eq!(Digest::from_bytes(*d.as_bytes()), d);
    }

    #[test]
    fn hash_file_matches_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.c");
        std::fs::write(&path, b"int main() { return 0; }\n").unwrap();

        let mut from_file = DigestHasher::new();
        hash_file(&mut from_file, &path).unwrap();

        let mut from_buf = DigestHasher::new();
        from_buf.update(b"int main() { return 0; }\n");

        assert_eq!(from_file.finish(), from_buf.finish());
    }

    #[test]
    fn hash_file_missing_errors() {
        let mut h = DigestHasher::new();
        assert!(hash_file(&mut h, Path::new("/nonexistent/file.c")).is_err());
    }
}
