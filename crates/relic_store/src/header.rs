//! Shared framing for cache store files.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! magic        4 bytes
//! version      1 byte
//! compr_type   1 byte   (0 = none, 1 = zstd)
//! compr_level  1 byte   (i8; informational)
//! content_len  8 bytes  (uncompressed size of header + body + checksum)
//! body         …        (compressed according to compr_type)
//! checksum     8 bytes  (XXH64 of the uncompressed body bytes, inside the
//!                        compressed stream)
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use xxhash_rust::xxh64::Xxh64;

use crate::error::StoreError;

/// Size of the fixed header in bytes.
pub const COMMON_HEADER_SIZE: u64 = 15;

/// How a store file's body is encoded. A closed set: both cases expose the
/// same streaming read and write interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// The body is stored as-is.
    None,
    /// The body is a zstd stream.
    Zstd {
        /// Compression level; 0 selects the library default.
        level: i8,
    },
}

impl Compression {
    fn type_byte(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Zstd { .. } => 1,
        }
    }

    fn level_byte(self) -> i8 {
        match self {
            Compression::None => 0,
            Compression::Zstd { level } => level,
        }
    }

    /// Human-readable name for dump output.
    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Zstd { .. } => "zstd",
        }
    }
}

fn io_err(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// The fixed header of a store file.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    /// Format version found in the file.
    pub version: u8,
    /// Body encoding.
    pub compression: Compression,
    /// Uncompressed size of header + body + checksum.
    pub content_len: u64,
}

/// Checksumming reader over a store file's (possibly compressed) body.
pub struct BodyReader<'a> {
    inner: Box<dyn Read + 'a>,
    checksum: Xxh64,
    path: &'a Path,
}

impl<'a> std::fmt::Debug for BodyReader<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyReader")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl<'a> BodyReader<'a> {
    /// Opens `path`, validates magic and version, and positions the reader
    /// at the start of the body.
    pub fn open(
        path: &'a Path,
        magic: &[u8; 4],
        version: u8,
    ) -> Result<(Header, Self), StoreError> {
        let file = File::open(path).map_err(|e| io_err(path, e))?;
        let mut file = BufReader::new(file);

        let mut fixed = [0u8; COMMON_HEADER_SIZE as usize];
        file.read_exact(&mut fixed)
            .map_err(|_| StoreError::Corrupt("truncated header".to_string()))?;

        if &fixed[0..4] != magic {
            return Err(StoreError::BadMagic);
        }
        let file_version = fixed[4];
        if file_version != version {
            return Err(StoreError::BadVersion {
                expected: version,
                actual: file_version,
            });
        }
        let compression = match fixed[5] {
            0 => Compression::None,
            1 => Compression::Zstd {
                level: fixed[6] as i8,
            },
            other => return Err(StoreError::BadCompression(other)),
        };
        let content_len = u64::from_be_bytes(
            fixed[7..15]
                .try_into()
                .expect("slice length matches u64"),
        );

        let inner: Box<dyn Read + 'a> = match compression {
            Compression::None => Box::new(file),
            Compression::Zstd { .. } => Box::new(
                zstd::stream::read::Decoder::new(file).map_err(|e| io_err(path, e))?,
            ),
        };

        Ok((
            Header {
                version: file_version,
                compression,
                content_len,
            },
            Self {
                inner,
                checksum: Xxh64::new(0),
                path,
            },
        ))
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<(), StoreError> {
        self.inner
            .read_exact(buf)
            .map_err(|_| StoreError::Corrupt("truncated body".to_string()))?;
        self.checksum.update(buf);
        Ok(())
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8, StoreError> {
        let mut buf = [0u8; 1];
        self.fill(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads a big-endian u16.
    pub fn read_u16(&mut self) -> Result<u16, StoreError> {
        let mut buf = [0u8; 2];
        self.fill(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Reads a big-endian u32.
    pub fn read_u32(&mut self) -> Result<u32, StoreError> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Reads a big-endian u64.
    pub fn read_u64(&mut self) -> Result<u64, StoreError> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Reads a big-endian i64.
    pub fn read_i64(&mut self) -> Result<i64, StoreError> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, StoreError> {
        let mut buf = vec![0u8; len];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    /// Streams `len` body bytes into `writer` in chunks.
    pub fn copy_to(&mut self, len: u64, writer: &mut dyn Write) -> Result<(), StoreError> {
        let mut remaining = len;
        let mut buf = [0u8; 65536];
        while remaining > 0 {
            let take = remaining.min(buf.len() as u64) as usize;
            self.fill(&mut buf[..take])?;
            writer
                .write_all(&buf[..take])
                .map_err(|e| io_err(self.path, e))?;
            remaining -= take as u64;
        }
        Ok(())
    }

    /// Reads and discards `len` body bytes.
    pub fn skip(&mut self, len: u64) -> Result<(), StoreError> {
        self.copy_to(len, &mut io::sink())
    }

    /// Reads the trailing checksum and compares it with the checksum of
    /// everything read so far.
    pub fn verify_checksum(mut self) -> Result<(), StoreError> {
        let actual = self.checksum.digest();
        let mut buf = [0u8; 8];
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| StoreError::Corrupt("missing checksum".to_string()))?;
        let expected = u64::from_be_bytes(buf);
        if actual != expected {
            return Err(StoreError::ChecksumMismatch { expected, actual });
        }
        Ok(())
    }
}

/// Reads just the fixed header of a store file of either kind, for
/// compression statistics. Returns `None` for anything unrecognizable.
pub fn probe(path: &Path) -> Option<Header> {
    let mut file = File::open(path).ok()?;
    let mut fixed = [0u8; COMMON_HEADER_SIZE as usize];
    file.read_exact(&mut fixed).ok()?;
    if &fixed[0..4] != b"cCmF" && &fixed[0..4] != b"cCrS" {
        return None;
    }
    let compression = match fixed[5] {
        0 => Compression::None,
        1 => Compression::Zstd {
            level: fixed[6] as i8,
        },
        _ => return None,
    };
    let content_len = u64::from_be_bytes(fixed[7..15].try_into().ok()?);
    Some(Header {
        version: fixed[4],
        compression,
        content_len,
    })
}

enum WriterKind<W: Write> {
    Plain(W),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

/// Checksumming writer producing a store file body.
pub struct BodyWriter<'a, W: Write> {
    inner: WriterKind<W>,
    checksum: Xxh64,
    path: &'a Path,
}

impl<'a> BodyWriter<'a, BufWriter<File>> {
    /// Creates `path`, writes the fixed header, and returns a writer for
    /// the body.
    pub fn create(
        path: &'a Path,
        magic: &[u8; 4],
        version: u8,
        compression: Compression,
        content_len: u64,
    ) -> Result<Self, StoreError> {
        let file = File::create(path).map_err(|e| io_err(path, e))?;
        let mut out = BufWriter::new(file);

        out.write_all(magic).map_err(|e| io_err(path, e))?;
        out.write_all(&[version, compression.type_byte(), compression.level_byte() as u8])
            .map_err(|e| io_err(path, e))?;
        out.write_all(&content_len.to_be_bytes())
            .map_err(|e| io_err(path, e))?;

        let inner = match compression {
            Compression::None => WriterKind::Plain(out),
            Compression::Zstd { level } => WriterKind::Zstd(
                zstd::stream::write::Encoder::new(out, level as i32)
                    .map_err(|e| io_err(path, e))?,
            ),
        };

        Ok(Self {
            inner,
            checksum: Xxh64::new(0),
            path,
        })
    }
}

impl<'a, W: Write> BodyWriter<'a, W> {
    fn sink(&mut self) -> &mut dyn Write {
        match &mut self.inner {
            WriterKind::Plain(w) => w,
            WriterKind::Zstd(w) => w,
        }
    }

    fn put(&mut self, data: &[u8]) -> Result<(), StoreError> {
        self.checksum.update(data);
        let path = self.path.to_path_buf();
        self.sink()
            .write_all(data)
            .map_err(|e| StoreError::Io { path, source: e })
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, value: u8) -> Result<(), StoreError> {
        self.put(&[value])
    }

    /// Writes a big-endian u16.
    pub fn write_u16(&mut self, value: u16) -> Result<(), StoreError> {
        self.put(&value.to_be_bytes())
    }

    /// Writes a big-endian u32.
    pub fn write_u32(&mut self, value: u32) -> Result<(), StoreError> {
        self.put(&value.to_be_bytes())
    }

    /// Writes a big-endian u64.
    pub fn write_u64(&mut self, value: u64) -> Result<(), StoreError> {
        self.put(&value.to_be_bytes())
    }

    /// Writes a big-endian i64.
    pub fn write_i64(&mut self, value: i64) -> Result<(), StoreError> {
        self.put(&value.to_be_bytes())
    }

    /// Writes raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), StoreError> {
        self.put(data)
    }

    /// Streams `reader` into the body, returning the number of bytes
    /// copied.
    pub fn copy_from(&mut self, reader: &mut dyn Read) -> Result<u64, StoreError> {
        let mut total = 0u64;
        let mut buf = [0u8; 65536];
        loop {
            let n = reader.read(&mut buf).map_err(|e| StoreError::Io {
                path: self.path.to_path_buf(),
                source: e,
            })?;
            if n == 0 {
                return Ok(total);
            }
            self.put(&buf[..n])?;
            total += n as u64;
        }
    }

    /// Appends the checksum epilogue and flushes everything to disk.
    pub fn finish(mut self) -> Result<(), StoreError> {
        let digest = self.checksum.digest();
        let path = self.path.to_path_buf();
        let io = |e| StoreError::Io {
            path: path.clone(),
            source: e,
        };
        self.sink().write_all(&digest.to_be_bytes()).map_err(io)?;
        match self.inner {
            WriterKind::Plain(mut w) => w.flush().map_err(io),
            WriterKind::Zstd(w) => {
                let mut out = w.finish().map_err(io)?;
                out.flush().map_err(io)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: &[u8; 4] = b"tEsT";

    fn roundtrip(compression: Compression) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.bin");

        let mut writer = BodyWriter::create(&path, MAGIC, 7, compression, 123).unwrap();
        writer.write_u32(0xdeadbeef).unwrap();
        writer.write_u16(42).unwrap();
        writer.write_bytes(b"payload").unwrap();
        writer.write_i64(-5).unwrap();
        writer.finish().unwrap();

        let (header, mut reader) = BodyReader::open(&path, MAGIC, 7).unwrap();
        assert_eq!(header.version, 7);
        assert_eq!(header.compression.type_byte(), compression.type_byte());
        assert_eq!(header.content_len, 123);
        assert_eq!(reader.read_u32().unwrap(), 0xdeadbeef);
        assert_eq!(reader.read_u16().unwrap(), 42);
        assert_eq!(reader.read_bytes(7).unwrap(), b"payload");
        assert_eq!(reader.read_i64().unwrap(), -5);
        reader.verify_checksum().unwrap();
    }

    #[test]
    fn roundtrip_stored() {
        roundtrip(Compression::None);
    }

    #[test]
    fn roundtrip_zstd() {
        roundtrip(Compression::Zstd { level: 0 });
    }

    #[test]
    fn wrong_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let writer = BodyWriter::create(&path, b"aAaA", 1, Compression::None, 0).unwrap();
        writer.finish().unwrap();

        let err = BodyReader::open(&path, MAGIC, 1).unwrap_err();
        assert!(matches!(err, StoreError::BadMagic));
    }

    #[test]
    fn wrong_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let writer = BodyWriter::create(&path, MAGIC, 3, Compression::None, 0).unwrap();
        writer.finish().unwrap();

        let err = BodyReader::open(&path, MAGIC, 2).unwrap_err();
        assert!(matches!(
            err,
            StoreError::BadVersion {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn corrupted_byte_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let mut writer = BodyWriter::create(&path, MAGIC, 1, Compression::None, 0).unwrap();
        writer.write_bytes(b"some body bytes").unwrap();
        writer.finish().unwrap();

        // Flip one body byte.
        let mut raw = std::fs::read(&path).unwrap();
        let idx = COMMON_HEADER_SIZE as usize + 3;
        raw[idx] ^= 0xff;
        std::fs::write(&path, &raw).unwrap();

        let (_, mut reader) = BodyReader::open(&path, MAGIC, 1).unwrap();
        reader.read_bytes(15).unwrap();
        let err = reader.verify_checksum().unwrap_err();
        assert!(matches!(err, StoreError::ChecksumMismatch { .. }));
    }

    #[test]
    fn truncated_body_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let mut writer = BodyWriter::create(&path, MAGIC, 1, Compression::None, 0).unwrap();
        writer.write_bytes(b"abc").unwrap();
        writer.finish().unwrap();

        let (_, mut reader) = BodyReader::open(&path, MAGIC, 1).unwrap();
        let err = reader.read_bytes(100).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn empty_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.bin");
        std::fs::write(&path, b"").unwrap();
        let err = BodyReader::open(&path, MAGIC, 1).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn copy_to_streams_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let mut writer =
            BodyWriter::create(&path, MAGIC, 1, Compression::Zstd { level: 0 }, 0).unwrap();
        writer.write_bytes(&data).unwrap();
        writer.finish().unwrap();

        let (_, mut reader) = BodyReader::open(&path, MAGIC, 1).unwrap();
        let mut out = Vec::new();
        reader.copy_to(data.len() as u64, &mut out).unwrap();
        reader.verify_checksum().unwrap();
        assert_eq!(out, data);
    }
}
