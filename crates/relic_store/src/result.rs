//! The result bundle: all artifacts of one cached compilation in one file.
//!
//! Body layout after the common header:
//!
//! ```text
//! n_entries    1 byte
//! per entry:
//!   suffix_len 1 byte
//!   suffix     suffix_len bytes   (".o", ".d", "<stderr>", …)
//!   content_len 8 bytes
//!   content    content_len bytes
//! checksum     8 bytes
//! ```

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::StoreError;
use crate::header::{BodyReader, BodyWriter, Compression, COMMON_HEADER_SIZE};

/// Magic bytes identifying a result file.
pub const RESULT_MAGIC: [u8; 4] = *b"cCrS";

/// Current result format version.
pub const RESULT_VERSION: u8 = 1;

/// Reserved suffix for captured compiler stderr.
pub const STDERR_NAME: &str = "<stderr>";

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Materializes requested artifacts from the bundle at `path`.
///
/// `wanted` maps artifact suffixes to destination paths. Entries whose
/// suffix is not requested are skipped; requested artifacts missing from
/// the bundle simply stay absent (the `.dwo` entry, for instance, exists
/// only when the compiler produced one). Returns `false` on any corruption,
/// in which case the caller must treat the lookup as a miss.
pub fn result_get(path: &Path, wanted: &[(String, PathBuf)]) -> bool {
    match copy_entries(path, wanted) {
        Ok(()) => true,
        Err(err) => {
            debug!("cannot read result {}: {err}", path.display());
            false
        }
    }
}

fn copy_entries(path: &Path, wanted: &[(String, PathBuf)]) -> Result<(), StoreError> {
    let (_, mut reader) = BodyReader::open(path, &RESULT_MAGIC, RESULT_VERSION)?;

    let n_entries = reader.read_u8()?;
    for _ in 0..n_entries {
        let suffix_len = reader.read_u8()? as usize;
        let suffix_bytes = reader.read_bytes(suffix_len)?;
        let suffix = String::from_utf8(suffix_bytes)
            .map_err(|_| StoreError::Corrupt("non-UTF-8 suffix".to_string()))?;
        let content_len = reader.read_u64()?;

        match wanted.iter().find(|(s, _)| *s == suffix) {
            Some((_, dest)) => {
                let mut out = File::create(dest).map_err(|e| io_err(dest, e))?;
                reader.copy_to(content_len, &mut out)?;
            }
            // Unknown or unwanted artifact kinds are skipped so that newer
            // writers stay compatible with older readers.
            None => reader.skip(content_len)?,
        }
    }

    reader.verify_checksum()
}

/// Stores the given artifact files under `path`, atomically replacing any
/// previous bundle. Returns the size of the written file so the caller can
/// account cache growth.
pub fn result_put(
    path: &Path,
    files: &[(String, PathBuf)],
    compression: Compression,
) -> Result<u64, StoreError> {
    let mut content_len = COMMON_HEADER_SIZE + 1;
    for (suffix, source) in files {
        let size = std::fs::metadata(source)
            .map_err(|e| io_err(source, e))?
            .len();
        content_len += 1 + suffix.len() as u64 + 8 + size;
    }
    content_len += 8;

    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    let result = write_bundle(&tmp, files, compression, content_len);
    if let Err(err) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(err);
    }
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        io_err(path, e)
    })?;
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| io_err(path, e))
}

fn write_bundle(
    tmp: &Path,
    files: &[(String, PathBuf)],
    compression: Compression,
    content_len: u64,
) -> Result<(), StoreError> {
    let mut writer =
        BodyWriter::create(tmp, &RESULT_MAGIC, RESULT_VERSION, compression, content_len)?;

    writer.write_u8(files.len() as u8)?;
    for (suffix, source) in files {
        writer.write_u8(suffix.len() as u8)?;
        writer.write_bytes(suffix.as_bytes())?;
        let size = std::fs::metadata(source)
            .map_err(|e| io_err(source, e))?
            .len();
        writer.write_u64(size)?;
        let mut input = File::open(source).map_err(|e| io_err(source, e))?;
        let copied = writer.copy_from(&mut input)?;
        if copied != size {
            return Err(StoreError::Corrupt(format!(
                "{} changed size while being stored",
                source.display()
            )));
        }
    }

    writer.finish()
}

/// Prints a result bundle's table of contents.
pub fn result_dump(path: &Path, out: &mut dyn Write) -> Result<(), StoreError> {
    let (header, mut reader) = BodyReader::open(path, &RESULT_MAGIC, RESULT_VERSION)?;
    let io = |e| io_err(path, e);

    writeln!(out, "Magic: {}", String::from_utf8_lossy(&RESULT_MAGIC)).map_err(io)?;
    writeln!(out, "Version: {RESULT_VERSION}").map_err(io)?;
    writeln!(out, "Compression: {}", header.compression.name()).map_err(io)?;
    writeln!(out, "Content size: {}", header.content_len).map_err(io)?;

    let n_entries = reader.read_u8()?;
    writeln!(out, "Entries ({n_entries}):").map_err(io)?;
    for i in 0..n_entries {
        let suffix_len = reader.read_u8()? as usize;
        let suffix_bytes = reader.read_bytes(suffix_len)?;
        let suffix = String::from_utf8_lossy(&suffix_bytes).into_owned();
        let content_len = reader.read_u64()?;
        writeln!(out, "  {i}: {suffix} ({content_len} bytes)").map_err(io)?;
        reader.skip(content_len)?;
    }
    reader.verify_checksum()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        result_path: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().to_path_buf();
            let result_path = root.join("r.result");
            Self {
                _dir: dir,
                root,
                result_path,
            }
        }

        fn artifact(&self, name: &str, content: &[u8]) -> PathBuf {
            let path = self.root.join(name);
            std::fs::write(&path, content).unwrap();
            path
        }
    }

    #[test]
    fn put_then_get_roundtrip() {
        let f = Fixture::new();
        let obj = f.artifact("a.o", b"\x7fELF object bytes");
        let dep = f.artifact("a.d", b"a.o: a.c a.h\n");

        let size = result_put(
            &f.result_path,
            &[
                (".o".to_string(), obj.clone()),
                (".d".to_string(), dep.clone()),
            ],
            Compression::None,
        )
        .unwrap();
        assert!(size > 0);

        let out_obj = f.root.join("out.o");
        let out_dep = f.root.join("out.d");
        let ok = result_get(
            &f.result_path,
            &[
                (".o".to_string(), out_obj.clone()),
                (".d".to_string(), out_dep.clone()),
            ],
        );
        assert!(ok);
        assert_eq!(std::fs::read(out_obj).unwrap(), b"\x7fELF object bytes");
        assert_eq!(std::fs::read(out_dep).unwrap(), b"a.o: a.c a.h\n");
    }

    #[test]
    fn unrequested_entries_are_skipped() {
        let f = Fixture::new();
        let obj = f.artifact("a.o", b"object");
        let cov = f.artifact("a.gcno", b"coverage");
        result_put(
            &f.result_path,
            &[
                (".o".to_string(), obj),
                (".gcno".to_string(), cov),
            ],
            Compression::None,
        )
        .unwrap();

        let out_obj = f.root.join("out.o");
        let ok = result_get(&f.result_path, &[(".o".to_string(), out_obj.clone())]);
        assert!(ok);
        assert_eq!(std::fs::read(out_obj).unwrap(), b"object");
        assert!(!f.root.join("out.gcno").exists());
    }

    #[test]
    fn requested_but_absent_entries_stay_absent() {
        let f = Fixture::new();
        let obj = f.artifact("a.o", b"object");
        result_put(
            &f.result_path,
            &[(".o".to_string(), obj)],
            Compression::None,
        )
        .unwrap();

        let out_obj = f.root.join("out.o");
        let out_dwo = f.root.join("out.dwo");
        let ok = result_get(
            &f.result_path,
            &[
                (".o".to_string(), out_obj),
                (".dwo".to_string(), out_dwo.clone()),
            ],
        );
        assert!(ok);
        assert!(!out_dwo.exists());
    }

    #[test]
    fn missing_result_is_a_miss() {
        let f = Fixture::new();
        assert!(!result_get(
            &f.result_path,
            &[(".o".to_string(), f.root.join("out.o"))],
        ));
    }

    #[test]
    fn corrupt_result_is_a_miss() {
        let f = Fixture::new();
        let obj = f.artifact("a.o", b"object bytes to corrupt");
        result_put(
            &f.result_path,
            &[(".o".to_string(), obj)],
            Compression::None,
        )
        .unwrap();

        let mut raw = std::fs::read(&f.result_path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        std::fs::write(&f.result_path, &raw).unwrap();

        assert!(!result_get(
            &f.result_path,
            &[(".o".to_string(), f.root.join("out.o"))],
        ));
    }

    #[test]
    fn overwrite_replaces_previous_bundle() {
        let f = Fixture::new();
        let obj1 = f.artifact("v1.o", b"version one");
        result_put(
            &f.result_path,
            &[(".o".to_string(), obj1)],
            Compression::None,
        )
        .unwrap();

        let obj2 = f.artifact("v2.o", b"version two, longer");
        result_put(
            &f.result_path,
            &[(".o".to_string(), obj2)],
            Compression::None,
        )
        .unwrap();

        let out = f.root.join("out.o");
        assert!(result_get(&f.result_path, &[(".o".to_string(), out.clone())]));
        assert_eq!(std::fs::read(out).unwrap(), b"version two, longer");
    }

    #[test]
    fn compressed_roundtrip() {
        let f = Fixture::new();
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 7) as u8).collect();
        let obj = f.artifact("a.o", &data);
        result_put(
            &f.result_path,
            &[(".o".to_string(), obj)],
            Compression::Zstd { level: 0 },
        )
        .unwrap();

        let out = f.root.join("out.o");
        assert!(result_get(&f.result_path, &[(".o".to_string(), out.clone())]));
        assert_eq!(std::fs::read(out).unwrap(), data);
    }

    #[test]
    fn stderr_entry_roundtrip() {
        let f = Fixture::new();
        let obj = f.artifact("a.o", b"object");
        let err = f.artifact("stderr.txt", b"warning: something\n");
        result_put(
            &f.result_path,
            &[
                (".o".to_string(), obj),
                (STDERR_NAME.to_string(), err),
            ],
            Compression::None,
        )
        .unwrap();

        let out_err = f.root.join("replayed.stderr");
        assert!(result_get(
            &f.result_path,
            &[(STDERR_NAME.to_string(), out_err.clone())],
        ));
        assert_eq!(std::fs::read(out_err).unwrap(), b"warning: something\n");
    }

    #[test]
    fn dump_lists_entries() {
        let f = Fixture::new();
        let obj = f.artifact("a.o", b"object");
        let dep = f.artifact("a.d", b"deps");
        result_put(
            &f.result_path,
            &[
                (".o".to_string(), obj),
                (".d".to_string(), dep),
            ],
            Compression::None,
        )
        .unwrap();

        let mut out = Vec::new();
        result_dump(&f.result_path, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Entries (2):"));
        assert!(text.contains(".o (6 bytes)"));
        assert!(text.contains(".d (4 bytes)"));
    }
}
