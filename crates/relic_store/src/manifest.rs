//! The manifest: a persisted mapping from observed include-file states to
//! result keys.
//!
//! One manifest file exists per manifest key. It stores a deduplicated path
//! table, a deduplicated table of file states (digest, size, timestamps) and
//! a list of result entries, each saying: "if every referenced file still
//! matches its recorded state, the correct result key is this one".

use std::collections::HashMap;
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use filetime::FileTime;
use log::debug;
use relic_common::{Digest, IncludeSet, DIGEST_LEN};

use crate::error::StoreError;
use crate::header::{BodyReader, BodyWriter, Compression, COMMON_HEADER_SIZE};

/// Magic bytes identifying a manifest file.
pub const MANIFEST_MAGIC: [u8; 4] = *b"cCmF";

/// Current manifest format version.
pub const MANIFEST_VERSION: u8 = 2;

/// When a manifest accumulates more result entries than this, it is
/// discarded and restarted (a cheap, conservative LRU).
pub const MAX_MANIFEST_ENTRIES: usize = 100;

/// Upper bound on file-info entries; exceeded in pathological cases where
/// many include files change while the source does not.
pub const MAX_MANIFEST_FILE_INFO_ENTRIES: usize = 10000;

/// Recorded state of one include file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileInfo {
    /// Index into the manifest's path table.
    pub path_index: u32,
    /// Content digest of the file.
    pub digest: Digest,
    /// File size in bytes.
    pub fsize: u64,
    /// Modification time, or -1 when the stat was taken too close to the
    /// write for the timestamp to be trustworthy.
    pub mtime: i64,
    /// Status-change time, with the same -1 sentinel.
    pub ctime: i64,
}

/// One cached compilation: the include-file states it observed and the
/// result key it produced.
#[derive(Debug, Clone)]
pub struct ResultEntry {
    /// Indexes into the manifest's file-info table.
    pub file_info_indexes: Vec<u32>,
    /// The result key.
    pub name: Digest,
}

/// In-memory form of a manifest file.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    /// Deduplicated include-file paths.
    pub files: Vec<String>,
    /// Deduplicated include-file states.
    pub file_infos: Vec<FileInfo>,
    /// Result entries, oldest first.
    pub results: Vec<ResultEntry>,
}

impl Manifest {
    /// Reads and validates a manifest file.
    pub fn read(path: &Path) -> Result<Self, StoreError> {
        let (_, mut reader) = BodyReader::open(path, &MANIFEST_MAGIC, MANIFEST_VERSION)?;

        let n_files = reader.read_u32()? as usize;
        let mut files = Vec::with_capacity(n_files.min(1 << 16));
        for _ in 0..n_files {
            let len = reader.read_u16()? as usize;
            let bytes = reader.read_bytes(len)?;
            let path = String::from_utf8(bytes)
                .map_err(|_| StoreError::Corrupt("non-UTF-8 path".to_string()))?;
            files.push(path);
        }

        let n_file_infos = reader.read_u32()? as usize;
        let mut file_infos = Vec::with_capacity(n_file_infos.min(1 << 16));
        for _ in 0..n_file_infos {
            let path_index = reader.read_u32()?;
            let digest_bytes: [u8; DIGEST_LEN] = reader
                .read_bytes(DIGEST_LEN)?
                .try_into()
                .expect("read_bytes returns the requested length");
            let fsize = reader.read_u64()?;
            let mtime = reader.read_i64()?;
            let ctime = reader.read_i64()?;
            if path_index as usize >= n_files {
                return Err(StoreError::Corrupt(format!(
                    "file info references path {path_index} of {n_files}"
                )));
            }
            file_infos.push(FileInfo {
                path_index,
                digest: Digest::from_bytes(digest_bytes),
                fsize,
                mtime,
                ctime,
            });
        }

        let n_results = reader.read_u32()? as usize;
        let mut results = Vec::with_capacity(n_results.min(1 << 16));
        for _ in 0..n_results {
            let n_indexes = reader.read_u32()? as usize;
            let mut file_info_indexes = Vec::with_capacity(n_indexes.min(1 << 16));
            for _ in 0..n_indexes {
                let index = reader.read_u32()?;
                if index as usize >= n_file_infos {
                    return Err(StoreError::Corrupt(format!(
                        "result references file info {index} of {n_file_infos}"
                    )));
                }
                file_info_indexes.push(index);
            }
            let name_bytes: [u8; DIGEST_LEN] = reader
                .read_bytes(DIGEST_LEN)?
                .try_into()
                .expect("read_bytes returns the requested length");
            results.push(ResultEntry {
                file_info_indexes,
                name: Digest::from_bytes(name_bytes),
            });
        }

        reader.verify_checksum()?;
        Ok(Self {
            files,
            file_infos,
            results,
        })
    }

    fn content_len(&self) -> u64 {
        let mut len = COMMON_HEADER_SIZE;
        len += 4;
        for path in &self.files {
            len += 2 + path.len() as u64;
        }
        len += 4;
        len += self.file_infos.len() as u64 * (4 + DIGEST_LEN as u64 + 8 + 8 + 8);
        len += 4;
        for result in &self.results {
            len += 4 + result.file_info_indexes.len() as u64 * 4 + DIGEST_LEN as u64;
        }
        len + 8
    }

    /// Serializes the manifest to `path` (not atomically; see
    /// [`manifest_put`] for the tmpfile-and-rename discipline).
    pub fn write(&self, path: &Path, compression: Compression) -> Result<(), StoreError> {
        let mut writer = BodyWriter::create(
            path,
            &MANIFEST_MAGIC,
            MANIFEST_VERSION,
            compression,
            self.content_len(),
        )?;

        writer.write_u32(self.files.len() as u32)?;
        for file in &self.files {
            writer.write_u16(file.len() as u16)?;
            writer.write_bytes(file.as_bytes())?;
        }

        writer.write_u32(self.file_infos.len() as u32)?;
        for fi in &self.file_infos {
            writer.write_u32(fi.path_index)?;
            writer.write_bytes(fi.digest.as_bytes())?;
            writer.write_u64(fi.fsize)?;
            writer.write_i64(fi.mtime)?;
            writer.write_i64(fi.ctime)?;
        }

        writer.write_u32(self.results.len() as u32)?;
        for result in &self.results {
            writer.write_u32(result.file_info_indexes.len() as u32)?;
            for index in &result.file_info_indexes {
                writer.write_u32(*index)?;
            }
            writer.write_bytes(result.name.as_bytes())?;
        }

        writer.finish()
    }

    fn add_result_entry(
        &mut self,
        result_key: Digest,
        included: &IncludeSet,
        time_of_compilation: i64,
    ) {
        let mut path_indexes: HashMap<&str, u32> = self
            .files
            .iter()
            .enumerate()
            .map(|(i, p)| (p.as_str(), i as u32))
            .collect();
        let mut info_indexes: HashMap<FileInfo, u32> = self
            .file_infos
            .iter()
            .enumerate()
            .map(|(i, fi)| (*fi, i as u32))
            .collect();

        let mut new_paths: Vec<String> = Vec::new();
        let mut file_info_indexes = Vec::with_capacity(included.len());
        for (path, digest) in included {
            let path_index = match path_indexes.get(path.as_str()) {
                Some(i) => *i,
                None => {
                    let i = (self.files.len() + new_paths.len()) as u32;
                    new_paths.push(path.clone());
                    // Borrow from the include set, which outlives this call.
                    path_indexes.insert(path.as_str(), i);
                    i
                }
            };
            let fi = file_info_for(path, path_index, *digest, time_of_compilation);
            let index = match info_indexes.get(&fi) {
                Some(i) => *i,
                None => {
                    let i = self.file_infos.len() as u32;
                    self.file_infos.push(fi);
                    info_indexes.insert(fi, i);
                    i
                }
            };
            file_info_indexes.push(index);
        }
        self.files.extend(new_paths);

        self.results.push(ResultEntry {
            file_info_indexes,
            name: result_key,
        });
    }
}

/// Timestamps have one-second resolution, so a stat taken within a second
/// of the file's last write cannot vouch for the content; the -1 sentinel
/// forces a content check on verify.
fn file_info_for(
    path: &str,
    path_index: u32,
    digest: Digest,
    time_of_compilation: i64,
) -> FileInfo {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let mtime = meta.mtime();
            let ctime = meta.ctime();
            if time_of_compilation > mtime.max(ctime) {
                FileInfo {
                    path_index,
                    digest,
                    fsize: meta.len(),
                    mtime,
                    ctime,
                }
            } else {
                FileInfo {
                    path_index,
                    digest,
                    fsize: meta.len(),
                    mtime: -1,
                    ctime: -1,
                }
            }
        }
        Err(_) => FileInfo {
            path_index,
            digest,
            fsize: 0,
            mtime: -1,
            ctime: -1,
        },
    }
}

/// How far a stat-tuple match is trusted during verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatMatchMode {
    /// Stat never suffices; contents are rehashed.
    Never,
    /// Matching mtime and ctime accepts the file without rehashing.
    MtimeAndCtime,
    /// Matching mtime alone accepts the file without rehashing.
    MtimeOnly,
}

/// Inputs to manifest verification.
pub struct VerifyOptions<'a> {
    /// Stat-match sloppiness in effect.
    pub stat_match: StatMatchMode,
    /// Reject entries whose recorded mtime changed even when the digest
    /// would match. Needed when the output is a precompiled header and the
    /// compiler embeds include mtimes in it.
    pub reject_mtime_mismatch: bool,
    /// Hashes a file's content the way include files are hashed, or `None`
    /// when the file cannot be used (unreadable, or it now contains a
    /// temporal macro).
    pub hash_file: &'a mut dyn FnMut(&Path) -> Option<Digest>,
}

struct StatInfo {
    fsize: u64,
    mtime: i64,
    ctime: i64,
}

/// Looks up a result key: the newest result entry whose recorded
/// include-file states all still hold wins.
///
/// Returns `None` on any read error (the manifest is then treated as
/// absent) and bumps the manifest's mtime on a hit to protect it from LRU
/// cleanup.
pub fn manifest_get(path: &Path, opts: &mut VerifyOptions<'_>) -> Option<Digest> {
    let manifest = match Manifest::read(path) {
        Ok(m) => m,
        Err(err) => {
            debug!("cannot read manifest {}: {err}", path.display());
            return None;
        }
    };

    let mut stated: HashMap<u32, Option<StatInfo>> = HashMap::new();
    let mut hashed: HashMap<u32, Option<Digest>> = HashMap::new();

    // Newer entries are appended, so walk backwards: the most recent entry
    // is the likeliest to verify.
    for result in manifest.results.iter().rev() {
        if verify_result(&manifest, result, opts, &mut stated, &mut hashed) {
            let _ = filetime::set_file_mtime(path, FileTime::now());
            return Some(result.name);
        }
    }
    None
}

fn verify_result(
    manifest: &Manifest,
    result: &ResultEntry,
    opts: &mut VerifyOptions<'_>,
    stated: &mut HashMap<u32, Option<StatInfo>>,
    hashed: &mut HashMap<u32, Option<Digest>>,
) -> bool {
    for &index in &result.file_info_indexes {
        let fi = &manifest.file_infos[index as usize];
        let path = &manifest.files[fi.path_index as usize];

        let stat = stated.entry(fi.path_index).or_insert_with(|| {
            std::fs::metadata(path).ok().map(|meta| StatInfo {
                fsize: meta.len(),
                mtime: meta.mtime(),
                ctime: meta.ctime(),
            })
        });
        let stat = match stat {
            Some(s) => s,
            None => return false,
        };

        if fi.fsize != stat.fsize {
            return false;
        }

        if opts.reject_mtime_mismatch && fi.mtime != stat.mtime {
            debug!("{path} has a new mtime and the result is a precompiled header");
            return false;
        }

        match opts.stat_match {
            StatMatchMode::MtimeAndCtime => {
                if fi.mtime == stat.mtime && fi.ctime == stat.ctime {
                    continue;
                }
            }
            StatMatchMode::MtimeOnly => {
                if fi.mtime == stat.mtime {
                    continue;
                }
            }
            StatMatchMode::Never => {}
        }

        let digest = hashed
            .entry(fi.path_index)
            .or_insert_with(|| (opts.hash_file)(Path::new(path)));
        match digest {
            Some(d) if *d == fi.digest => {}
            _ => return false,
        }
    }
    true
}

/// Records `result_key` for the given include-file set.
///
/// The existing manifest is read back (a corrupt or missing one is replaced
/// by an empty manifest), the caps are enforced, the new entry is appended,
/// and the whole file is rewritten to a tmpfile and renamed into place. No
/// lock is taken: a concurrent writer can cost one lost append, never a
/// torn file.
pub fn manifest_put(
    path: &Path,
    result_key: Digest,
    included: &IncludeSet,
    time_of_compilation: i64,
    compression: Compression,
) -> Result<(), StoreError> {
    let mut manifest = match Manifest::read(path) {
        Ok(m) => m,
        Err(err) => {
            debug!("starting fresh manifest {}: {err}", path.display());
            Manifest::default()
        }
    };

    if manifest.results.len() > MAX_MANIFEST_ENTRIES {
        debug!(
            "more than {MAX_MANIFEST_ENTRIES} entries in {}; discarding",
            path.display()
        );
        manifest = Manifest::default();
    } else if manifest.file_infos.len() > MAX_MANIFEST_FILE_INFO_ENTRIES {
        debug!(
            "more than {MAX_MANIFEST_FILE_INFO_ENTRIES} file infos in {}; discarding",
            path.display()
        );
        manifest = Manifest::default();
    }

    manifest.add_result_entry(result_key, included, time_of_compilation);

    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    manifest.write(&tmp, compression)?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        StoreError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

/// Prints a manifest in text form.
pub fn manifest_dump(path: &Path, out: &mut dyn Write) -> Result<(), StoreError> {
    let manifest = Manifest::read(path)?;
    let io = |e| StoreError::Io {
        path: path.to_path_buf(),
        source: e,
    };

    writeln!(out, "Magic: {}", String::from_utf8_lossy(&MANIFEST_MAGIC)).map_err(io)?;
    writeln!(out, "Version: {MANIFEST_VERSION}").map_err(io)?;
    writeln!(out, "File paths ({}):", manifest.files.len()).map_err(io)?;
    for (i, file) in manifest.files.iter().enumerate() {
        writeln!(out, "  {i}: {file}").map_err(io)?;
    }
    writeln!(out, "File infos ({}):", manifest.file_infos.len()).map_err(io)?;
    for (i, fi) in manifest.file_infos.iter().enumerate() {
        writeln!(out, "  {i}:").map_err(io)?;
        writeln!(out, "    Path index: {}", fi.path_index).map_err(io)?;
        writeln!(out, "    Hash: {}", fi.digest).map_err(io)?;
        writeln!(out, "    File size: {}", fi.fsize).map_err(io)?;
        writeln!(out, "    Mtime: {}", fi.mtime).map_err(io)?;
        writeln!(out, "    Ctime: {}", fi.ctime).map_err(io)?;
    }
    writeln!(out, "Results ({}):", manifest.results.len()).map_err(io)?;
    for (i, result) in manifest.results.iter().enumerate() {
        writeln!(out, "  {i}:").map_err(io)?;
        write!(out, "    File info indexes:").map_err(io)?;
        for index in &result.file_info_indexes {
            write!(out, " {index}").map_err(io)?;
        }
        writeln!(out).map_err(io)?;
        writeln!(out, "    Name: {}", result.name).map_err(io)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relic_common::DigestHasher;
    use std::path::PathBuf;

    fn digest_of(data: &[u8]) -> Digest {
        let mut h = DigestHasher::new();
        h.update(data);
        h.finish()
    }

    fn content_hasher() -> impl FnMut(&Path) -> Option<Digest> {
        |path: &Path| std::fs::read(path).ok().map(|data| digest_of(&data))
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        manifest_path: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().to_path_buf();
            let manifest_path = root.join("m.manifest");
            Self {
                _dir: dir,
                root,
                manifest_path,
            }
        }

        fn write_include(&self, name: &str, content: &str) -> (String, Digest) {
            let path = self.root.join(name);
            std::fs::write(&path, content).unwrap();
            let path_str = path.to_string_lossy().into_owned();
            (path_str, digest_of(content.as_bytes()))
        }

        /// Timestamp far enough in the future that recorded stat tuples are
        /// trusted.
        fn toc(&self) -> i64 {
            i64::MAX
        }
    }

    fn verify_opts(hasher: &mut dyn FnMut(&Path) -> Option<Digest>) -> VerifyOptions<'_> {
        VerifyOptions {
            stat_match: StatMatchMode::Never,
            reject_mtime_mismatch: false,
            hash_file: hasher,
        }
    }

    #[test]
    fn get_on_missing_manifest_is_none() {
        let f = Fixture::new();
        let mut hasher = content_hasher();
        assert!(manifest_get(&f.manifest_path, &mut verify_opts(&mut hasher)).is_none());
    }

    #[test]
    fn put_then_get_roundtrip() {
        let f = Fixture::new();
        let (path, digest) = f.write_include("a.h", "#define A 1\n");
        let mut included = IncludeSet::new();
        included.insert(path, digest);

        let key = digest_of(b"result key");
        manifest_put(&f.manifest_path, key, &included, f.toc(), Compression::None).unwrap();

        let mut hasher = content_hasher();
        let got = manifest_get(&f.manifest_path, &mut verify_opts(&mut hasher));
        assert_eq!(got, Some(key));
    }

    #[test]
    fn changed_include_misses_and_appends() {
        let f = Fixture::new();
        let (path, digest) = f.write_include("a.h", "#define A 1\n");
        let mut included = IncludeSet::new();
        included.insert(path.clone(), digest);
        let key1 = digest_of(b"key one");
        manifest_put(&f.manifest_path, key1, &included, f.toc(), Compression::None).unwrap();

        // Change the include content: the old entry no longer verifies.
        let (_, new_digest) = f.write_include("a.h", "#define A 2\n");
        let mut hasher = content_hasher();
        assert!(manifest_get(&f.manifest_path, &mut verify_opts(&mut hasher)).is_none());

        // A second store appends rather than replacing.
        included.insert(path, new_digest);
        let key2 = digest_of(b"key two");
        manifest_put(&f.manifest_path, key2, &included, f.toc(), Compression::None).unwrap();

        let manifest = Manifest::read(&f.manifest_path).unwrap();
        assert_eq!(manifest.results.len(), 2);
        assert_eq!(manifest.files.len(), 1, "path table stays deduplicated");
        assert_eq!(manifest.file_infos.len(), 2);

        let mut hasher = content_hasher();
        let got = manifest_get(&f.manifest_path, &mut verify_opts(&mut hasher));
        assert_eq!(got, Some(key2));
    }

    #[test]
    fn newest_entry_wins() {
        let f = Fixture::new();
        let (path, digest) = f.write_include("a.h", "stable content");
        let mut included = IncludeSet::new();
        included.insert(path, digest);

        let key1 = digest_of(b"old");
        let key2 = digest_of(b"new");
        manifest_put(&f.manifest_path, key1, &included, f.toc(), Compression::None).unwrap();
        manifest_put(&f.manifest_path, key2, &included, f.toc(), Compression::None).unwrap();

        let mut hasher = content_hasher();
        let got = manifest_get(&f.manifest_path, &mut verify_opts(&mut hasher));
        assert_eq!(got, Some(key2));
    }

    #[test]
    fn mtime_only_touch_still_hits() {
        let f = Fixture::new();
        let (path, digest) = f.write_include("a.h", "same bytes");
        let mut included = IncludeSet::new();
        included.insert(path.clone(), digest);
        let key = digest_of(b"key");
        manifest_put(&f.manifest_path, key, &included, f.toc(), Compression::None).unwrap();

        // Touch without changing content: verification falls back to the
        // content digest and still matches.
        filetime::set_file_mtime(Path::new(&path), FileTime::from_unix_time(99, 0)).unwrap();
        let mut hasher = content_hasher();
        let got = manifest_get(&f.manifest_path, &mut verify_opts(&mut hasher));
        assert_eq!(got, Some(key));
    }

    #[test]
    fn size_mismatch_rejects_without_hashing() {
        let f = Fixture::new();
        let (path, digest) = f.write_include("a.h", "1234");
        let mut included = IncludeSet::new();
        included.insert(path.clone(), digest);
        let key = digest_of(b"key");
        manifest_put(&f.manifest_path, key, &included, f.toc(), Compression::None).unwrap();

        std::fs::write(&path, "123456").unwrap();
        let mut calls = 0;
        let mut hasher = |_: &Path| {
            calls += 1;
            None
        };
        let got = manifest_get(&f.manifest_path, &mut verify_opts(&mut hasher));
        assert!(got.is_none());
        assert_eq!(calls, 0, "size check must short-circuit");
    }

    #[test]
    fn deleted_include_rejects() {
        let f = Fixture::new();
        let (path, digest) = f.write_include("a.h", "bytes");
        let mut included = IncludeSet::new();
        included.insert(path.clone(), digest);
        let key = digest_of(b"key");
        manifest_put(&f.manifest_path, key, &included, f.toc(), Compression::None).unwrap();

        std::fs::remove_file(&path).unwrap();
        let mut hasher = content_hasher();
        assert!(manifest_get(&f.manifest_path, &mut verify_opts(&mut hasher)).is_none());
    }

    #[test]
    fn stat_match_skips_hashing() {
        let f = Fixture::new();
        let (path, digest) = f.write_include("a.h", "bytes");
        let mut included = IncludeSet::new();
        included.insert(path, digest);
        let key = digest_of(b"key");
        manifest_put(&f.manifest_path, key, &included, f.toc(), Compression::None).unwrap();

        let mut calls = 0;
        let mut hasher = |_: &Path| {
            calls += 1;
            None
        };
        let mut opts = verify_opts(&mut hasher);
        opts.stat_match = StatMatchMode::MtimeAndCtime;
        let got = manifest_get(&f.manifest_path, &mut opts);
        assert_eq!(got, Some(key));
        assert_eq!(calls, 0);
    }

    #[test]
    fn pch_mtime_rule_rejects_touched_files() {
        let f = Fixture::new();
        let (path, digest) = f.write_include("a.h", "bytes");
        let mut included = IncludeSet::new();
        included.insert(path.clone(), digest);
        let key = digest_of(b"key");
        manifest_put(&f.manifest_path, key, &included, f.toc(), Compression::None).unwrap();

        filetime::set_file_mtime(Path::new(&path), FileTime::from_unix_time(99, 0)).unwrap();
        let mut hasher = content_hasher();
        let mut opts = verify_opts(&mut hasher);
        opts.reject_mtime_mismatch = true;
        assert!(manifest_get(&f.manifest_path, &mut opts).is_none());
    }

    #[test]
    fn race_window_stores_sentinel_timestamps() {
        let f = Fixture::new();
        let (path, digest) = f.write_include("a.h", "fresh");
        let mut included = IncludeSet::new();
        included.insert(path, digest);
        let key = digest_of(b"key");
        // Compilation "started" before the include was written.
        manifest_put(&f.manifest_path, key, &included, 0, Compression::None).unwrap();

        let manifest = Manifest::read(&f.manifest_path).unwrap();
        assert_eq!(manifest.file_infos[0].mtime, -1);
        assert_eq!(manifest.file_infos[0].ctime, -1);
    }

    #[test]
    fn entry_cap_discards_and_restarts() {
        let f = Fixture::new();
        let (path, digest) = f.write_include("a.h", "bytes");
        let mut included = IncludeSet::new();
        included.insert(path, digest);

        for n in 0..(MAX_MANIFEST_ENTRIES + 3) {
            let key = digest_of(format!("key {n}").as_bytes());
            manifest_put(&f.manifest_path, key, &included, f.toc(), Compression::None).unwrap();
        }

        let manifest = Manifest::read(&f.manifest_path).unwrap();
        assert!(manifest.results.len() <= MAX_MANIFEST_ENTRIES + 1);
        assert!(!manifest.results.is_empty());
    }

    #[test]
    fn corrupt_manifest_treated_as_missing() {
        let f = Fixture::new();
        let (path, digest) = f.write_include("a.h", "bytes");
        let mut included = IncludeSet::new();
        included.insert(path, digest);
        let key = digest_of(b"key");
        manifest_put(&f.manifest_path, key, &included, f.toc(), Compression::None).unwrap();

        // Corrupt the last byte (the checksum).
        let mut raw = std::fs::read(&f.manifest_path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        std::fs::write(&f.manifest_path, &raw).unwrap();

        let mut hasher = content_hasher();
        assert!(manifest_get(&f.manifest_path, &mut verify_opts(&mut hasher)).is_none());

        // A put on top of the corrupt file starts fresh and succeeds.
        manifest_put(&f.manifest_path, key, &included, f.toc(), Compression::None).unwrap();
        let manifest = Manifest::read(&f.manifest_path).unwrap();
        assert_eq!(manifest.results.len(), 1);
    }

    #[test]
    fn compressed_roundtrip() {
        let f = Fixture::new();
        let (path, digest) = f.write_include("a.h", "zstd body");
        let mut included = IncludeSet::new();
        included.insert(path, digest);
        let key = digest_of(b"key");
        manifest_put(
            &f.manifest_path,
            key,
            &included,
            f.toc(),
            Compression::Zstd { level: 0 },
        )
        .unwrap();

        let mut hasher = content_hasher();
        let got = manifest_get(&f.manifest_path, &mut verify_opts(&mut hasher));
        assert_eq!(got, Some(key));
    }

    #[test]
    fn dump_output_shape() {
        let f = Fixture::new();
        let (path, digest) = f.write_include("a.h", "bytes");
        let mut included = IncludeSet::new();
        included.insert(path.clone(), digest);
        let key = digest_of(b"key");
        manifest_put(&f.manifest_path, key, &included, f.toc(), Compression::None).unwrap();

        let mut out = Vec::new();
        manifest_dump(&f.manifest_path, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("File paths (1):"));
        assert!(text.contains(&path));
        assert!(text.contains("Results (1):"));
        assert!(text.contains(&key.to_string()));
    }

    #[test]
    fn hit_bumps_manifest_mtime() {
        let f = Fixture::new();
        let (path, digest) = f.write_include("a.h", "bytes");
        let mut included = IncludeSet::new();
        included.insert(path, digest);
        let key = digest_of(b"key");
        manifest_put(&f.manifest_path, key, &included, f.toc(), Compression::None).unwrap();

        filetime::set_file_mtime(&f.manifest_path, FileTime::from_unix_time(1, 0)).unwrap();
        let mut hasher = content_hasher();
        manifest_get(&f.manifest_path, &mut verify_opts(&mut hasher)).unwrap();

        let meta = std::fs::metadata(&f.manifest_path).unwrap();
        assert!(FileTime::from_last_modification_time(&meta) > FileTime::from_unix_time(1, 0));
    }
}
