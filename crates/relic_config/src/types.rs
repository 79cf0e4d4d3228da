//! Configuration value types.

use std::fmt;
use std::path::PathBuf;

/// Optional correctness relaxations, each an independent bit.
///
/// A set bit trades one verification or hashing guarantee for a higher hit
/// rate in a specific user-approved situation.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Sloppiness(u32);

impl Sloppiness {
    /// Skip the include-file mtime race check.
    pub const INCLUDE_FILE_MTIME: u32 = 1 << 0;
    /// Skip the include-file ctime race check.
    pub const INCLUDE_FILE_CTIME: u32 = 1 << 1;
    /// Tolerate `__TIME__`/`__DATE__`/`__TIMESTAMP__` in sources.
    pub const TIME_MACROS: u32 = 1 << 2;
    /// Allow caching precompiled-header creation despite embedded defines.
    pub const PCH_DEFINES: u32 = 1 << 3;
    /// Accept include files on a full stat-tuple match without rehashing.
    pub const FILE_STAT_MATCHES: u32 = 1 << 4;
    /// With [`Self::FILE_STAT_MATCHES`]: accept on mtime alone.
    pub const FILE_STAT_MATCHES_CTIME: u32 = 1 << 5;
    /// Track system headers in the manifest (set by default semantics).
    pub const SYSTEM_HEADERS: u32 = 1 << 6;
    /// Ignore clang's `-index-store-path` option.
    pub const CLANG_INDEX_STORE: u32 = 1 << 7;
    /// Do not hash locale environment variables.
    pub const LOCALE: u32 = 1 << 8;
    /// Do not record system headers in the manifest at all.
    pub const NO_SYSTEM_HEADERS: u32 = 1 << 9;

    /// Returns an empty set.
    pub fn empty() -> Self {
        Self(0)
    }

    /// Returns `true` if `bit` is set.
    pub fn has(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    /// Sets `bit`.
    pub fn insert(&mut self, bit: u32) {
        self.0 |= bit;
    }

    /// Parses a comma- or space-separated list of bit names. Unknown names
    /// are ignored so that configurations can be shared across versions.
    pub fn parse(value: &str) -> Self {
        let mut out = Self::empty();
        for word in value.split(|c: char| c == ',' || c.is_whitespace()) {
            match word.trim() {
                "include_file_mtime" => out.insert(Self::INCLUDE_FILE_MTIME),
                "include_file_ctime" => out.insert(Self::INCLUDE_FILE_CTIME),
                "time_macros" => out.insert(Self::TIME_MACROS),
                "pch_defines" => out.insert(Self::PCH_DEFINES),
                "file_stat_matches" => out.insert(Self::FILE_STAT_MATCHES),
                "file_stat_matches_ctime" => out.insert(Self::FILE_STAT_MATCHES_CTIME),
                "system_headers" => out.insert(Self::SYSTEM_HEADERS),
                "clang_index_store" => out.insert(Self::CLANG_INDEX_STORE),
                "locale" => out.insert(Self::LOCALE),
                "no_system_headers" => out.insert(Self::NO_SYSTEM_HEADERS),
                _ => {}
            }
        }
        out
    }

    fn names(self) -> Vec<&'static str> {
        let mut out = Vec::new();
        let table = [
            (Self::INCLUDE_FILE_MTIME, "include_file_mtime"),
            (Self::INCLUDE_FILE_CTIME, "include_file_ctime"),
            (Self::TIME_MACROS, "time_macros"),
            (Self::PCH_DEFINES, "pch_defines"),
            (Self::FILE_STAT_MATCHES, "file_stat_matches"),
            (Self::FILE_STAT_MATCHES_CTIME, "file_stat_matches_ctime"),
            (Self::SYSTEM_HEADERS, "system_headers"),
            (Self::CLANG_INDEX_STORE, "clang_index_store"),
            (Self::LOCALE, "locale"),
            (Self::NO_SYSTEM_HEADERS, "no_system_headers"),
        ];
        for (bit, name) in table {
            if self.has(bit) {
                out.push(name);
            }
        }
        out
    }
}

impl fmt::Display for Sloppiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join(", "))
    }
}

impl fmt::Debug for Sloppiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sloppiness({})", self.names().join("|"))
    }
}

/// All recognized configuration settings with their effective values.
///
/// Fields that the orchestrator may downgrade mid-invocation (direct mode,
/// run-second-cpp, depend mode, unify) are plain booleans flipped in place.
#[derive(Debug, Clone)]
pub struct Config {
    /// Paths under this directory are rewritten relative to the working
    /// directory before hashing. `None` disables rewriting.
    pub base_dir: Option<PathBuf>,
    /// Root of the cache directory tree.
    pub cache_dir: PathBuf,
    /// Compiler executable override; empty means use argv.
    pub compiler: String,
    /// How to fingerprint the compiler binary: `mtime`, `content`, `none`,
    /// `string:<value>`, or a shell command.
    pub compiler_check: String,
    /// Whether to compress manifest and result bodies with zstd.
    pub compression: bool,
    /// Compression level handed to zstd (0 = library default).
    pub compression_level: i8,
    /// Extension used for preprocessed output files.
    pub cpp_extension: String,
    /// Dump per-invocation debug artifacts next to the output file.
    pub debug: bool,
    /// Use the dependency-file lookup path instead of running the
    /// preprocessor.
    pub depend_mode: bool,
    /// Consult the manifest before running the preprocessor.
    pub direct_mode: bool,
    /// Bypass the cache entirely.
    pub disable: bool,
    /// Extra files whose contents are mixed into every key.
    pub extra_files_to_hash: Vec<PathBuf>,
    /// Callers pre-unlink outputs so artifact materialization can hard-link.
    pub hard_link: bool,
    /// Include the working directory in the hash when compiling with `-g`.
    pub hash_dir: bool,
    /// Include-path prefixes excluded from manifest tracking.
    pub ignore_headers_in_manifest: Vec<String>,
    /// Pass `-C` to the preprocessor to keep comments.
    pub keep_comments_cpp: bool,
    /// Append log records to this file.
    pub log_file: Option<PathBuf>,
    /// Maximum number of files in the cache (0 = unlimited).
    pub max_files: u32,
    /// Maximum cache size in bytes (0 = unlimited).
    pub max_size: u64,
    /// PATH override used when locating the real compiler.
    pub path: Option<String>,
    /// Hash `<pch>.sum` instead of a large precompiled header when present.
    pub pch_external_checksum: bool,
    /// Command prefixed to the real compiler invocation.
    pub prefix_command: String,
    /// Command prefixed to the preprocessor invocation.
    pub prefix_command_cpp: String,
    /// Never write to the cache.
    pub read_only: bool,
    /// Never write to the cache via the direct path.
    pub read_only_direct: bool,
    /// Recompile and overwrite any existing entry.
    pub recache: bool,
    /// Compile the original source rather than the preprocessed text.
    pub run_second_cpp: bool,
    /// Enabled correctness relaxations.
    pub sloppiness: Sloppiness,
    /// Temporary-file directory override; default is `<cache_dir>/tmp`.
    pub temporary_dir: Option<PathBuf>,
    /// umask applied at startup.
    pub umask: Option<u32>,
    /// Normalize the preprocessed text before hashing (legacy; the
    /// normalizer itself is no longer applied, see design notes).
    pub unify: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: None,
            cache_dir: PathBuf::new(),
            compiler: String::new(),
            compiler_check: "mtime".to_string(),
            compression: false,
            compression_level: 0,
            cpp_extension: String::new(),
            debug: false,
            depend_mode: false,
            direct_mode: true,
            disable: false,
            extra_files_to_hash: Vec::new(),
            hard_link: false,
            hash_dir: true,
            ignore_headers_in_manifest: Vec::new(),
            keep_comments_cpp: false,
            log_file: None,
            max_files: 0,
            max_size: 5 * 1024 * 1024 * 1024,
            path: None,
            pch_external_checksum: false,
            prefix_command: String::new(),
            prefix_command_cpp: String::new(),
            read_only: false,
            read_only_direct: false,
            recache: false,
            run_second_cpp: true,
            sloppiness: Sloppiness::empty(),
            temporary_dir: None,
            umask: None,
            unify: false,
        }
    }
}

impl Config {
    /// The directory used for temporary files.
    pub fn temp_dir(&self) -> PathBuf {
        match &self.temporary_dir {
            Some(dir) => dir.clone(),
            None => self.cache_dir.join("tmp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert!(c.direct_mode);
        assert!(c.run_second_cpp);
        assert!(c.hash_dir);
        assert!(!c.depend_mode);
        assert_eq!(c.compiler_check, "mtime");
        assert_eq!(c.max_size, 5 * 1024 * 1024 * 1024);
    }

    #[test]
    fn sloppiness_parse_list() {
        let s = Sloppiness::parse("time_macros, file_stat_matches");
        assert!(s.has(Sloppiness::TIME_MACROS));
        assert!(s.has(Sloppiness::FILE_STAT_MATCHES));
        assert!(!s.has(Sloppiness::LOCALE));
    }

    #[test]
    fn sloppiness_parse_ignores_unknown() {
        let s = Sloppiness::parse("bogus_bit,locale");
        assert!(s.has(Sloppiness::LOCALE));
        assert_eq!(s, Sloppiness::parse("locale"));
    }

    #[test]
    fn sloppiness_display_roundtrip() {
        let s = Sloppiness::parse("pch_defines,time_macros");
        let shown = s.to_string();
        assert!(shown.contains("pch_defines"));
        assert!(shown.contains("time_macros"));
        assert_eq!(Sloppiness::parse(&shown), s);
    }

    #[test]
    fn temp_dir_default_and_override() {
        let mut c = Config {
            cache_dir: PathBuf::from("/cache"),
            ..Config::default()
        };
        assert_eq!(c.temp_dir(), PathBuf::from("/cache/tmp"));
        c.temporary_dir = Some(PathBuf::from("/fast/tmp"));
        assert_eq!(c.temp_dir(), PathBuf::from("/fast/tmp"));
    }
}
