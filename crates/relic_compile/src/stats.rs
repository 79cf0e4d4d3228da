//! Statistics counters.
//!
//! Each first-level cache subdirectory has a `stats` file: one decimal
//! counter per line, indexed by [`Statistic`]. Updates take the symlink
//! lock; reads do not.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use log::debug;
use relic_config::Config;

use crate::lockfile;

/// Counter identities. The numeric value is the position in the stats
/// file, so existing files keep their meaning across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    /// The compiler produced output on stdout, which cannot be cached.
    CompilerProducedStdout = 1,
    /// The compiler exited nonzero.
    CompileFailed = 2,
    /// An internal error (unreadable temp file, failed write).
    InternalError = 3,
    /// A new result was stored.
    ToCache = 4,
    /// The preprocessor exited nonzero.
    PreprocessorError = 5,
    /// The compiler binary could not be found or statted.
    CouldNotFindCompiler = 6,
    /// A cache file vanished mid-operation.
    MissingCacheFile = 7,
    /// Hit via the preprocessor path.
    CacheHitPreprocessed = 8,
    /// Malformed compiler arguments.
    BadCompilerArguments = 9,
    /// The invocation was a link, not a compile.
    CalledForLink = 10,
    /// Number of files in this cache subdirectory.
    NumFiles = 11,
    /// Total size (in KiB) of this cache subdirectory.
    TotalSize = 12,
    /// The source language is unsupported.
    UnsupportedSourceLanguage = 15,
    /// The output file could not be written.
    BadOutputFile = 16,
    /// No input file was given.
    NoInputFile = 17,
    /// More than one source file was given.
    MultipleSourceFiles = 18,
    /// An autoconf test invocation.
    AutoconfTest = 19,
    /// An option from the too-hard set was given.
    UnsupportedCompilerOption = 20,
    /// Output was directed to stdout.
    OutputToStdout = 21,
    /// Hit via the manifest (direct) path.
    CacheHitDirect = 22,
    /// The compiler produced no object file.
    NoOutput = 23,
    /// The compiler produced an empty object file.
    EmptyOutput = 24,
    /// An extra-files-to-hash entry could not be read.
    BadExtraFile = 25,
    /// The compiler check command failed.
    CompilerCheckFailed = 26,
    /// Precompiled-header constraints were not met.
    CouldNotUsePch = 27,
    /// `-E` was given.
    CalledForPreprocessing = 28,
    /// Cleanups performed in this subdirectory.
    NumCleanups = 29,
    /// An `.incbin` directive was found in the source.
    UnsupportedCodeDirective = 30,
}

/// Number of counter slots in a stats file.
pub const NUM_STATS: usize = 32;

impl Statistic {
    /// Human-readable label used by `-s`.
    pub fn label(self) -> &'static str {
        match self {
            Statistic::CompilerProducedStdout => "compiler produced stdout",
            Statistic::CompileFailed => "compile failed",
            Statistic::InternalError => "internal error",
            Statistic::ToCache => "cache miss",
            Statistic::PreprocessorError => "preprocessor error",
            Statistic::CouldNotFindCompiler => "couldn't find the compiler",
            Statistic::MissingCacheFile => "cache file missing",
            Statistic::CacheHitPreprocessed => "cache hit (preprocessed)",
            Statistic::BadCompilerArguments => "bad compiler arguments",
            Statistic::CalledForLink => "called for link",
            Statistic::NumFiles => "files in cache",
            Statistic::TotalSize => "cache size",
            Statistic::UnsupportedSourceLanguage => "unsupported source language",
            Statistic::BadOutputFile => "could not write to output file",
            Statistic::NoInputFile => "no input file",
            Statistic::MultipleSourceFiles => "multiple source files",
            Statistic::AutoconfTest => "autoconf compile/link",
            Statistic::UnsupportedCompilerOption => "unsupported compiler option",
            Statistic::OutputToStdout => "output to stdout",
            Statistic::CacheHitDirect => "cache hit (direct)",
            Statistic::NoOutput => "compiler produced no output",
            Statistic::EmptyOutput => "compiler produced empty output",
            Statistic::BadExtraFile => "error hashing extra file",
            Statistic::CompilerCheckFailed => "compiler check failed",
            Statistic::CouldNotUsePch => "preprocessor can't use precompiled header",
            Statistic::CalledForPreprocessing => "called for preprocessing",
            Statistic::NumCleanups => "cleanups performed",
            Statistic::UnsupportedCodeDirective => "unsupported code directive",
        }
    }

    /// Machine-readable id used by `--print-stats`.
    pub fn id(self) -> &'static str {
        match self {
            Statistic::CompilerProducedStdout => "compiler_produced_stdout",
            Statistic::CompileFailed => "compile_failed",
            Statistic::InternalError => "internal_error",
            Statistic::ToCache => "cache_miss",
            Statistic::PreprocessorError => "preprocessor_error",
            Statistic::CouldNotFindCompiler => "could_not_find_compiler",
            Statistic::MissingCacheFile => "missing_cache_file",
            Statistic::CacheHitPreprocessed => "cache_hit_cpp",
            Statistic::BadCompilerArguments => "bad_compiler_arguments",
            Statistic::CalledForLink => "called_for_link",
            Statistic::NumFiles => "files_in_cache",
            Statistic::TotalSize => "cache_size_kibibyte",
            Statistic::UnsupportedSourceLanguage => "unsupported_source_language",
            Statistic::BadOutputFile => "bad_output_file",
            Statistic::NoInputFile => "no_input_file",
            Statistic::MultipleSourceFiles => "multiple_source_files",
            Statistic::AutoconfTest => "autoconf_test",
            Statistic::UnsupportedCompilerOption => "unsupported_compiler_option",
            Statistic::OutputToStdout => "output_to_stdout",
            Statistic::CacheHitDirect => "cache_hit_direct",
            Statistic::NoOutput => "compiler_produced_no_output",
            Statistic::EmptyOutput => "compiler_produced_empty_output",
            Statistic::BadExtraFile => "bad_extra_file",
            Statistic::CompilerCheckFailed => "compiler_check_failed",
            Statistic::CouldNotUsePch => "could_not_use_precompiled_header",
            Statistic::CalledForPreprocessing => "called_for_preprocessing",
            Statistic::NumCleanups => "cleanups_performed",
            Statistic::UnsupportedCodeDirective => "unsupported_code_directive",
        }
    }

    /// All counters, in file order.
    pub fn all() -> &'static [Statistic] {
        &[
            Statistic::CompilerProducedStdout,
            Statistic::CompileFailed,
            Statistic::InternalError,
            Statistic::ToCache,
            Statistic::PreprocessorError,
            Statistic::CouldNotFindCompiler,
            Statistic::MissingCacheFile,
            Statistic::CacheHitPreprocessed,
            Statistic::BadCompilerArguments,
            Statistic::CalledForLink,
            Statistic::NumFiles,
            Statistic::TotalSize,
            Statistic::UnsupportedSourceLanguage,
            Statistic::BadOutputFile,
            Statistic::NoInputFile,
            Statistic::MultipleSourceFiles,
            Statistic::AutoconfTest,
            Statistic::UnsupportedCompilerOption,
            Statistic::OutputToStdout,
            Statistic::CacheHitDirect,
            Statistic::NoOutput,
            Statistic::EmptyOutput,
            Statistic::BadExtraFile,
            Statistic::CompilerCheckFailed,
            Statistic::CouldNotUsePch,
            Statistic::CalledForPreprocessing,
            Statistic::NumCleanups,
            Statistic::UnsupportedCodeDirective,
        ]
    }
}

/// Reads a stats file into a full-width counter vector. Missing or short
/// files read as zeros.
pub fn read_counters(path: &Path) -> Vec<u64> {
    let mut counters = vec![0u64; NUM_STATS];
    if let Ok(content) = std::fs::read_to_string(path) {
        for (i, token) in content.split_whitespace().take(NUM_STATS).enumerate() {
            counters[i] = token.parse().unwrap_or(0);
        }
    }
    counters
}

fn write_counters(path: &Path, counters: &[u64]) {
    let mut text = String::new();
    for value in counters {
        let _ = writeln!(text, "{value}");
    }
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    if std::fs::write(&tmp, text).is_ok() && std::fs::rename(&tmp, path).is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
}

fn with_locked_counters(path: &Path, mutate: impl FnOnce(&mut Vec<u64>)) {
    if !lockfile::acquire(path, lockfile::LOCK_STALENESS_LIMIT_US) {
        debug!("could not lock {}", path.display());
        return;
    }
    let mut counters = read_counters(path);
    mutate(&mut counters);
    write_counters(path, &counters);
    lockfile::release(path);
}

/// Increments one counter in `path`.
pub fn update(path: &Path, stat: Statistic) {
    debug!("result: {}", stat.label());
    with_locked_counters(path, |counters| {
        counters[stat as usize] += 1;
    });
}

/// Applies a size and file-count delta to `path` (sizes in bytes).
pub fn update_size(path: &Path, size_delta: i64, files_delta: i64) {
    with_locked_counters(path, |counters| {
        let kib = size_delta / 1024;
        let size = counters[Statistic::TotalSize as usize] as i64 + kib;
        counters[Statistic::TotalSize as usize] = size.max(0) as u64;
        let files = counters[Statistic::NumFiles as usize] as i64 + files_delta;
        counters[Statistic::NumFiles as usize] = files.max(0) as u64;
    });
}

/// The sixteen per-subdirectory stats files plus the top-level one.
fn stats_files(cache_dir: &Path) -> Vec<PathBuf> {
    let mut files = vec![cache_dir.join("stats")];
    for c in "0123456789abcdef".chars() {
        files.push(cache_dir.join(c.to_string()).join("stats"));
    }
    files
}

/// Sums all counters across the cache.
pub fn collect(cache_dir: &Path) -> Vec<u64> {
    let mut totals = vec![0u64; NUM_STATS];
    for file in stats_files(cache_dir) {
        for (total, value) in totals.iter_mut().zip(read_counters(&file)) {
            *total += value;
        }
    }
    totals
}

/// Zeroes every counter except the file and size bookkeeping.
pub fn zero_all(cache_dir: &Path) {
    for file in stats_files(cache_dir) {
        if !file.exists() {
            continue;
        }
        with_locked_counters(&file, |counters| {
            for stat in Statistic::all() {
                match stat {
                    Statistic::NumFiles | Statistic::TotalSize => {}
                    _ => counters[*stat as usize] = 0,
                }
            }
        });
    }
}

/// Prints the human-readable summary for `-s`.
pub fn summarize(cache_dir: &Path, config: &Config, out: &mut dyn std::io::Write) {
    let totals = collect(cache_dir);
    let _ = writeln!(out, "cache directory                     {}", cache_dir.display());

    let hits = totals[Statistic::CacheHitDirect as usize]
        + totals[Statistic::CacheHitPreprocessed as usize];
    let misses = totals[Statistic::ToCache as usize];
    let _ = writeln!(out, "{:<35} {:>8}", "cache hit (direct)", totals[Statistic::CacheHitDirect as usize]);
    let _ = writeln!(
        out,
        "{:<35} {:>8}",
        "cache hit (preprocessed)",
        totals[Statistic::CacheHitPreprocessed as usize]
    );
    let _ = writeln!(out, "{:<35} {:>8}", "cache miss", misses);
    if hits + misses > 0 {
        let rate = 100.0 * hits as f64 / (hits + misses) as f64;
        let _ = writeln!(out, "{:<35} {:>7.2}%", "cache hit rate", rate);
    }

    for stat in Statistic::all() {
        let value = totals[*stat as usize];
        match stat {
            Statistic::CacheHitDirect
            | Statistic::CacheHitPreprocessed
            | Statistic::ToCache
            | Statistic::NumFiles
            | Statistic::TotalSize => {}
            _ if value > 0 => {
                let _ = writeln!(out, "{:<35} {value:>8}", stat.label());
            }
            _ => {}
        }
    }

    let _ = writeln!(
        out,
        "{:<35} {:>8}",
        "files in cache",
        totals[Statistic::NumFiles as usize]
    );
    let _ = writeln!(
        out,
        "{:<35} {:>8}",
        "cache size",
        relic_config::format_human_readable_size(totals[Statistic::TotalSize as usize] * 1024)
    );
    if config.max_size > 0 {
        let _ = writeln!(
            out,
            "{:<35} {:>8}",
            "max cache size",
            relic_config::format_human_readable_size(config.max_size)
        );
    }
}

/// Prints machine-readable `id value` lines for `--print-stats`.
pub fn print_machine(cache_dir: &Path, out: &mut dyn std::io::Write) {
    let totals = collect(cache_dir);
    for stat in Statistic::all() {
        let _ = writeln!(out, "{} {}", stat.id(), totals[*stat as usize]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_creates_and_increments() {
        let dir = tempfile::tempdir().unwrap();
        let stats = dir.path().join("4").join("stats");
        update(&stats, Statistic::CacheHitDirect);
        update(&stats, Statistic::CacheHitDirect);
        update(&stats, Statistic::ToCache);

        let counters = read_counters(&stats);
        assert_eq!(counters[Statistic::CacheHitDirect as usize], 2);
        assert_eq!(counters[Statistic::ToCache as usize], 1);
        assert_eq!(counters[Statistic::CompileFailed as usize], 0);
    }

    #[test]
    fn size_deltas_accumulate_and_floor_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let stats = dir.path().join("stats");
        update_size(&stats, 4096, 2);
        let counters = read_counters(&stats);
        assert_eq!(counters[Statistic::TotalSize as usize], 4);
        assert_eq!(counters[Statistic::NumFiles as usize], 2);

        update_size(&stats, -1_000_000, -10);
        let counters = read_counters(&stats);
        assert_eq!(counters[Statistic::TotalSize as usize], 0);
        assert_eq!(counters[Statistic::NumFiles as usize], 0);
    }

    #[test]
    fn collect_sums_across_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        update(&dir.path().join("0").join("stats"), Statistic::ToCache);
        update(&dir.path().join("f").join("stats"), Statistic::ToCache);

        let totals = collect(dir.path());
        assert_eq!(totals[Statistic::ToCache as usize], 2);
    }

    #[test]
    fn zero_preserves_size_counters() {
        let dir = tempfile::tempdir().unwrap();
        let stats = dir.path().join("0").join("stats");
        update(&stats, Statistic::CacheHitDirect);
        update_size(&stats, 10 * 1024, 3);

        zero_all(dir.path());
        let counters = read_counters(&stats);
        assert_eq!(counters[Statistic::CacheHitDirect as usize], 0);
        assert_eq!(counters[Statistic::TotalSize as usize], 10);
        assert_eq!(counters[Statistic::NumFiles as usize], 3);
    }

    #[test]
    fn missing_file_reads_as_zeros() {
        let counters = read_counters(Path::new("/no/such/stats"));
        assert_eq!(counters.len(), NUM_STATS);
        assert!(counters.iter().all(|v| *v == 0));
    }

    #[test]
    fn summary_mentions_hit_rate() {
        let dir = tempfile::tempdir().unwrap();
        let stats = dir.path().join("0").join("stats");
        update(&stats, Statistic::CacheHitDirect);
        update(&stats, Statistic::ToCache);

        let mut out = Vec::new();
        summarize(dir.path(), &Config::default(), &mut out);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("cache hit (direct)"));
        assert!(text.contains("cache hit rate"));
        assert!(text.contains("50.00%"));
    }

    #[test]
    fn machine_stats_are_parsable() {
        let dir = tempfile::tempdir().unwrap();
        update(&dir.path().join("0").join("stats"), Statistic::CacheHitDirect);

        let mut out = Vec::new();
        print_machine(dir.path(), &mut out);
        let text = String::from_utf8(out).unwrap();
        let line = text
            .lines()
            .find(|l| l.starts_with("cache_hit_direct"))
            .unwrap();
        assert_eq!(line, "cache_hit_direct 1");
    }
}
