//! relic, a compiler result cache.
//!
//! Invoked either as `relic compiler [args…]` (or via a compiler-named
//! symlink), in which case the whole invocation is handed to the cache
//! orchestrator, or as `relic -<option>` for cache maintenance.

use std::io::Read;
use std::path::PathBuf;
use std::process;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use relic_common::DigestHasher;

/// The name this binary must be installed under.
const MYNAME: &str = "relic";

const USAGE_TEXT: &str = "\
Usage:
    relic [options]
    relic compiler [compiler options]
    compiler [compiler options]          (via symbolic link)

Common options:
    -c, --cleanup             delete old files and recalculate size counters
    -C, --clear               clear the cache completely (except configuration)
    -F, --max-files=N         set maximum number of files in cache to N (use 0
                              for no limit)
    -M, --max-size=SIZE       set maximum size of cache to SIZE (use 0 for no
                              limit); available suffixes: k, M, G, T (decimal)
                              and Ki, Mi, Gi, Ti (binary); default suffix: G
    -x, --show-compression    show compression statistics
    -p, --show-config         show current configuration options
    -s, --show-stats          show summary of configuration and statistics
                              counters in human-readable format
    -z, --zero-stats          zero statistics counters

    -h, --help                print this help text
    -V, --version             print version and copyright information

Options for scripting or debugging:
        --dump-manifest=PATH  dump manifest file at PATH in text format
        --dump-result=PATH    dump result file at PATH in text format
    -k, --get-config=K        print the value of configuration key K
        --hash-file=PATH      print the hash (160 bit BLAKE2b) of the file at
                              PATH
        --print-stats         print statistics counter IDs and corresponding
                              values in machine-parsable format
    -o, --set-config=K=V      set configuration item K to value V
";

const VERSION_TEXT: &str = concat!(
    "relic version ",
    env!("CARGO_PKG_VERSION"),
    "\n\nA transparent result cache for C-family compilers.\n"
);

/// Cache maintenance options (everything that is not a compile).
#[derive(Parser, Debug)]
#[command(
    name = "relic",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Options {
    /// Delete old files and recalculate size counters.
    #[arg(short = 'c', long = "cleanup")]
    cleanup: bool,

    /// Clear the cache completely (except configuration).
    #[arg(short = 'C', long = "clear")]
    clear: bool,

    /// Dump a manifest file in text format.
    #[arg(long = "dump-manifest", value_name = "PATH")]
    dump_manifest: Option<PathBuf>,

    /// Dump a result file in text format.
    #[arg(long = "dump-result", value_name = "PATH")]
    dump_result: Option<PathBuf>,

    /// Print the value of one configuration key.
    #[arg(short = 'k', long = "get-config", value_name = "K")]
    get_config: Option<String>,

    /// Print the hash of a file (use "-" for stdin).
    #[arg(long = "hash-file", value_name = "PATH")]
    hash_file: Option<String>,

    /// Print the help text.
    #[arg(short = 'h', long = "help")]
    help: bool,

    /// Set the maximum number of files in the cache.
    #[arg(short = 'F', long = "max-files", value_name = "N")]
    max_files: Option<u32>,

    /// Set the maximum cache size.
    #[arg(short = 'M', long = "max-size", value_name = "SIZE")]
    max_size: Option<String>,

    /// Print statistics counters in machine-parsable format.
    #[arg(long = "print-stats")]
    print_stats: bool,

    /// Set configuration key K to value V.
    #[arg(short = 'o', long = "set-config", value_name = "K=V")]
    set_config: Option<String>,

    /// Show compression statistics.
    #[arg(short = 'x', long = "show-compression")]
    show_compression: bool,

    /// Show the current configuration.
    #[arg(short = 'p', long = "show-config")]
    show_config: bool,

    /// Show a summary of statistics counters.
    #[arg(short = 's', long = "show-stats")]
    show_stats: bool,

    /// Print version information.
    #[arg(short = 'V', long = "version")]
    version: bool,

    /// Zero the statistics counters.
    #[arg(short = 'z', long = "zero-stats")]
    zero_stats: bool,
}

fn main() {
    let argv: Vec<String> = std::env::args().collect();
    let program = argv[0].rsplit('/').next().unwrap_or(&argv[0]);

    if program == MYNAME {
        if argv.len() < 2 {
            eprint!("{USAGE_TEXT}");
            process::exit(1);
        }
        // A leading option means cache maintenance; anything else is a
        // compiler name.
        if argv[1].starts_with('-') {
            match run_mode_options(&argv) {
                Ok(code) => process::exit(code),
                Err(err) => {
                    eprintln!("{MYNAME}: error: {err:#}");
                    process::exit(1);
                }
            }
        }
    }

    let loaded = match relic_config::load() {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("{MYNAME}: error: {err}");
            process::exit(1);
        }
    };
    relic_compile::logging::init(loaded.config.log_file.as_deref(), loaded.config.debug);

    let code = relic_compile::run_compiler(loaded, argv, MYNAME);
    process::exit(code);
}

fn run_mode_options(argv: &[String]) -> Result<i32> {
    let options = match Options::try_parse_from(argv) {
        Ok(options) => options,
        Err(_) => {
            eprint!("{USAGE_TEXT}");
            return Ok(1);
        }
    };

    if options.help {
        print!("{USAGE_TEXT}");
        return Ok(0);
    }
    if options.version {
        print!("{VERSION_TEXT}");
        return Ok(0);
    }

    let loaded = relic_config::load()?;
    let config = &loaded.config;
    let stdout = &mut std::io::stdout();

    if let Some(path) = &options.dump_manifest {
        if let Err(err) = relic_store::manifest_dump(path, stdout) {
            eprintln!("Error: {err}");
            return Ok(1);
        }
    }

    if let Some(path) = &options.dump_result {
        if let Err(err) = relic_store::result_dump(path, stdout) {
            eprintln!("Error: {err}");
            return Ok(1);
        }
    }

    if let Some(path) = &options.hash_file {
        let mut hasher = DigestHasher::new();
        if path == "-" {
            let mut data = Vec::new();
            std::io::stdin()
                .read_to_end(&mut data)
                .context("reading stdin")?;
            hasher.update(&data);
        } else {
            relic_common::hash_file(&mut hasher, std::path::Path::new(path))
                .with_context(|| format!("hashing {path}"))?;
        }
        println!("{}", hasher.finish());
    }

    if options.print_stats {
        relic_compile::stats::print_machine(&config.cache_dir, stdout);
    }

    if options.cleanup {
        relic_compile::cleanup::clean_up_all(&config.cache_dir, &config.temp_dir())
            .context("cleaning cache")?;
        println!("Cleaned cache");
    }

    if options.clear {
        relic_compile::cleanup::wipe_all(&config.cache_dir).context("clearing cache")?;
        println!("Cleared cache");
    }

    if let Some(key) = &options.get_config {
        let value = relic_config::get_string_value(config, key)
            .ok_or_else(|| anyhow!("unknown configuration option \"{key}\""))?;
        println!("{value}");
    }

    if let Some(n) = options.max_files {
        relic_config::set_value_in_file(&loaded.primary_path, "max_files", &n.to_string())?;
        if n == 0 {
            println!("Unset cache file limit");
        } else {
            println!("Set cache file limit to {n}");
        }
    }

    if let Some(size) = &options.max_size {
        let parsed = relic_config::parse_size_with_suffix(size)?;
        relic_config::set_value_in_file(&loaded.primary_path, "max_size", size)?;
        if parsed == 0 {
            println!("Unset cache size limit");
        } else {
            println!(
                "Set cache size limit to {}",
                relic_config::format_human_readable_size(parsed)
            );
        }
    }

    if let Some(pair) = &options.set_config {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("missing equal sign in \"{pair}\""))?;
        relic_config::set_value_in_file(&loaded.primary_path, key, value)?;
    }

    if options.show_compression {
        show_compression(&config.cache_dir);
    }

    if options.show_config {
        loaded.visit_items(|key, value, origin| {
            println!("({}) {key} = {value}", origin.label());
        });
    }

    if options.show_stats {
        relic_compile::stats::summarize(&config.cache_dir, config, stdout);
    }

    if options.zero_stats {
        relic_compile::stats::zero_all(&config.cache_dir);
        println!("Statistics zeroed");
    }

    Ok(0)
}

/// Walks every cache entry and reports how well compression is doing.
fn show_compression(cache_dir: &std::path::Path) {
    let mut compressed_files = 0u64;
    let mut uncompressed_files = 0u64;
    let mut on_disk = 0u64;
    let mut content = 0u64;

    for c in "0123456789abcdef".chars() {
        let dir = cache_dir.join(c.to_string());
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(header) = relic_store::probe(&path) else {
                continue;
            };
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            on_disk += meta.len();
            content += header.content_len;
            match header.compression {
                relic_store::Compression::None => uncompressed_files += 1,
                relic_store::Compression::Zstd { .. } => compressed_files += 1,
            }
        }
    }

    let total = compressed_files + uncompressed_files;
    println!("Total files:        {total}");
    println!("Compressed files:   {compressed_files}");
    println!("Uncompressed files: {uncompressed_files}");
    println!(
        "On-disk size:       {}",
        relic_config::format_human_readable_size(on_disk)
    );
    println!(
        "Content size:       {}",
        relic_config::format_human_readable_size(content)
    );
    if on_disk > 0 && content > 0 {
        println!(
            "Compression ratio:  {:.2}",
            content as f64 / on_disk as f64
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_show_stats() {
        let options = Options::try_parse_from(["relic", "-s"]).unwrap();
        assert!(options.show_stats);
        assert!(!options.zero_stats);
    }

    #[test]
    fn parse_long_forms() {
        let options =
            Options::try_parse_from(["relic", "--show-config", "--zero-stats"]).unwrap();
        assert!(options.show_config);
        assert!(options.zero_stats);
    }

    #[test]
    fn parse_set_and_get_config() {
        let options =
            Options::try_parse_from(["relic", "-o", "max_size=10G", "-k", "max_files"]).unwrap();
        assert_eq!(options.set_config.as_deref(), Some("max_size=10G"));
        assert_eq!(options.get_config.as_deref(), Some("max_files"));
    }

    #[test]
    fn parse_max_size_and_files() {
        let options = Options::try_parse_from(["relic", "-M", "5G", "-F", "1000"]).unwrap();
        assert_eq!(options.max_size.as_deref(), Some("5G"));
        assert_eq!(options.max_files, Some(1000));
    }

    #[test]
    fn parse_dump_options() {
        let options = Options::try_parse_from([
            "relic",
            "--dump-manifest",
            "/tmp/x.manifest",
            "--dump-result",
            "/tmp/x.result",
        ])
        .unwrap();
        assert_eq!(
            options.dump_manifest,
            Some(PathBuf::from("/tmp/x.manifest"))
        );
        assert_eq!(options.dump_result, Some(PathBuf::from("/tmp/x.result")));
    }

    #[test]
    fn parse_hash_file_stdin() {
        let options = Options::try_parse_from(["relic", "--hash-file", "-"]).unwrap();
        assert_eq!(options.hash_file.as_deref(), Some("-"));
    }

    #[test]
    fn parse_cleanup_and_clear() {
        let options = Options::try_parse_from(["relic", "-c", "-C"]).unwrap();
        assert!(options.cleanup);
        assert!(options.clear);
    }

    #[test]
    fn parse_help_and_version() {
        assert!(Options::try_parse_from(["relic", "-h"]).unwrap().help);
        assert!(Options::try_parse_from(["relic", "-V"]).unwrap().version);
    }

    #[test]
    fn unknown_option_is_an_error() {
        assert!(Options::try_parse_from(["relic", "--frobnicate"]).is_err());
    }

    #[test]
    fn usage_text_mentions_all_modes() {
        for flag in [
            "-c", "-C", "-F", "-M", "-x", "-p", "-s", "-z", "-h", "-V", "-k", "-o",
            "--dump-manifest", "--dump-result", "--hash-file", "--print-stats",
        ] {
            assert!(USAGE_TEXT.contains(flag), "{flag} missing from usage");
        }
    }
}
