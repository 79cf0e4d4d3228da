//! Loading, layering and updating configuration values.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::{Config, Sloppiness};

/// Where a configuration value came from, for `-p` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Built-in default.
    Default,
    /// The configuration file.
    File,
    /// A `CCACHE_*` environment variable.
    Environment,
}

impl Origin {
    /// Short label used in `-p` output.
    pub fn label(self) -> &'static str {
        match self {
            Origin::Default => "default",
            Origin::File => "conf",
            Origin::Environment => "env",
        }
    }
}

/// A [`Config`] plus per-key provenance, produced by [`load`].
pub struct LoadedConfig {
    /// The effective configuration.
    pub config: Config,
    /// Path of the primary (writable) configuration file.
    pub primary_path: PathBuf,
    origins: Vec<(&'static str, Origin)>,
}

impl LoadedConfig {
    /// Visits `(key, value, origin)` for every known setting, sorted by key.
    pub fn visit_items(&self, mut f: impl FnMut(&str, &str, Origin)) {
        let mut keys = KNOWN_KEYS.to_vec();
        keys.sort_unstable();
        for key in keys {
            let value = get_string_value(&self.config, key)
                .unwrap_or_default();
            f(key, &value, self.origin_of(key));
        }
    }

    fn origin_of(&self, key: &str) -> Origin {
        self.origins
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, o)| *o)
            .unwrap_or(Origin::Default)
    }
}

/// Every key accepted in the configuration file.
pub const KNOWN_KEYS: &[&str] = &[
    "base_dir",
    "cache_dir",
    "compiler",
    "compiler_check",
    "compression",
    "compression_level",
    "cpp_extension",
    "debug",
    "depend_mode",
    "direct_mode",
    "disable",
    "extra_files_to_hash",
    "hard_link",
    "hash_dir",
    "ignore_headers_in_manifest",
    "keep_comments_cpp",
    "log_file",
    "max_files",
    "max_size",
    "path",
    "pch_external_checksum",
    "prefix_command",
    "prefix_command_cpp",
    "read_only",
    "read_only_direct",
    "recache",
    "run_second_cpp",
    "sloppiness",
    "temporary_dir",
    "umask",
    "unify",
];

/// Loads the effective configuration.
///
/// Resolution order: defaults, then the configuration file (either
/// `CCACHE_CONFIGPATH` or `<cache_dir>/ccache.conf`), then environment
/// variables. The cache directory itself comes from `CCACHE_DIR` or falls
/// back to `~/.ccache`.
pub fn load() -> Result<LoadedConfig, ConfigError> {
    let mut config = Config::default();
    let mut origins: Vec<(&'static str, Origin)> = Vec::new();

    config.cache_dir = match env::var_os("CCACHE_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => default_cache_dir(),
    };

    let primary_path = match env::var_os("CCACHE_CONFIGPATH") {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => config.cache_dir.join("ccache.conf"),
    };

    if primary_path.exists() {
        update_from_file(&mut config, &primary_path, &mut origins)?;
    }

    // CCACHE_DIR wins over a cache_dir line in the file.
    if let Some(dir) = env::var_os("CCACHE_DIR") {
        if !dir.is_empty() {
            config.cache_dir = PathBuf::from(dir);
            origins.push(("cache_dir", Origin::Environment));
        }
    }

    update_from_env(&mut config, &mut origins)?;

    Ok(LoadedConfig {
        config,
        primary_path,
        origins,
    })
}

fn default_cache_dir() -> PathBuf {
    match env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".ccache"),
        None => PathBuf::from(".ccache"),
    }
}

/// Applies `key = value` lines from `path` onto `config`.
pub fn update_from_file(
    config: &mut Config,
    path: &Path,
    origins: &mut Vec<(&'static str, Origin)>,
) -> Result<(), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    update_from_str(config, &content, path, origins)
}

/// Applies configuration text onto `config`. Split out for tests.
pub fn update_from_str(
    config: &mut Config,
    content: &str,
    path: &Path,
    origins: &mut Vec<(&'static str, Origin)>,
) -> Result<(), ConfigError> {
    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or(ConfigError::MalformedLine {
            path: path.to_path_buf(),
            line: lineno + 1,
        })?;
        let key = key.trim();
        let value = value.trim();
        set_value(config, key, value)?;
        if let Some(known) = KNOWN_KEYS.iter().find(|k| **k == key) {
            origins.push((*known, Origin::File));
        }
    }
    Ok(())
}

fn env_flag(name: &str) -> Option<bool> {
    if env::var_os(name).is_some() {
        return Some(true);
    }
    None
}

/// A boolean setting controlled by a `CCACHE_X` / `CCACHE_NOX` pair.
fn env_bool(positive: &str, negative: &str) -> Option<bool> {
    if env::var_os(negative).is_some() {
        Some(false)
    } else {
        env_flag(positive)
    }
}

fn update_from_env(
    config: &mut Config,
    origins: &mut Vec<(&'static str, Origin)>,
) -> Result<(), ConfigError> {
    let mut mark = |key: &'static str| origins.push((key, Origin::Environment));

    if let Ok(v) = env::var("CCACHE_BASEDIR") {
        config.base_dir = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        mark("base_dir");
    }
    if let Ok(v) = env::var("CCACHE_COMPILER") {
        config.compiler = v;
        mark("compiler");
    }
    if let Ok(v) = env::var("CCACHE_COMPILERCHECK") {
        config.compiler_check = v;
        mark("compiler_check");
    }
    if let Some(v) = env_bool("CCACHE_COMPRESS", "CCACHE_NOCOMPRESS") {
        config.compression = v;
        mark("compression");
    }
    if let Ok(v) = env::var("CCACHE_COMPRESSLEVEL") {
        config.compression_level = v.parse().map_err(|_| ConfigError::BadValue {
            key: "compression_level".to_string(),
            value: v,
        })?;
        mark("compression_level");
    }
    if let Some(v) = env_flag("CCACHE_DEBUG") {
        config.debug = v;
        mark("debug");
    }
    if let Some(v) = env_bool("CCACHE_DEPEND", "CCACHE_NODEPEND") {
        config.depend_mode = v;
        mark("depend_mode");
    }
    if let Some(v) = env_bool("CCACHE_DIRECT", "CCACHE_NODIRECT") {
        config.direct_mode = v;
        mark("direct_mode");
    }
    if let Some(v) = env_flag("CCACHE_DISABLE") {
        config.disable = v;
        mark("disable");
    }
    if let Ok(v) = env::var("CCACHE_EXTRAFILES") {
        config.extra_files_to_hash = split_path_list(&v);
        mark("extra_files_to_hash");
    }
    if let Some(v) = env_bool("CCACHE_HARDLINK", "CCACHE_NOHARDLINK") {
        config.hard_link = v;
        mark("hard_link");
    }
    if let Some(v) = env_bool("CCACHE_HASHDIR", "CCACHE_NOHASHDIR") {
        config.hash_dir = v;
        mark("hash_dir");
    }
    if let Ok(v) = env::var("CCACHE_IGNOREHEADERS") {
        config.ignore_headers_in_manifest =
            v.split(':').filter(|s| !s.is_empty()).map(str::to_string).collect();
        mark("ignore_headers_in_manifest");
    }
    if let Some(v) = env_bool("CCACHE_COMMENTS", "CCACHE_NOCOMMENTS") {
        config.keep_comments_cpp = v;
        mark("keep_comments_cpp");
    }
    if let Ok(v) = env::var("CCACHE_LOGFILE") {
        config.log_file = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        mark("log_file");
    }
    if let Ok(v) = env::var("CCACHE_MAXFILES") {
        config.max_files = v.parse().map_err(|_| ConfigError::BadValue {
            key: "max_files".to_string(),
            value: v,
        })?;
        mark("max_files");
    }
    if let Ok(v) = env::var("CCACHE_MAXSIZE") {
        config.max_size = parse_size_with_suffix(&v)?;
        mark("max_size");
    }
    if let Ok(v) = env::var("CCACHE_PATH") {
        config.path = Some(v);
        mark("path");
    }
    if let Some(v) = env_flag("CCACHE_PCH_EXTSUM") {
        config.pch_external_checksum = v;
        mark("pch_external_checksum");
    }
    if let Ok(v) = env::var("CCACHE_PREFIX") {
        config.prefix_command = v;
        mark("prefix_command");
    }
    if let Ok(v) = env::var("CCACHE_PREFIX_CPP") {
        config.prefix_command_cpp = v;
        mark("prefix_command_cpp");
    }
    if let Some(v) = env_flag("CCACHE_READONLY") {
        config.read_only = v;
        mark("read_only");
    }
    if let Some(v) = env_flag("CCACHE_READONLY_DIRECT") {
        config.read_only_direct = v;
        mark("read_only_direct");
    }
    if let Some(v) = env_flag("CCACHE_RECACHE") {
        config.recache = v;
        mark("recache");
    }
    if let Some(v) = env_bool("CCACHE_CPP2", "CCACHE_NOCPP2") {
        config.run_second_cpp = v;
        mark("run_second_cpp");
    }
    if let Ok(v) = env::var("CCACHE_SLOPPINESS") {
        config.sloppiness = Sloppiness::parse(&v);
        mark("sloppiness");
    }
    if let Ok(v) = env::var("CCACHE_TEMPDIR") {
        config.temporary_dir = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        mark("temporary_dir");
    }
    if let Ok(v) = env::var("CCACHE_UMASK") {
        let parsed = u32::from_str_radix(&v, 8).map_err(|_| ConfigError::BadValue {
            key: "umask".to_string(),
            value: v,
        })?;
        config.umask = Some(parsed);
        mark("umask");
    }
    if let Some(v) = env_bool("CCACHE_UNIFY", "CCACHE_NOUNIFY") {
        config.unify = v;
        mark("unify");
    }
    Ok(())
}

fn split_path_list(value: &str) -> Vec<PathBuf> {
    value
        .split(':')
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" | "" => Ok(false),
        _ => Err(ConfigError::BadValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Applies one `key = value` pair onto `config`.
pub fn set_value(config: &mut Config, key: &str, value: &str) -> Result<(), ConfigError> {
    match key {
        "base_dir" => {
            config.base_dir = if value.is_empty() {
                None
            } else {
                Some(PathBuf::from(value))
            }
        }
        "cache_dir" => config.cache_dir = PathBuf::from(value),
        "compiler" => config.compiler = value.to_string(),
        "compiler_check" => config.compiler_check = value.to_string(),
        "compression" => config.compression = parse_bool(key, value)?,
        "compression_level" => {
            config.compression_level = value.parse().map_err(|_| ConfigError::BadValue {
                key: key.to_string(),
                value: value.to_string(),
            })?
        }
        "cpp_extension" => config.cpp_extension = value.to_string(),
        "debug" => config.debug = parse_bool(key, value)?,
        "depend_mode" => config.depend_mode = parse_bool(key, value)?,
        "direct_mode" => config.direct_mode = parse_bool(key, value)?,
        "disable" => config.disable = parse_bool(key, value)?,
        "extra_files_to_hash" => config.extra_files_to_hash = split_path_list(value),
        "hard_link" => config.hard_link = parse_bool(key, value)?,
        "hash_dir" => config.hash_dir = parse_bool(key, value)?,
        "ignore_headers_in_manifest" => {
            config.ignore_headers_in_manifest = value
                .split(':')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        }
        "keep_comments_cpp" => config.keep_comments_cpp = parse_bool(key, value)?,
        "log_file" => {
            config.log_file = if value.is_empty() {
                None
            } else {
                Some(PathBuf::from(value))
            }
        }
        "max_files" => {
            config.max_files = value.parse().map_err(|_| ConfigError::BadValue {
                key: key.to_string(),
                value: value.to_string(),
            })?
        }
        "max_size" => config.max_size = parse_size_with_suffix(value)?,
        "path" => config.path = Some(value.to_string()),
        "pch_external_checksum" => config.pch_external_checksum = parse_bool(key, value)?,
        "prefix_command" => config.prefix_command = value.to_string(),
        "prefix_command_cpp" => config.prefix_command_cpp = value.to_string(),
        "read_only" => config.read_only = parse_bool(key, value)?,
        "read_only_direct" => config.read_only_direct = parse_bool(key, value)?,
        "recache" => config.recache = parse_bool(key, value)?,
        "run_second_cpp" => config.run_second_cpp = parse_bool(key, value)?,
        "sloppiness" => config.sloppiness = Sloppiness::parse(value),
        "temporary_dir" => {
            config.temporary_dir = if value.is_empty() {
                None
            } else {
                Some(PathBuf::from(value))
            }
        }
        "umask" => {
            config.umask = Some(u32::from_str_radix(value, 8).map_err(|_| {
                ConfigError::BadValue {
                    key: key.to_string(),
                    value: value.to_string(),
                }
            })?)
        }
        "unify" => config.unify = parse_bool(key, value)?,
        _ => {
            return Err(ConfigError::UnknownKey {
                key: key.to_string(),
            })
        }
    }
    Ok(())
}

/// Returns the string form of a setting, or `None` for an unknown key.
pub fn get_string_value(config: &Config, key: &str) -> Option<String> {
    let path_str = |p: &PathBuf| p.to_string_lossy().into_owned();
    let opt_path = |p: &Option<PathBuf>| p.as_ref().map(path_str).unwrap_or_default();
    let list = |items: &[PathBuf]| {
        items
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(":")
    };
    Some(match key {
        "base_dir" => opt_path(&config.base_dir),
        "cache_dir" => path_str(&config.cache_dir),
        "compiler" => config.compiler.clone(),
        "compiler_check" => config.compiler_check.clone(),
        "compression" => config.compression.to_string(),
        "compression_level" => config.compression_level.to_string(),
        "cpp_extension" => config.cpp_extension.clone(),
        "debug" => config.debug.to_string(),
        "depend_mode" => config.depend_mode.to_string(),
        "direct_mode" => config.direct_mode.to_string(),
        "disable" => config.disable.to_string(),
        "extra_files_to_hash" => list(&config.extra_files_to_hash),
        "hard_link" => config.hard_link.to_string(),
        "hash_dir" => config.hash_dir.to_string(),
        "ignore_headers_in_manifest" => config.ignore_headers_in_manifest.join(":"),
        "keep_comments_cpp" => config.keep_comments_cpp.to_string(),
        "log_file" => opt_path(&config.log_file),
        "max_files" => config.max_files.to_string(),
        "max_size" => format_parsable_size(config.max_size),
        "path" => config.path.clone().unwrap_or_default(),
        "pch_external_checksum" => config.pch_external_checksum.to_string(),
        "prefix_command" => config.prefix_command.clone(),
        "prefix_command_cpp" => config.prefix_command_cpp.clone(),
        "read_only" => config.read_only.to_string(),
        "read_only_direct" => config.read_only_direct.to_string(),
        "recache" => config.recache.to_string(),
        "run_second_cpp" => config.run_second_cpp.to_string(),
        "sloppiness" => config.sloppiness.to_string(),
        "temporary_dir" => opt_path(&config.temporary_dir),
        "umask" => config
            .umask
            .map(|u| format!("{u:03o}"))
            .unwrap_or_default(),
        "unify" => config.unify.to_string(),
        _ => return None,
    })
}

/// Sets `key = value` in the configuration file at `path`, replacing an
/// existing line for the key or appending one. The value is validated first.
pub fn set_value_in_file(path: &Path, key: &str, value: &str) -> Result<(), ConfigError> {
    // Validate against a scratch config so bad values never hit the file.
    let mut scratch = Config::default();
    set_value(&mut scratch, key, value)?;

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let mut lines: Vec<String> = Vec::new();
    let mut replaced = false;
    for raw in content.lines() {
        let line = raw.trim();
        let is_key = line
            .split_once('=')
            .map(|(k, _)| k.trim() == key)
            .unwrap_or(false);
        if is_key && !replaced {
            lines.push(format!("{key} = {value}"));
            replaced = true;
        } else {
            lines.push(raw.to_string());
        }
    }
    if !replaced {
        lines.push(format!("{key} = {value}"));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::write(path, lines.join("\n") + "\n").map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Parses a size with an optional suffix: `k`, `M`, `G`, `T` (decimal) or
/// `Ki`, `Mi`, `Gi`, `Ti` (binary). A bare number means gibibytes.
pub fn parse_size_with_suffix(value: &str) -> Result<u64, ConfigError> {
    let value = value.trim();
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(value.len());
    let (num_str, suffix) = value.split_at(digits_end);
    let number: f64 = num_str
        .parse()
        .map_err(|_| ConfigError::BadSize(value.to_string()))?;

    let multiplier: u64 = match suffix.trim() {
        "" | "G" | "g" => 1_000_000_000,
        "k" | "K" => 1_000,
        "M" | "m" => 1_000_000,
        "T" | "t" => 1_000_000_000_000,
        "Ki" | "ki" => 1 << 10,
        "Mi" | "mi" => 1 << 20,
        "Gi" | "gi" => 1 << 30,
        "Ti" | "ti" => 1 << 40,
        _ => return Err(ConfigError::BadSize(value.to_string())),
    };
    Ok((number * multiplier as f64) as u64)
}

/// Formats a size for human display (binary units, one decimal).
pub fn format_human_readable_size(size: u64) -> String {
    const GI: f64 = (1u64 << 30) as f64;
    const MI: f64 = (1u64 << 20) as f64;
    const KI: f64 = (1u64 << 10) as f64;
    let size = size as f64;
    if size >= GI {
        format!("{:.1} GB", size / GI)
    } else if size >= MI {
        format!("{:.1} MB", size / MI)
    } else if size >= KI {
        format!("{:.1} kB", size / KI)
    } else {
        format!("{size:.0} B")
    }
}

/// Formats a size so that [`parse_size_with_suffix`] reads it back.
pub fn format_parsable_size(size: u64) -> String {
    if size == 0 {
        return "0".to_string();
    }
    if size % 1_000_000_000 == 0 {
        format!("{}G", size / 1_000_000_000)
    } else if size % 1_000_000 == 0 {
        format!("{}M", size / 1_000_000)
    } else if size % 1_000 == 0 {
        format!("{}k", size / 1_000)
    } else {
        format!("{size}")
    }
}
