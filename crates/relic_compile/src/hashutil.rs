//! Source and compiler fingerprinting.

use std::path::Path;
use std::process::Command;

use log::debug;
use relic_common::{hash_file, DigestHasher};
use relic_config::{Config, Sloppiness};

use crate::error::FatalError;

/// What was found while hashing a source buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceFlags {
    /// The buffer references `__TIME__`.
    pub found_time: bool,
    /// The buffer references `__DATE__`.
    pub found_date: bool,
    /// The buffer references `__TIMESTAMP__`.
    pub found_timestamp: bool,
    /// The file could not be read.
    pub error: bool,
}

impl SourceFlags {
    /// The preprocessed form of this source depends on wall-clock time, so
    /// the direct path must not be used.
    pub fn temporal(self) -> bool {
        self.found_time || self.found_date || self.found_timestamp
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn macro_at(data: &[u8], pos: usize, name: &[u8]) -> bool {
    if pos + name.len() > data.len() || &data[pos..pos + name.len()] != name {
        return false;
    }
    if pos > 0 && is_ident_byte(data[pos - 1]) {
        return false;
    }
    let end = pos + name.len();
    if end < data.len() && is_ident_byte(data[end]) {
        return false;
    }
    true
}

/// Scans for `__TIME__`, `__DATE__` and `__TIMESTAMP__` at proper token
/// boundaries (the neighbors must not be identifier characters).
pub fn check_for_temporal_macros(data: &[u8]) -> SourceFlags {
    let mut flags = SourceFlags::default();
    let mut i = 0;
    while i + 1 < data.len() {
        if data[i] == b'_' && data[i + 1] == b'_' {
            if macro_at(data, i, b"__TIME__") {
                flags.found_time = true;
            } else if macro_at(data, i, b"__DATE__") {
                flags.found_date = true;
            } else if macro_at(data, i, b"__TIMESTAMP__") {
                flags.found_timestamp = true;
            }
        }
        i += 1;
    }
    flags
}

/// Hashes a source buffer, reporting temporal macros unless the
/// `time_macros` sloppiness suppresses them.
pub fn hash_source_buffer(config: &Config, hasher: &mut DigestHasher, data: &[u8]) -> SourceFlags {
    hasher.update(data);
    if config.sloppiness.has(Sloppiness::TIME_MACROS) {
        SourceFlags::default()
    } else {
        check_for_temporal_macros(data)
    }
}

/// Hashes a source file. In addition to the temporal-macro check, a file
/// whose mtime is within one second of `time_of_compilation` is flagged:
/// an editor may still be writing it.
pub fn hash_source_file(
    config: &Config,
    hasher: &mut DigestHasher,
    path: &Path,
    time_of_compilation: i64,
) -> SourceFlags {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) => {
            debug!("cannot read {}: {err}", path.display());
            return SourceFlags {
                error: true,
                ..SourceFlags::default()
            };
        }
    };
    let mut flags = hash_source_buffer(config, hasher, &data);

    {
        use std::os::unix::fs::MetadataExt;
        if let Ok(meta) = std::fs::metadata(path) {
            if meta.mtime() > time_of_compilation - 1 {
                debug!("{} was modified too recently", path.display());
                flags.found_time = true;
            }
        }
    }
    flags
}

/// Fingerprints the compiler binary into the hash according to the
/// `compiler_check` setting.
pub fn hash_compiler(
    config: &Config,
    hasher: &mut DigestHasher,
    path: &Path,
    allow_command: bool,
) -> Result<(), FatalError> {
    let check = config.compiler_check.as_str();
    if check == "none" {
        return Ok(());
    }
    if check == "mtime" {
        use std::os::unix::fs::MetadataExt;
        if let Ok(meta) = std::fs::metadata(path) {
            hasher.delimiter("cc_mtime");
            hasher.update_int(meta.len() as i64);
            hasher.update_int(meta.mtime());
        }
        return Ok(());
    }
    if let Some(value) = check.strip_prefix("string:") {
        hasher.delimiter("cc_hash");
        hasher.update_str(value);
        return Ok(());
    }
    if check == "content" || !allow_command {
        hasher.delimiter("cc_content");
        if let Err(err) = hash_file(hasher, path) {
            debug!("cannot hash compiler {}: {err}", path.display());
        }
        return Ok(());
    }
    // Anything else is a command whose output fingerprints the compiler.
    if !hash_multicommand_output(hasher, check, &path.to_string_lossy()) {
        return Err(FatalError::CompilerCheckFailed(check.to_string()));
    }
    Ok(())
}

/// Runs `command` (with `%compiler%` substituted) and hashes its combined
/// stdout and stderr. Returns `false` if the command cannot be run or
/// exits nonzero.
pub fn hash_command_output(hasher: &mut DigestHasher, command: &str, compiler: &str) -> bool {
    let words: Vec<String> = command
        .split_whitespace()
        .map(|w| if w == "%compiler%" { compiler.to_string() } else { w.to_string() })
        .collect();
    let Some((program, args)) = words.split_first() else {
        return false;
    };

    match Command::new(program).args(args).output() {
        Ok(output) => {
            if !output.status.success() {
                debug!("compiler check command exited with {:?}", output.status.code());
                return false;
            }
            hasher.update(&output.stdout);
            hasher.update(&output.stderr);
            true
        }
        Err(err) => {
            debug!("cannot run compiler check command {program}: {err}");
            false
        }
    }
}

/// Runs a `;`-separated list of commands, hashing each one's output. All
/// must succeed.
pub fn hash_multicommand_output(
    hasher: &mut DigestHasher,
    commands: &str,
    compiler: &str,
) -> bool {
    commands
        .split(';')
        .filter(|c| !c.trim().is_empty())
        .all(|command| hash_command_output(hasher, command, compiler))
}
