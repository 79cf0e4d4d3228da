//! Child-process execution and the exec fallback.

use std::fs::File;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::debug;

use crate::error::FatalError;
use crate::signals;

/// Runs `argv` with stdout and stderr redirected to files, returning the
/// exit code. A signal death is reported as `128 + signal`, matching shell
/// conventions.
pub fn execute(argv: &[String], stdout_path: &Path, stderr_path: &Path) -> io::Result<i32> {
    debug!("executing {}", argv.join(" "));
    let stdout = File::create(stdout_path)?;
    let stderr = File::create(stderr_path)?;

    let mut child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::inherit())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .spawn()?;

    // Let the signal handler forward SIGTERM to the child and reap it.
    signals::set_compiler_pid(child.id() as i32);
    let status = child.wait();
    signals::set_compiler_pid(0);

    let status = status?;
    Ok(status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0)))
}

/// Replaces this process with `argv`. Only returns on exec failure.
pub fn exec(argv: &[String]) -> io::Error {
    debug!("exec {}", argv.join(" "));
    Command::new(&argv[0]).args(&argv[1..]).exec()
}

fn is_executable_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Returns `true` when `candidate` is this very program (directly or via a
/// symlink), which must never be selected as the "real" compiler.
fn is_ourselves(candidate: &Path, own_name: &str) -> bool {
    let Ok(resolved) = candidate.canonicalize() else {
        return false;
    };
    if let Ok(own) = std::env::current_exe() {
        if let Ok(own) = own.canonicalize() {
            if resolved == own {
                return true;
            }
        }
    }
    resolved
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n == own_name)
        .unwrap_or(false)
}

/// Searches `path_env` (a `PATH`-style list) for an executable named
/// `name`, skipping anything that resolves back to this program.
pub fn find_executable(name: &str, own_name: &str, path_env: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        if is_executable_file(&path) && !is_ourselves(&path, own_name) {
            return Some(path);
        }
        return None;
    }

    for dir in path_env.split(':').filter(|d| !d.is_empty()) {
        let candidate = Path::new(dir).join(name);
        if is_executable_file(&candidate) && !is_ourselves(&candidate, own_name) {
            return Some(candidate);
        }
    }
    None
}

/// Prepends the configured prefix command (e.g. `distcc`) to `argv`.
pub fn add_prefix(
    argv: &mut Vec<String>,
    prefix_command: &str,
    own_name: &str,
    path_env: &str,
) -> Result<(), FatalError> {
    if prefix_command.is_empty() {
        return Ok(());
    }

    let mut prefix = Vec::new();
    for word in prefix_command.split_whitespace() {
        let resolved = find_executable(word, own_name, path_env)
            .ok_or_else(|| FatalError::PrefixCommandNotFound(word.to_string()))?;
        prefix.push(resolved.to_string_lossy().into_owned());
    }
    debug!("using command-line prefix {prefix_command}");
    argv.splice(0..0, prefix);
    Ok(())
}
