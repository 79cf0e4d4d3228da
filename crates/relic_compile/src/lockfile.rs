//! Symlink-based lockfile for the statistics files.
//!
//! The lock is a symlink whose target names the owner. A lock that stops
//! making progress for longer than the staleness limit is broken by the
//! next contender.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;

/// Default staleness limit in microseconds.
pub const LOCK_STALENESS_LIMIT_US: u64 = 2_000_000;

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Acquires the lock guarding `path`. Returns `false` if the lock could
/// not be obtained within twice the staleness limit.
pub fn acquire(path: &Path, staleness_limit_us: u64) -> bool {
    let lockfile = lock_path(path);
    let content = format!("{}", std::process::id());

    let mut slept_us: u64 = 0;
    let mut last_seen: Option<String> = None;
    let mut stale_for_us: u64 = 0;

    loop {
        match std::os::unix::fs::symlink(&content, &lockfile) {
            Ok(()) => return true,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(err) => {
                debug!("cannot create lockfile {}: {err}", lockfile.display());
                return false;
            }
        }

        let owner = std::fs::read_link(&lockfile)
            .map(|t| t.to_string_lossy().into_owned())
            .ok();
        if owner == last_seen {
            stale_for_us += 10_000;
            if stale_for_us >= staleness_limit_us {
                debug!("breaking stale lock {}", lockfile.display());
                let _ = std::fs::remove_file(&lockfile);
                stale_for_us = 0;
                continue;
            }
        } else {
            last_seen = owner;
            stale_for_us = 0;
        }

        if slept_us >= 2 * staleness_limit_us {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
        slept_us += 10_000;
    }
}

/// Releases the lock guarding `path`.
pub fn release(path: &Path) {
    let _ = std::fs::remove_file(lock_path(path));
}
