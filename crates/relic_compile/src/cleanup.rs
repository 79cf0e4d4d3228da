//! Cache-wide maintenance: wiping entries and recalculating counters.

use std::io;
use std::path::Path;

use log::debug;

use crate::stats::{self, Statistic, NUM_STATS};

fn first_level_dirs(cache_dir: &Path) -> impl Iterator<Item = std::path::PathBuf> + '_ {
    "0123456789abcdef"
        .chars()
        .map(move |c| cache_dir.join(c.to_string()))
}

fn is_cache_entry(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("result") | Some("manifest")
    )
}

/// Removes every cache entry (keeping configuration and statistics).
pub fn wipe_all(cache_dir: &Path) -> io::Result<()> {
    for dir in first_level_dirs(cache_dir) {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if is_cache_entry(&path) {
                std::fs::remove_file(&path)?;
            }
        }
        // The subdirectory is now empty of entries; reset its bookkeeping.
        let stats_file = dir.join("stats");
        if stats_file.exists() {
            let counters = stats::read_counters(&stats_file);
            let mut zeroed = counters.clone();
            zeroed[Statistic::NumFiles as usize] = 0;
            zeroed[Statistic::TotalSize as usize] = 0;
            write_counters_direct(&stats_file, &zeroed);
        }
    }
    debug!("cleared cache at {}", cache_dir.display());
    Ok(())
}

/// Recounts files and sizes in every subdirectory and sweeps the temp dir.
pub fn clean_up_all(cache_dir: &Path, temp_dir: &Path) -> io::Result<()> {
    for dir in first_level_dirs(cache_dir) {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };

        let mut files = 0u64;
        let mut size_kib = 0u64;
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_cache_entry(&path) {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                files += 1;
                size_kib += meta.len() / 1024;
            }
        }

        let stats_file = dir.join("stats");
        let mut counters = stats::read_counters(&stats_file);
        counters[Statistic::NumFiles as usize] = files;
        counters[Statistic::TotalSize as usize] = size_kib;
        counters[Statistic::NumCleanups as usize] += 1;
        write_counters_direct(&stats_file, &counters);
    }

    if let Ok(entries) = std::fs::read_dir(temp_dir) {
        for entry in entries.flatten() {
            let _ = std::fs::remove_file(entry.path());
        }
    }
    Ok(())
}

fn write_counters_direct(path: &Path, counters: &[u64]) {
    use std::fmt::Write as _;
    let mut text = String::new();
    for value in counters.iter().take(NUM_STATS) {
        let _ = writeln!(text, "{value}");
    }
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(path, text);
}
