//! Temporary files and their signal-safe cleanup registry.
//!
//! Temp files live under `<cache_dir>/tmp` with pid-qualified names. Every
//! temp file is registered on an append-only linked list of leaked nodes so
//! that the signal handler can unlink them without touching the allocator.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use log::debug;

struct Node {
    path: *const libc::c_char,
    next: *const Node,
}

// Nodes are only ever pushed, never removed or freed, and the handler only
// reads; the raw pointers are safe to share.
unsafe impl Sync for Node {}

static PENDING: AtomicPtr<Node> = AtomicPtr::new(ptr::null_mut());
static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Registers `path` for deletion on fatal signal or normal exit.
pub fn add_pending(path: &Path) {
    let Ok(cpath) = CString::new(path.as_os_str().as_encoded_bytes()) else {
        return;
    };
    // Both the string and the node are deliberately leaked: the cleanup
    // walk must be async-signal-safe, so nothing is ever freed.
    let raw = cpath.into_raw() as *const libc::c_char;
    let mut node = Box::new(Node {
        path: raw,
        next: ptr::null(),
    });
    let mut head = PENDING.load(Ordering::Acquire);
    loop {
        node.next = head;
        let ptr = Box::into_raw(node);
        match PENDING.compare_exchange(head, ptr, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return,
            Err(current) => {
                head = current;
                node = unsafe { Box::from_raw(ptr) };
            }
        }
    }
}

/// Unlinks every registered temp file. Async-signal-safe: the walk only
/// reads leaked nodes and calls `unlink`.
pub fn cleanup_pending() {
    let mut node = PENDING.load(Ordering::Acquire) as *const Node;
    while !node.is_null() {
        unsafe {
            libc::unlink((*node).path);
            node = (*node).next;
        }
    }
}

/// Creates a unique temp file under `dir` and registers it for cleanup.
pub fn create_temp(dir: &Path, stem: &str) -> io::Result<(PathBuf, File)> {
    std::fs::create_dir_all(dir)?;
    let pid = std::process::id();
    loop {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{stem}.{pid}.{n}"));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                add_pending(&path);
                return Ok((path, file));
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Sweeps hour-old entries out of the temp directory.
///
/// Runs only when the cache directory itself has not been touched for an
/// hour, so concurrent invocations do not all rescan; the cache dir mtime
/// is bumped to mark the sweep.
pub fn clean_up_internal_tempdir(cache_dir: &Path, temp_dir: &Path) {
    const HOUR: i64 = 3600;
    let now = unix_now();

    match std::fs::metadata(cache_dir) {
        Ok(meta) if meta.mtime() + HOUR < now => {}
        _ => return,
    }
    let _ = filetime::set_file_mtime(cache_dir, filetime::FileTime::now());

    let entries = match std::fs::read_dir(temp_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if let Ok(meta) = std::fs::symlink_metadata(&path) {
            if meta.mtime() + HOUR < now {
                debug!("removing stale temp file {}", path.display());
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}

/// Seconds since the epoch.
pub fn unix_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
