//! The `log` backend: append to an optional log file and keep an in-memory
//! copy for debug dumps.
//!
//! Nothing here ever writes to the user's terminal; debug records become
//! visible only through `log_file` or the `<output>.relic-log` dump that
//! the debug setting enables.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use log::{Level, LevelFilter, Log, Metadata, Record};

struct Sink {
    file: Option<std::fs::File>,
    buffer: Vec<u8>,
    keep_buffer: bool,
}

/// Logger that mirrors records to a file and an in-memory buffer.
pub struct RelicLogger {
    sink: Mutex<Sink>,
}

static LOGGER: OnceLock<RelicLogger> = OnceLock::new();

impl Log for RelicLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!("[{}] {}\n", std::process::id(), record.args());
        let Ok(mut sink) = self.sink.lock() else {
            return;
        };
        if let Some(file) = &mut sink.file {
            let _ = file.write_all(line.as_bytes());
        }
        if sink.keep_buffer {
            sink.buffer.extend_from_slice(line.as_bytes());
        }
    }

    fn flush(&self) {
        if let Ok(mut sink) = self.sink.lock() {
            if let Some(file) = &mut sink.file {
                let _ = file.flush();
            }
        }
    }
}

/// Installs the logger. With neither a log file nor debug mode, logging is
/// disabled entirely.
pub fn init(log_file: Option<&Path>, debug: bool) {
    let file = log_file.and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    let enabled = file.is_some() || debug;

    let logger = LOGGER.get_or_init(|| RelicLogger {
        sink: Mutex::new(Sink {
            file,
            buffer: Vec::new(),
            keep_buffer: debug,
        }),
    });
    // A second init in the same process keeps the first sink.
    let _ = log::set_logger(logger);
    log::set_max_level(if enabled {
        LevelFilter::Debug
    } else {
        LevelFilter::Off
    });
}

/// Writes the buffered records next to the output file; used at exit when
/// debug mode is on.
pub fn dump_buffer(output_obj: &str) {
    let Some(logger) = LOGGER.get() else {
        return;
    };
    let Ok(sink) = logger.sink.lock() else {
        return;
    };
    if !sink.keep_buffer || sink.buffer.is_empty() {
        return;
    }
    let path = PathBuf::from(format!("{output_obj}.relic-log"));
    let _ = std::fs::write(path, &sink.buffer);
}
