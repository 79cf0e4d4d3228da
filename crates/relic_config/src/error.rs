//! Error types for configuration handling.

use std::path::PathBuf;

/// Errors raised while loading or updating configuration.
///
/// Configuration errors are fatal: they abort the invocation with a one-line
/// message rather than falling back to the real compiler, because a broken
/// configuration would make every future invocation misbehave the same way.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An I/O error while reading or writing a configuration file.
    #[error("configuration I/O error at {path}: {source}")]
    Io {
        /// The file that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A line in the configuration file is not `key = value`.
    #[error("{path}:{line}: missing equal sign")]
    MalformedLine {
        /// The file containing the bad line.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
    },

    /// The configuration key is not recognized.
    #[error("unknown configuration option \"{key}\"")]
    UnknownKey {
        /// The offending key.
        key: String,
    },

    /// The value cannot be parsed for its key.
    #[error("invalid value \"{value}\" for {key}")]
    BadValue {
        /// The key being set.
        key: String,
        /// The rejected value.
        value: String,
    },

    /// A size string has no valid numeric part or suffix.
    #[error("invalid size: {0}")]
    BadSize(String),
}
