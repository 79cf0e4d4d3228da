//! Per-invocation orchestration for the relic compiler cache.
//!
//! This crate owns everything that happens between "argv arrived" and "an
//! object file exists": source and compiler fingerprinting, preprocessor
//! output scanning, child-process execution, signal-safe temp-file
//! bookkeeping, statistics, and the direct / preprocessor / depend lookup
//! state machine.

pub mod cleanup;
pub mod error;
pub mod execute;
pub mod hashutil;
pub mod includes;
pub mod lockfile;
pub mod logging;
pub mod orchestrate;
pub mod signals;
pub mod stats;
pub mod tempfiles;

pub use error::FatalError;
pub use orchestrate::run_compiler;
pub use stats::Statistic;
