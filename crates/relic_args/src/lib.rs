//! Compiler command-line classification for the relic cache.
//!
//! The classifier partitions a compiler invocation into the argument streams
//! used for preprocessing, compiling and hashing, extracts the semantic
//! flags the orchestrator needs, and rejects invocations that cannot be
//! cached.

pub mod compopt;
pub mod error;
pub mod language;
pub mod parse;
pub mod state;

pub use error::ArgsError;
pub use parse::parse;
pub use state::{
    DependenciesEnv, GuessedCompiler, InvocationState, ParseContext, ParsedArgs, MAX_ARCH_ARGS,
};
