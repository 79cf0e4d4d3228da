//! Fatal errors: the only failures that surface to the user.
//!
//! Everything else in this crate degrades to a statistics counter plus a
//! transparent fallback to the real compiler.

/// Errors that abort the invocation with a one-line message and exit code 1.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    /// The compiler could not be located on PATH.
    #[error("could not find compiler \"{0}\" in PATH")]
    CompilerNotFound(String),

    /// The located "compiler" is this program itself.
    #[error("recursive invocation (the name of the relic binary must be \"{0}\")")]
    RecursiveInvocation(String),

    /// The configured compiler-check command failed.
    #[error("failure running compiler check command: {0}")]
    CompilerCheckFailed(String),

    /// A command named in a prefix_command setting does not exist.
    #[error("{0}: not found")]
    PrefixCommandNotFound(String),

    /// The working directory could not be determined.
    #[error("unable to determine current working directory")]
    NoWorkingDirectory,
}
