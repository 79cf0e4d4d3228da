//! Classified failures from argument processing.
//!
//! None of these are user-visible errors: each one makes the invocation
//! uncacheable, is counted in the statistics, and results in a transparent
//! fallback to the real compiler.

use std::path::PathBuf;

/// Why a command line cannot be cached.
#[derive(Debug, thiserror::Error)]
pub enum ArgsError {
    /// `-E` was given; preprocess-only runs are never cached.
    #[error("called for preprocessing")]
    Preprocessing,

    /// An option from the closed too-hard set was given.
    #[error("unsupported compiler option {0}")]
    UnsupportedOption(String),

    /// An option that requires an argument appeared last.
    #[error("missing argument to {0}")]
    MissingArgument(String),

    /// A response file (`@file`) could not be read.
    #[error("could not read argument file {0}")]
    BadArgumentFile(PathBuf),

    /// Two source files were named.
    #[error("multiple input files: {0} and {1}")]
    MultipleInputFiles(String, String),

    /// No `-c` was given and a second non-source argument appeared; this is
    /// a link step.
    #[error("called for linking")]
    CalledForLink,

    /// Same as [`ArgsError::CalledForLink`] but for an autoconf test, which
    /// is counted separately.
    #[error("called for linking with conftest")]
    Conftest,

    /// The source language is unknown or unsupported.
    #[error("unsupported source language for {0}")]
    UnsupportedLanguage(String),

    /// No input file was found on the command line.
    #[error("no input file")]
    NoInputFile,

    /// Output was directed to stdout.
    #[error("output to stdout")]
    OutputToStdout,

    /// The output file is not a writable regular-file destination.
    #[error("bad output file {0}")]
    BadOutputFile(PathBuf),

    /// The output object name cannot accommodate a derived sidecar name.
    #[error("badly formed object filename {0}")]
    BadObjectName(String),

    /// Precompiled-header use or creation without the required sloppiness.
    #[error("cannot cache precompiled header without sloppiness settings")]
    CannotUsePch,

    /// Two different precompiled headers were named.
    #[error("multiple precompiled headers: {0} and {1}")]
    MultiplePrecompiledHeaders(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(
            ArgsError::UnsupportedOption("-save-temps".to_string()).to_string(),
            "unsupported compiler option -save-temps"
        );
        assert_eq!(
            ArgsError::MissingArgument("-o".to_string()).to_string(),
            "missing argument to -o"
        );
        assert!(ArgsError::NoInputFile.to_string().contains("no input"));
    }
}
