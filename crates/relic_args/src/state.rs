//! Per-invocation state produced by argument classification.

use relic_common::PathRewriter;
use relic_config::Config;

/// Which compiler family argv[0] looks like. Nothing should hard-depend on
/// this beyond the documented per-family quirks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessedCompiler {
    /// clang or clang++.
    Clang,
    /// gcc or g++.
    Gcc,
    /// NVIDIA's CUDA driver.
    Nvcc,
    /// The distcc-pump wrapper.
    Pump,
    /// Anything else; treated like clang where the distinction matters for
    /// correctness.
    Unknown,
}

impl GuessedCompiler {
    /// Guesses from the basename of the compiler executable.
    pub fn from_program(path: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path);
        if name.contains("clang") {
            Self::Clang
        } else if name.contains("gcc") || name.contains("g++") {
            Self::Gcc
        } else if name.contains("nvcc") {
            Self::Nvcc
        } else if name == "pump" || name == "distcc-pump" {
            Self::Pump
        } else {
            Self::Unknown
        }
    }

    /// clang embeds include-file mtimes in precompiled headers, and an
    /// unknown compiler is assumed to do the same.
    pub fn is_clang_like(self) -> bool {
        matches!(self, Self::Clang | Self::Unknown)
    }
}

/// Everything the orchestrator needs to know about one compiler invocation,
/// fixed after argument classification.
#[derive(Debug, Clone)]
pub struct InvocationState {
    /// The (possibly rewritten) source file path.
    pub input_file: String,
    /// The object (or PCH / assembly) output path.
    pub output_obj: String,
    /// Dependency-file path when generating dependencies.
    pub output_dep: Option<String>,
    /// Coverage notes path when compiling with `-ftest-coverage`.
    pub output_cov: Option<String>,
    /// Stack-usage output path when compiling with `-fstack-usage`.
    pub output_su: Option<String>,
    /// Serialized-diagnostics path (clang).
    pub output_dia: Option<String>,
    /// Split-dwarf output path when `-gsplit-dwarf` was seen.
    pub output_dwo: Option<String>,
    /// The language being compiled.
    pub actual_language: String,
    /// Compiler family deduced from argv[0].
    pub guessed_compiler: GuessedCompiler,
    /// The input is already preprocessed (`.i`, `.ii`, assembler).
    pub direct_i_file: bool,
    /// The output is a precompiled header.
    pub output_is_precompiled_header: bool,
    /// A precompiled header participates in this compilation.
    pub using_precompiled_header: bool,
    /// The `.gch`/`.pch`/`.pth` file in use, if any.
    pub included_pch_file: Option<String>,
    /// `-MD`/`-MMD` (or the dependency environment variables) were given.
    pub generating_dependencies: bool,
    /// Debug info is being produced (`-g` at any effective level).
    pub generating_debuginfo: bool,
    /// Coverage notes are being produced.
    pub generating_coverage: bool,
    /// Stack-usage notes are being produced.
    pub generating_stackusage: bool,
    /// Serialized diagnostics are being produced.
    pub generating_diagnostics: bool,
    /// `-gsplit-dwarf` was seen.
    pub seen_split_dwarf: bool,
    /// `-fprofile-arcs` (or `--coverage`) was seen.
    pub profile_arcs: bool,
    /// Profile generation is enabled.
    pub profile_generate: bool,
    /// Profile feedback is being consumed.
    pub profile_use: bool,
    /// Explicit profile directory, if configured on the command line.
    pub profile_dir: Option<String>,
    /// Accumulated `-arch` values (at most [`MAX_ARCH_ARGS`]).
    pub arch_args: Vec<String>,
    /// Values of `-f{debug,file,macro}-prefix-map=` options.
    pub debug_prefix_maps: Vec<String>,
    /// Values of `-fsanitize-blacklist=` options.
    pub sanitize_blacklists: Vec<String>,
    /// Environment variables to set for the child compiler (dependency
    /// output redirection).
    pub env_updates: Vec<(String, String)>,
}

/// Upper bound on accumulated `-arch` options.
pub const MAX_ARCH_ARGS: usize = 10;

impl InvocationState {
    pub(crate) fn new(guessed_compiler: GuessedCompiler) -> Self {
        Self {
            input_file: String::new(),
            output_obj: String::new(),
            output_dep: None,
            output_cov: None,
            output_su: None,
            output_dia: None,
            output_dwo: None,
            actual_language: String::new(),
            guessed_compiler,
            direct_i_file: false,
            output_is_precompiled_header: false,
            using_precompiled_header: false,
            included_pch_file: None,
            generating_dependencies: false,
            generating_debuginfo: false,
            generating_coverage: false,
            generating_stackusage: false,
            generating_diagnostics: false,
            seen_split_dwarf: false,
            profile_arcs: false,
            profile_generate: false,
            profile_use: false,
            profile_dir: None,
            arch_args: Vec::new(),
            debug_prefix_maps: Vec::new(),
            sanitize_blacklists: Vec::new(),
            env_updates: Vec::new(),
        }
    }
}

/// The classified command line.
#[derive(Debug, Clone)]
pub struct ParsedArgs {
    /// Arguments for the preprocessor run (without `-E`, which is added at
    /// execution time). Element 0 is the compiler executable.
    pub preprocessor_args: Vec<String>,
    /// Arguments not passed to the preprocessor that still belong in the
    /// cache key (the compiler-only stream).
    pub extra_args_to_hash: Vec<String>,
    /// Arguments for the real compiler. Element 0 is the compiler
    /// executable.
    pub compiler_args: Vec<String>,
    /// Everything else learned about the invocation.
    pub state: InvocationState,
}

/// Inputs to [`crate::parse`] beyond the argument vector itself.
pub struct ParseContext<'a> {
    /// Mutable: classification may downgrade direct mode, unify and
    /// run-second-cpp, and fill in `cpp_extension`.
    pub config: &'a mut Config,
    /// Rewrites paths under the base directory.
    pub rewriter: &'a PathRewriter,
    /// Compiler family from argv[0].
    pub compiler: GuessedCompiler,
    /// Whether stderr is a color-capable terminal.
    pub stderr_is_tty: bool,
    /// `TERM`, for the color heuristic.
    pub term: Option<String>,
    /// `GCC_COLORS`, for the gcc color heuristic.
    pub gcc_colors: Option<String>,
    /// `DEPENDENCIES_OUTPUT` / `SUNPRO_DEPENDENCIES`, if set.
    pub dependencies_env: Option<DependenciesEnv>,
}

/// A dependency-output environment variable observed at startup.
pub struct DependenciesEnv {
    /// Which variable was set.
    pub var: &'static str,
    /// Its raw value: `file` or `file target`.
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiler_guessing() {
        assert_eq!(
            GuessedCompiler::from_program("/usr/bin/clang-15"),
            GuessedCompiler::Clang
        );
        assert_eq!(
            GuessedCompiler::from_program("/usr/bin/x86_64-linux-gnu-gcc-12"),
            GuessedCompiler::Gcc
        );
        assert_eq!(GuessedCompiler::from_program("g++"), GuessedCompiler::Gcc);
        assert_eq!(GuessedCompiler::from_program("nvcc"), GuessedCompiler::Nvcc);
        assert_eq!(
            GuessedCompiler::from_program("/opt/distcc/bin/pump"),
            GuessedCompiler::Pump
        );
        assert_eq!(GuessedCompiler::from_program("cc"), GuessedCompiler::Unknown);
    }

    #[test]
    fn clang_like() {
        assert!(GuessedCompiler::Clang.is_clang_like());
        assert!(GuessedCompiler::Unknown.is_clang_like());
        assert!(!GuessedCompiler::Gcc.is_clang_like());
        assert!(!GuessedCompiler::Nvcc.is_clang_like());
    }
}
