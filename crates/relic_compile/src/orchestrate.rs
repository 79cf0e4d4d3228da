//! The per-invocation state machine.
//!
//! One compile request flows through: argument classification, the common
//! hash, the direct (manifest) lookup, the preprocessor lookup (or the
//! depend-mode shortcut), and finally running the real compiler and
//! storing its outputs. Any uncacheable condition falls back to executing
//! the original command line transparently.

use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;
use relic_args::{ArgsError, DependenciesEnv, GuessedCompiler, InvocationState, ParseContext};
use relic_common::{hash_file, Digest, DigestHasher, IncludeSet, PathRewriter};
use relic_config::{Config, LoadedConfig, Sloppiness};
use relic_store::{
    manifest_get, manifest_put, result_get, result_put, Compression, StatMatchMode,
    VerifyOptions, MANIFEST_VERSION, RESULT_VERSION, STDERR_NAME,
};

use crate::error::FatalError;
use crate::execute;
use crate::hashutil::{self, hash_source_file};
use crate::includes::{use_relative_paths_in_depfile, IncludeScanner, ScanError};
use crate::logging;
use crate::signals;
use crate::stats::{self, Statistic};
use crate::tempfiles;

/// Identifies the current key-relevant file formats. Bumping it invalidates
/// every existing cache entry, which is the intended way to roll out any
/// incompatible change to hashing or storage.
const HASH_PREFIX: &str = "3";

const CACHEDIR_TAG: &str = "Signature: 8a477f597d28d172789f06886806bc55\n\
# This file is a cache directory tag created by relic.\n\
# For information about cache directory tags, see:\n\
#\thttp://www.brynosaurus.com/cachedir/\n";

/// A classified failure: counted, then resolved by fallback.
enum Failure {
    /// Increment this counter and run the real compiler.
    Counted(Statistic),
    /// Run the real compiler without touching any counter (read-only
    /// modes, disabled cache).
    Uncounted,
    /// Print a one-line error and exit 1.
    Fatal(FatalError),
}

impl From<FatalError> for Failure {
    fn from(err: FatalError) -> Self {
        Failure::Fatal(err)
    }
}

fn statistic_for_args_error(err: &ArgsError) -> Statistic {
    match err {
        ArgsError::Preprocessing => Statistic::CalledForPreprocessing,
        ArgsError::UnsupportedOption(_) => Statistic::UnsupportedCompilerOption,
        ArgsError::MissingArgument(_) => Statistic::BadCompilerArguments,
        ArgsError::BadArgumentFile(_) => Statistic::BadCompilerArguments,
        ArgsError::MultipleInputFiles(..) => Statistic::MultipleSourceFiles,
        ArgsError::CalledForLink => Statistic::CalledForLink,
        ArgsError::Conftest => Statistic::AutoconfTest,
        ArgsError::UnsupportedLanguage(_) => Statistic::UnsupportedSourceLanguage,
        ArgsError::NoInputFile => Statistic::NoInputFile,
        ArgsError::OutputToStdout => Statistic::OutputToStdout,
        ArgsError::BadOutputFile(_) => Statistic::BadOutputFile,
        ArgsError::BadObjectName(_) => Statistic::BadCompilerArguments,
        ArgsError::CannotUsePch => Statistic::CouldNotUsePch,
        ArgsError::MultiplePrecompiledHeaders(..) => Statistic::BadCompilerArguments,
    }
}

enum LookupMode {
    Direct,
    Preprocessed,
}

struct Build {
    config: Config,
    rewriter: PathRewriter,
    orig_args: Vec<String>,
    own_name: String,
    time_of_compilation: i64,
    state: InvocationState,
    preprocessor_args: Vec<String>,
    compiler_args: Vec<String>,
    /// preprocessor_args plus the compiler-only stream: everything that
    /// belongs in the key.
    args_to_hash: Vec<String>,
    temp_dir: PathBuf,
    /// Where failure counters land until a result key pins a subdirectory.
    stats_file: PathBuf,
    manifest_path: Option<PathBuf>,
    manifest_stats_file: Option<PathBuf>,
    result_key: Option<Digest>,
    result_path: Option<PathBuf>,
    included: IncludeSet,
    has_absolute_include_headers: bool,
    /// The preprocessed source handed to the compiler when run_second_cpp
    /// is off.
    i_tmpfile: Option<String>,
    /// Preprocessor stderr to replay before the compiler's own.
    cpp_stderr: Option<PathBuf>,
}

/// Entry point for a compile invocation. Returns the process exit code;
/// uncacheable invocations exec the real compiler and do not return.
pub fn run_compiler(loaded: LoadedConfig, argv: Vec<String>, own_name: &str) -> i32 {
    signals::install();

    let mut config = loaded.config;
    if let Some(umask) = config.umask {
        unsafe {
            libc::umask(umask as libc::mode_t);
        }
    }

    let mut orig_args = argv;
    if let Err(err) = find_compiler(&mut orig_args, &config, own_name) {
        stats::update(&config.cache_dir.join("stats"), Statistic::CouldNotFindCompiler);
        eprintln!("{own_name}: error: {err}");
        return 1;
    }

    let temp_dir = config.temp_dir();
    if config.temporary_dir.is_none() {
        tempfiles::clean_up_internal_tempdir(&config.cache_dir, &temp_dir);
    }

    if config.disable {
        debug!("cache is disabled");
        return fallback(&config, &orig_args, own_name);
    }

    let cwd = match std::env::current_dir().and_then(|d| d.canonicalize()) {
        Ok(cwd) => cwd,
        Err(_) => {
            eprintln!("{own_name}: error: {}", FatalError::NoWorkingDirectory);
            return 1;
        }
    };
    let rewriter = PathRewriter::new(config.base_dir.clone(), cwd);

    let guessed = GuessedCompiler::from_program(&orig_args[0]);
    let time_of_compilation = tempfiles::unix_now();

    let dependencies_env = ["DEPENDENCIES_OUTPUT", "SUNPRO_DEPENDENCIES"]
        .iter()
        .copied()
        .find_map(|var| {
            std::env::var(var).ok().map(|value| DependenciesEnv { var, value })
        });

    let parsed = {
        let mut ctx = ParseContext {
            config: &mut config,
            rewriter: &rewriter,
            compiler: guessed,
            stderr_is_tty: unsafe { libc::isatty(libc::STDERR_FILENO) == 1 },
            term: std::env::var("TERM").ok(),
            gcc_colors: std::env::var("GCC_COLORS").ok(),
            dependencies_env,
        };
        relic_args::parse(&orig_args, &mut ctx)
    };
    let parsed = match parsed {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!("uncacheable invocation: {err}");
            stats::update(
                &config.cache_dir.join("stats"),
                statistic_for_args_error(&err),
            );
            return fallback(&config, &orig_args, own_name);
        }
    };

    // The depend shortcut needs a dependency file written by the real
    // compiler from the original (not preprocessed) source, with the
    // manifest machinery available to store what it learns.
    if config.depend_mode
        && (!parsed.state.generating_dependencies
            || parsed.state.output_dep.as_deref() == Some("/dev/null")
            || !config.run_second_cpp
            || !config.direct_mode
            || config.unify)
    {
        debug!("disabling depend mode");
        config.depend_mode = false;
    }

    for (var, value) in &parsed.state.env_updates {
        std::env::set_var(var, value);
    }

    debug!("source file: {}", parsed.state.input_file);
    debug!("object file: {}", parsed.state.output_obj);

    let mut args_to_hash = parsed.preprocessor_args.clone();
    args_to_hash.extend(parsed.extra_args_to_hash.iter().cloned());

    let stats_file = config.cache_dir.join("stats");
    let mut build = Build {
        config,
        rewriter,
        orig_args,
        own_name: own_name.to_string(),
        time_of_compilation,
        state: parsed.state,
        preprocessor_args: parsed.preprocessor_args,
        compiler_args: parsed.compiler_args,
        args_to_hash,
        temp_dir,
        stats_file,
        manifest_path: None,
        manifest_stats_file: None,
        result_key: None,
        result_path: None,
        included: IncludeSet::new(),
        has_absolute_include_headers: false,
        i_tmpfile: None,
        cpp_stderr: None,
    };

    let code = build.run();
    if build.config.debug {
        logging::dump_buffer(&build.state.output_obj);
    }
    tempfiles::cleanup_pending();
    code
}

impl Build {
    fn run(&mut self) -> i32 {
        match self.lookup_and_compile() {
            Ok(code) => code,
            Err(Failure::Counted(stat)) => {
                stats::update(&self.stats_file, stat);
                fallback(&self.config, &self.orig_args, &self.own_name)
            }
            Err(Failure::Uncounted) => fallback(&self.config, &self.orig_args, &self.own_name),
            Err(Failure::Fatal(err)) => {
                eprintln!("{}: error: {err}", self.own_name);
                1
            }
        }
    }

    fn lookup_and_compile(&mut self) -> Result<i32, Failure> {
        let mut common_hash = DigestHasher::new();
        self.hash_common_info(&mut common_hash)?;

        let mut direct_hash = common_hash.clone();
        let mut result_key_from_manifest = None;
        let mut put_result_in_manifest = false;

        if self.config.direct_mode {
            debug!("trying direct lookup");
            match self.calculate_direct_key(&mut direct_hash)? {
                Some(result_key) => {
                    self.set_result_key(result_key);
                    if let Some(code) = self.from_cache(LookupMode::Direct, false) {
                        return Ok(code);
                    }
                    // The manifest knew the key but the result is gone;
                    // no need to re-add it later.
                    result_key_from_manifest = Some(result_key);
                }
                None => {
                    put_result_in_manifest = true;
                }
            }
        }

        if self.config.read_only_direct {
            debug!("read-only direct mode; running the real compiler");
            return Err(Failure::Uncounted);
        }

        if !self.config.depend_mode {
            let mut cpp_hash = common_hash.clone();
            let result_key = self.calculate_cpp_key(&mut cpp_hash)?;
            self.set_result_key(result_key);

            if let Some(manifest_key) = result_key_from_manifest {
                if manifest_key != result_key {
                    // The recorded key no longer matches what preprocessing
                    // produces, commonly after a base_dir change. Drop the
                    // whole manifest rather than serving stale results.
                    debug!("manifest entry disagrees with preprocessor output");
                    if let Some(path) = &self.manifest_path {
                        let _ = std::fs::remove_file(path);
                    }
                    put_result_in_manifest = true;
                }
            }

            if let Some(code) = self.from_cache(LookupMode::Preprocessed, put_result_in_manifest)
            {
                return Ok(code);
            }
        }

        if self.config.read_only {
            debug!("read-only mode; running the real compiler");
            return Err(Failure::Uncounted);
        }

        let depend_hash = if self.config.depend_mode {
            Some(direct_hash)
        } else {
            None
        };
        self.to_cache(depend_hash)
    }

    fn set_result_key(&mut self, key: Digest) {
        let hex = key.to_string();
        let dir = self.config.cache_dir.join(&hex[..1]);
        self.result_key = Some(key);
        self.result_path = Some(dir.join(format!("{}.result", &hex[1..])));
        self.stats_file = dir.join("stats");
    }

    fn compression(&self) -> Compression {
        if self.config.compression {
            Compression::Zstd {
                level: self.config.compression_level,
            }
        } else {
            Compression::None
        }
    }

    /// Mixes in everything the direct and preprocessor modes share.
    fn hash_common_info(&mut self, hasher: &mut DigestHasher) -> Result<(), Failure> {
        hasher.update_str(HASH_PREFIX);

        // A .i file is not treated like a .ii file by the compiler.
        hasher.delimiter("ext");
        hasher.update_str(&self.config.cpp_extension);

        let compiler_path = PathBuf::from(&self.orig_args[0]);
        if !compiler_path.is_file() {
            return Err(Failure::Counted(Statistic::CouldNotFindCompiler));
        }
        hashutil::hash_compiler(&self.config, hasher, &compiler_path, true)?;

        // Hard-linked compilers behave differently depending on the name
        // they were invoked by.
        hasher.delimiter("cc_name");
        hasher.update_str(basename(&self.orig_args[0]));

        if !self.config.sloppiness.has(Sloppiness::LOCALE) {
            for var in ["LANG", "LC_ALL", "LC_CTYPE", "LC_MESSAGES"] {
                if let Ok(value) = std::env::var(var) {
                    hasher.delimiter(var);
                    hasher.update_str(&value);
                }
            }
        }

        if self.state.generating_debuginfo && self.config.hash_dir {
            let mut cwd = self.rewriter.cwd().to_string_lossy().into_owned();
            for map in &self.state.debug_prefix_maps {
                if let Some((old, new)) = map.split_once('=') {
                    if let Some(rest) = cwd.strip_prefix(old) {
                        cwd = format!("{new}{rest}");
                    }
                }
            }
            debug!("hashing CWD {cwd}");
            hasher.delimiter("cwd");
            hasher.update_str(&cwd);
        }

        if self.state.seen_split_dwarf {
            // The object embeds a link to the .dwo based on the target
            // name.
            hasher.delimiter("filename");
            hasher.update_str(basename(&self.state.output_obj));
        }

        if self.state.generating_coverage && self.state.profile_arcs {
            // The object file embeds the path of the .gcda it will write.
            let dir = match &self.state.profile_dir {
                Some(dir) => dir.clone(),
                None => {
                    let dir = Path::new(&self.state.output_obj)
                        .parent()
                        .unwrap_or(Path::new("."));
                    dir.canonicalize()
                        .map(|d| d.to_string_lossy().into_owned())
                        .unwrap_or_else(|_| dir.to_string_lossy().into_owned())
                }
            };
            let stem = strip_extension(basename(&self.state.output_obj));
            let gcda_path = format!("{dir}/{stem}.gcda");
            debug!("hashing coverage path {gcda_path}");
            hasher.delimiter("gcda");
            hasher.update_str(&gcda_path);
        }

        for blacklist in &self.state.sanitize_blacklists {
            debug!("hashing sanitize blacklist {blacklist}");
            hasher.delimiter("sanitizeblacklist");
            if hash_file(hasher, Path::new(blacklist)).is_err() {
                return Err(Failure::Counted(Statistic::BadExtraFile));
            }
        }

        for extra in &self.config.extra_files_to_hash.clone() {
            debug!("hashing extra file {}", extra.display());
            hasher.delimiter("extrafile");
            if hash_file(hasher, extra).is_err() {
                return Err(Failure::Counted(Statistic::BadExtraFile));
            }
        }

        if self.state.guessed_compiler == GuessedCompiler::Gcc {
            if let Ok(colors) = std::env::var("GCC_COLORS") {
                hasher.delimiter("gcccolors");
                hasher.update_str(&colors);
            }
        }

        Ok(())
    }

    /// Hashes the argument list. Arguments that cannot change the output
    /// (linker inputs on gcc, dependency file names, prefix-map values)
    /// are excluded so they do not fragment the cache.
    fn hash_arguments(
        &mut self,
        hasher: &mut DigestHasher,
        direct_mode: bool,
    ) -> Result<(), Failure> {
        hasher.delimiter("result version");
        hasher.update_int(RESULT_VERSION as i64);
        if direct_mode {
            hasher.delimiter("manifest version");
            hasher.update_int(MANIFEST_VERSION as i64);
        }

        // clang warns about unused linker flags, so they stay relevant
        // there.
        let is_clang = self.state.guessed_compiler.is_clang_like();
        let args = self.args_to_hash.clone();
        let mut found_ccbin = false;

        let mut i = 1;
        while i < args.len() {
            let arg = &args[i];

            if !is_clang {
                if arg == "-L" && i + 1 < args.len() {
                    i += 2;
                    continue;
                }
                if arg.starts_with("-L") || arg.starts_with("-Wl,") {
                    i += 1;
                    continue;
                }
            }

            // Only the presence of a prefix map matters: differing values
            // are exactly what base-dir users remap away.
            if let Some(option) = ["-fdebug-prefix-map=", "-ffile-prefix-map=", "-fmacro-prefix-map="]
                .iter()
                .find(|o| arg.starts_with(**o))
            {
                hasher.delimiter("arg");
                hasher.update_str(option);
                i += 1;
                continue;
            }

            // In preprocessor mode, options that only steer preprocessing
            // already made their mark on the preprocessed text. Precompiled
            // headers bypass preprocessing, so there they stay in the key.
            if !direct_mode
                && !self.state.output_is_precompiled_header
                && !self.state.using_precompiled_header
            {
                if relic_args::compopt::affects_cpp(arg) {
                    if relic_args::compopt::takes_arg(arg) {
                        i += 1;
                    }
                    i += 1;
                    continue;
                }
                if relic_args::compopt::prefix_affects_cpp(arg) {
                    i += 1;
                    continue;
                }
            }

            if self.state.generating_dependencies {
                if let Some(rest) = arg.strip_prefix("-Wp,-MD,") {
                    if !rest.contains(',') {
                        hasher.update_str("-Wp,-MD,");
                        i += 1;
                        continue;
                    }
                }
                if let Some(rest) = arg.strip_prefix("-Wp,-MMD,") {
                    if !rest.contains(',') {
                        hasher.update_str("-Wp,-MMD,");
                        i += 1;
                        continue;
                    }
                }
                if arg.starts_with("-MF") {
                    // The dependency file name does not change the object.
                    hasher.delimiter("arg");
                    hasher.update_str("-MF");
                    if self.state.output_dep.as_deref() != Some("/dev/null") && arg.len() == 3 {
                        i += 1;
                    }
                    i += 1;
                    continue;
                }
            }

            let specs = arg
                .strip_prefix("-specs=")
                .or_else(|| arg.strip_prefix("--specs="));
            if let Some(path) = specs {
                if Path::new(path).is_file() {
                    // Hash the specs file content, not its location.
                    hasher.delimiter("specs");
                    hashutil::hash_compiler(&self.config, hasher, Path::new(path), false)?;
                    i += 1;
                    continue;
                }
            }

            if let Some(path) = arg.strip_prefix("-fplugin=") {
                if Path::new(path).is_file() {
                    hasher.delimiter("plugin");
                    hashutil::hash_compiler(&self.config, hasher, Path::new(path), false)?;
                    i += 1;
                    continue;
                }
            }

            if arg == "-Xclang"
                && i + 3 < args.len()
                && args[i + 1] == "-load"
                && args[i + 2] == "-Xclang"
                && Path::new(&args[i + 3]).is_file()
            {
                hasher.delimiter("plugin");
                hashutil::hash_compiler(&self.config, hasher, Path::new(&args[i + 3]), false)?;
                i += 4;
                continue;
            }

            if (arg == "-ccbin" || arg == "--compiler-bindir")
                && i + 1 < args.len()
                && Path::new(&args[i + 1]).exists()
            {
                found_ccbin = true;
                hasher.delimiter("ccbin");
                self.hash_nvcc_host_compiler(hasher, Some(Path::new(&args[i + 1])))?;
                i += 2;
                continue;
            }

            hasher.delimiter("arg");
            hasher.update_str(arg);
            if i + 1 < args.len() && relic_args::compopt::takes_arg(arg) {
                i += 1;
                hasher.delimiter("arg");
                hasher.update_str(&args[i]);
            }
            i += 1;
        }

        if self.state.generating_dependencies
            && self.state.output_dep.as_deref() == Some("/dev/null")
        {
            hasher.delimiter("/dev/null dependency file");
        }

        if !found_ccbin && self.state.actual_language == "cu" {
            self.hash_nvcc_host_compiler(hasher, None)?;
        }

        if self.state.profile_generate {
            let dir = self
                .state
                .profile_dir
                .clone()
                .unwrap_or_else(|| self.rewriter.cwd().to_string_lossy().into_owned());
            debug!("adding profile directory {dir} to the hash");
            hasher.delimiter("-fprofile-dir");
            hasher.update_str(&dir);
        }

        if self.state.profile_use {
            let dir = self
                .state
                .profile_dir
                .clone()
                .unwrap_or_else(|| self.rewriter.cwd().to_string_lossy().into_owned());
            let stem = strip_extension(&self.state.output_obj).to_string();
            let gcda_name = format!("{dir}/{stem}.gcda");
            debug!("adding profile data {gcda_name} to the hash");
            hasher.delimiter("-fprofile-use");
            let _ = hash_file(hasher, Path::new(&gcda_name));
        }

        for arch in &self.state.arch_args {
            hasher.delimiter("-arch");
            hasher.update_str(arch);
        }

        Ok(())
    }

    /// The host compiler decides most of what nvcc emits.
    fn hash_nvcc_host_compiler(
        &self,
        hasher: &mut DigestHasher,
        ccbin: Option<&Path>,
    ) -> Result<(), Failure> {
        let is_dir = ccbin.map(|p| p.is_dir()).unwrap_or(true);
        if is_dir {
            for name in ["gcc", "g++"] {
                let candidate = match ccbin {
                    Some(dir) => {
                        let path = dir.join(name);
                        path.is_file().then_some(path)
                    }
                    None => {
                        let path_env = self
                            .config
                            .path
                            .clone()
                            .or_else(|| std::env::var("PATH").ok())
                            .unwrap_or_default();
                        execute::find_executable(name, &self.own_name, &path_env)
                    }
                };
                if let Some(path) = candidate {
                    hashutil::hash_compiler(&self.config, hasher, &path, false)?;
                }
            }
        } else if let Some(path) = ccbin {
            hashutil::hash_compiler(&self.config, hasher, path, false)?;
        }
        Ok(())
    }

    /// Computes the manifest key and consults the manifest for a result
    /// key. `Ok(None)` means the direct path is unusable or missed.
    fn calculate_direct_key(
        &mut self,
        hasher: &mut DigestHasher,
    ) -> Result<Option<Digest>, Failure> {
        self.hash_arguments(hasher, true)?;

        // These influence what the preprocessor would have read.
        for var in [
            "CPATH",
            "C_INCLUDE_PATH",
            "CPLUS_INCLUDE_PATH",
            "OBJC_INCLUDE_PATH",
            "OBJCPLUS_INCLUDE_PATH",
        ] {
            if let Ok(value) = std::env::var(var) {
                hasher.delimiter(var);
                hasher.update_str(&value);
            }
        }

        // The source may use __FILE__.
        hasher.delimiter("inputfile");
        hasher.update_str(&self.state.input_file);

        hasher.delimiter("sourcecode");
        let flags = hash_source_file(
            &self.config,
            hasher,
            Path::new(&self.state.input_file),
            self.time_of_compilation,
        );
        if flags.error {
            return Err(Failure::Counted(Statistic::InternalError));
        }
        if flags.temporal() {
            debug!("source depends on wall-clock time; disabling direct mode");
            self.config.direct_mode = false;
            return Ok(None);
        }

        let manifest_key = hasher.finish();
        let hex = manifest_key.to_string();
        let dir = self.config.cache_dir.join(&hex[..1]);
        let manifest_path = dir.join(format!("{}.manifest", &hex[1..]));
        self.manifest_stats_file = Some(dir.join("stats"));
        self.manifest_path = Some(manifest_path.clone());

        debug!("looking for result key in {}", manifest_path.display());
        let stat_match = if self.config.sloppiness.has(Sloppiness::FILE_STAT_MATCHES) {
            if self.config.sloppiness.has(Sloppiness::FILE_STAT_MATCHES_CTIME) {
                StatMatchMode::MtimeOnly
            } else {
                StatMatchMode::MtimeAndCtime
            }
        } else {
            StatMatchMode::Never
        };
        let config = &self.config;
        let mut hash_one = |path: &Path| -> Option<Digest> {
            let data = std::fs::read(path).ok()?;
            let mut hasher = DigestHasher::new();
            let flags = hashutil::hash_source_buffer(config, &mut hasher, &data);
            if flags.error || flags.temporal() {
                return None;
            }
            Some(hasher.finish())
        };
        let mut opts = VerifyOptions {
            stat_match,
            reject_mtime_mismatch: self.state.output_is_precompiled_header
                && self.state.guessed_compiler.is_clang_like(),
            hash_file: &mut hash_one,
        };
        let found = manifest_get(&manifest_path, &mut opts);
        if found.is_some() {
            debug!("got result key from manifest");
        } else {
            debug!("did not find result key in manifest");
        }
        Ok(found)
    }

    /// Computes the result key by preprocessing the source.
    fn calculate_cpp_key(&mut self, hasher: &mut DigestHasher) -> Result<Digest, Failure> {
        self.hash_arguments(hasher, false)?;

        if self.state.arch_args.is_empty() {
            let key = self.result_key_from_cpp(hasher, None)?;
            debug!("got result key from preprocessor");
            Ok(key)
        } else {
            let arch_args = self.state.arch_args.clone();
            let mut key = None;
            for arch in &arch_args {
                key = Some(self.result_key_from_cpp(hasher, Some(arch))?);
                debug!("got result key from preprocessor with -arch {arch}");
            }
            Ok(key.expect("arch list is nonempty"))
        }
    }

    /// Runs the preprocessor (or reads an already-preprocessed input) and
    /// folds its output into `hasher`.
    fn result_key_from_cpp(
        &mut self,
        hasher: &mut DigestHasher,
        arch: Option<&str>,
    ) -> Result<Digest, Failure> {
        let direct_i = self.state.direct_i_file;
        let mut stderr_path: Option<PathBuf> = None;
        let stdout_path: PathBuf;

        if direct_i {
            // Compiling a .i/.ii file: the input already is the
            // preprocessed text.
            stdout_path = PathBuf::from(&self.state.input_file);
        } else {
            // Short, stable temp stem: long source names would overflow
            // picky filesystems once the pid and counter are appended.
            let mut stem = basename(&self.state.input_file)
                .split('.')
                .next()
                .unwrap_or("cpp")
                .to_string();
            stem.truncate(10);

            let (path_stdout, _file) = tempfiles::create_temp(&self.temp_dir, &format!("{stem}.stdout"))
                .map_err(|_| Failure::Counted(Statistic::InternalError))?;
            let (path_stderr, _file) = tempfiles::create_temp(&self.temp_dir, "tmp.cpp_stderr")
                .map_err(|_| Failure::Counted(Statistic::InternalError))?;

            let mut args = self.preprocessor_args.clone();
            if let Some(arch) = arch {
                args.push("-arch".to_string());
                args.push(arch.to_string());
            }
            args.push("-E".to_string());
            if self.config.keep_comments_cpp {
                args.push("-C".to_string());
            }
            args.push(self.state.input_file.clone());
            execute::add_prefix(
                &mut args,
                &self.config.prefix_command_cpp.clone(),
                &self.own_name,
                &self.path_env(),
            )
            .map_err(Failure::Fatal)?;

            debug!("running preprocessor");
            let status = execute::execute(&args, &path_stdout, &path_stderr)
                .map_err(|_| Failure::Counted(Statistic::InternalError))?;
            if status != 0 {
                debug!("preprocessor gave exit status {status}");
                return Err(Failure::Counted(Statistic::PreprocessorError));
            }
            stdout_path = path_stdout;
            stderr_path = Some(path_stderr);
        }

        hasher.delimiter("cpp");
        let data = std::fs::read(&stdout_path)
            .map_err(|_| Failure::Counted(Statistic::InternalError))?;

        let mut scanner = IncludeScanner::new(
            &mut self.config,
            &self.rewriter,
            &self.state.input_file,
            self.state.included_pch_file.as_deref(),
            self.time_of_compilation,
        );
        let pump = self.state.guessed_compiler == GuessedCompiler::Pump;
        let scan = scanner.process_preprocessed_output(hasher, data, pump);
        // Multiple -arch values rescan; the include set is cumulative.
        self.included.extend(scanner.included.drain());
        self.has_absolute_include_headers |= scanner.has_absolute_include_headers;
        match scan {
            Ok(()) => {}
            Err(ScanError::UnsupportedDirective) => {
                return Err(Failure::Counted(Statistic::UnsupportedCodeDirective));
            }
            Err(ScanError::Parse) => {
                return Err(Failure::Counted(Statistic::InternalError));
            }
        }

        hasher.delimiter("cppstderr");
        if let Some(path) = &stderr_path {
            if hash_file(hasher, path).is_err() {
                return Err(Failure::Counted(Statistic::InternalError));
            }
        }

        if direct_i {
            self.i_tmpfile = Some(self.state.input_file.clone());
        } else {
            // The compiler needs a proper extension to pick the right
            // language for the preprocessed text.
            let with_ext = PathBuf::from(format!(
                "{}.{}",
                stdout_path.display(),
                self.config.cpp_extension
            ));
            std::fs::rename(&stdout_path, &with_ext)
                .map_err(|_| Failure::Counted(Statistic::InternalError))?;
            tempfiles::add_pending(&with_ext);
            self.i_tmpfile = Some(with_ext.to_string_lossy().into_owned());
        }

        if !self.config.run_second_cpp {
            // The preprocessor's stderr must be replayed before the
            // compiler's own output on a later hit.
            self.cpp_stderr = stderr_path;
            hasher.delimiter("runsecondcpp");
            hasher.update_str("false");
        }

        Ok(hasher.finish())
    }

    /// Tries to finish the invocation from the cache. Returns the exit
    /// code on a hit.
    fn from_cache(&mut self, mode: LookupMode, put_result_in_manifest: bool) -> Option<i32> {
        if self.config.recache {
            return None;
        }

        // clang records include mtimes inside a precompiled header and
        // errors out when they have moved on, so only the manifest path
        // (which verifies mtimes) may serve one.
        if matches!(mode, LookupMode::Preprocessed)
            && self.state.output_is_precompiled_header
            && self.state.guessed_compiler.is_clang_like()
        {
            debug!("not considering cached precompiled header in preprocessor mode");
            return None;
        }

        let produce_dep_file = self.state.generating_dependencies
            && matches!(mode, LookupMode::Direct)
            && self.state.output_dep.as_deref() != Some("/dev/null");

        let (stderr_tmp, _file) = tempfiles::create_temp(&self.temp_dir, "tmp.stderr").ok()?;

        let mut wanted: Vec<(String, PathBuf)> = Vec::new();
        if self.state.output_obj != "/dev/null" {
            wanted.push((".o".to_string(), PathBuf::from(&self.state.output_obj)));
            if self.state.seen_split_dwarf {
                if let Some(dwo) = &self.state.output_dwo {
                    wanted.push((".dwo".to_string(), PathBuf::from(dwo)));
                }
            }
        }
        wanted.push((STDERR_NAME.to_string(), stderr_tmp.clone()));
        if produce_dep_file {
            if let Some(dep) = &self.state.output_dep {
                wanted.push((".d".to_string(), PathBuf::from(dep)));
            }
        }
        if self.state.generating_coverage {
            if let Some(cov) = &self.state.output_cov {
                wanted.push((".gcno".to_string(), PathBuf::from(cov)));
            }
        }
        if self.state.generating_stackusage {
            if let Some(su) = &self.state.output_su {
                wanted.push((".su".to_string(), PathBuf::from(su)));
            }
        }
        if self.state.generating_diagnostics {
            if let Some(dia) = &self.state.output_dia {
                wanted.push((".dia".to_string(), PathBuf::from(dia)));
            }
        }

        if self.config.hard_link {
            // Materialized outputs may be hard-linked into place later;
            // never overwrite a file other build steps already link to.
            for (suffix, dest) in &wanted {
                if suffix != STDERR_NAME {
                    let _ = std::fs::remove_file(dest);
                }
            }
        }

        let result_path = self.result_path.as_ref()?;
        if !result_get(result_path, &wanted) {
            debug!("failed to get result from cache");
            return None;
        }

        send_file_to_stderr(&stderr_tmp);

        if put_result_in_manifest {
            self.update_manifest_file();
        }

        let stat = match mode {
            LookupMode::Direct => Statistic::CacheHitDirect,
            LookupMode::Preprocessed => Statistic::CacheHitPreprocessed,
        };
        debug!("succeeded getting cached result");
        stats::update(&self.stats_file, stat);
        Some(0)
    }

    /// Runs the real compiler and stores its outputs.
    fn to_cache(&mut self, depend_hash: Option<DigestHasher>) -> Result<i32, Failure> {
        let mut args = self.compiler_args.clone();
        args.push("-o".to_string());
        args.push(self.state.output_obj.clone());

        if self.config.hard_link {
            // clang happily overwrites an existing (possibly hard-linked)
            // object when assembling.
            let _ = std::fs::remove_file(&self.state.output_obj);
        }

        if self.state.generating_diagnostics {
            if let Some(dia) = &self.state.output_dia {
                args.push("--serialize-diagnostics".to_string());
                args.push(dia.clone());
            }
        }

        // The compiler would emit an extra dependency line for the
        // temporary input if these leaked through.
        std::env::remove_var("DEPENDENCIES_OUTPUT");
        std::env::remove_var("SUNPRO_DEPENDENCIES");

        let depend_mode = self.config.depend_mode;
        if depend_mode {
            // Depend mode runs the original arguments: dependency options
            // included, original source file, no preprocessed input.
            args = self.orig_args.clone();
            args.retain(|a| !a.starts_with("--ccache-"));
            self.time_of_compilation = tempfiles::unix_now();
        } else if self.config.run_second_cpp {
            args.push(self.state.input_file.clone());
        } else if let Some(i_tmpfile) = &self.i_tmpfile {
            args.push(i_tmpfile.clone());
        }

        if self.state.seen_split_dwarf {
            if let Some(dwo) = &self.state.output_dwo {
                // A stale .dwo would be indistinguishable from one the
                // compiler just wrote.
                let _ = std::fs::remove_file(dwo);
            }
        }

        execute::add_prefix(
            &mut args,
            &self.config.prefix_command.clone(),
            &self.own_name,
            &self.path_env(),
        )
        .map_err(Failure::Fatal)?;

        let (tmp_stdout, _f) = tempfiles::create_temp(&self.temp_dir, "tmp.stdout")
            .map_err(|_| Failure::Counted(Statistic::InternalError))?;
        let (mut tmp_stderr, _f) = tempfiles::create_temp(&self.temp_dir, "tmp.stderr")
            .map_err(|_| Failure::Counted(Statistic::InternalError))?;

        debug!("running real compiler");
        let status = execute::execute(&args, &tmp_stdout, &tmp_stderr)
            .map_err(|_| Failure::Counted(Statistic::InternalError))?;

        let stdout_size = std::fs::metadata(&tmp_stdout)
            .map(|m| m.len())
            .map_err(|_| Failure::Counted(Statistic::MissingCacheFile))?;
        if stdout_size != 0 && self.state.guessed_compiler != GuessedCompiler::Pump {
            debug!("compiler produced stdout");
            return Err(Failure::Counted(Statistic::CompilerProducedStdout));
        }

        if let Some(cpp_stderr) = &self.cpp_stderr {
            // Replay preprocessor stderr ahead of the compiler's to keep
            // the diagnostics order a plain compile would have produced.
            let merged = merge_files(cpp_stderr, &tmp_stderr, &self.temp_dir)
                .map_err(|_| Failure::Counted(Statistic::InternalError))?;
            tmp_stderr = merged;
        }

        if status != 0 {
            debug!("compiler gave exit status {status}");
            stats::update(&self.stats_file, Statistic::CompileFailed);
            send_file_to_stderr(&tmp_stderr);
            return Ok(status);
        }

        if depend_mode {
            let mut hasher = depend_hash.expect("depend mode keeps the direct hash");
            let output_dep = PathBuf::from(
                self.state
                    .output_dep
                    .clone()
                    .expect("depend mode requires dependency generation"),
            );
            let key = {
                let mut scanner = IncludeScanner::new(
                    &mut self.config,
                    &self.rewriter,
                    &self.state.input_file,
                    self.state.included_pch_file.as_deref(),
                    self.time_of_compilation,
                );
                let key = scanner.result_key_from_depfile(&output_dep, &mut hasher);
                self.included.extend(scanner.included.drain());
                self.has_absolute_include_headers |= scanner.has_absolute_include_headers;
                key
            };
            match key {
                Some(key) => self.set_result_key(key),
                None => return Err(Failure::Counted(Statistic::InternalError)),
            }
        }

        let produce_dep_file = self.state.generating_dependencies
            && self.state.output_dep.as_deref() != Some("/dev/null");
        if produce_dep_file {
            if let Some(dep) = &self.state.output_dep {
                use_relative_paths_in_depfile(
                    Path::new(dep),
                    &self.rewriter,
                    self.has_absolute_include_headers,
                );
            }
        }

        let obj_meta = std::fs::metadata(&self.state.output_obj);
        match obj_meta {
            Err(_) => {
                debug!("compiler did not produce an object file");
                return Err(Failure::Counted(Statistic::NoOutput));
            }
            Ok(meta) if meta.len() == 0 => {
                debug!("compiler produced an empty object file");
                return Err(Failure::Counted(Statistic::EmptyOutput));
            }
            Ok(_) => {}
        }

        let mut files: Vec<(String, PathBuf)> = Vec::new();
        let stderr_size = std::fs::metadata(&tmp_stderr)
            .map(|m| m.len())
            .map_err(|_| Failure::Counted(Statistic::InternalError))?;
        if stderr_size > 0 {
            files.push((STDERR_NAME.to_string(), tmp_stderr.clone()));
        }
        files.push((".o".to_string(), PathBuf::from(&self.state.output_obj)));
        if self.state.generating_dependencies {
            if let Some(dep) = &self.state.output_dep {
                if dep != "/dev/null" {
                    files.push((".d".to_string(), PathBuf::from(dep)));
                }
            }
        }
        if self.state.generating_coverage {
            if let Some(cov) = &self.state.output_cov {
                files.push((".gcno".to_string(), PathBuf::from(cov)));
            }
        }
        if self.state.generating_stackusage {
            if let Some(su) = &self.state.output_su {
                files.push((".su".to_string(), PathBuf::from(su)));
            }
        }
        if self.state.generating_diagnostics {
            if let Some(dia) = &self.state.output_dia {
                files.push((".dia".to_string(), PathBuf::from(dia)));
            }
        }
        if self.state.seen_split_dwarf {
            if let Some(dwo) = &self.state.output_dwo {
                // gcc and clang differ on when a .dwo appears (e.g. with
                // -gsplit-dwarf -g1), so only store one that exists.
                if Path::new(dwo).is_file() {
                    files.push((".dwo".to_string(), PathBuf::from(dwo)));
                }
            }
        }

        let result_path = self
            .result_path
            .clone()
            .expect("result key is set before storing");
        if let Some(dir) = result_path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|_| Failure::Counted(Statistic::InternalError))?;
        }
        let old_size = std::fs::metadata(&result_path).map(|m| m.len()).ok();

        let new_size = match result_put(&result_path, &files, self.compression()) {
            Ok(size) => size,
            Err(err) => {
                debug!("failed to store result: {err}");
                return Err(Failure::Counted(Statistic::InternalError));
            }
        };
        debug!("stored in cache: {}", result_path.display());
        stats::update_size(
            &self.stats_file,
            new_size as i64 - old_size.unwrap_or(0) as i64,
            if old_size.is_some() { 0 } else { 1 },
        );
        stats::update(&self.stats_file, Statistic::ToCache);

        // Backup tools honor this tag and skip the whole subdirectory.
        if let Some(dir) = result_path.parent() {
            create_cachedir_tag(dir);
        }

        send_file_to_stderr(&tmp_stderr);
        self.update_manifest_file();

        Ok(0)
    }

    fn update_manifest_file(&mut self) {
        if !self.config.direct_mode || self.config.read_only || self.config.read_only_direct {
            return;
        }
        let (Some(manifest_path), Some(result_key)) = (&self.manifest_path, self.result_key)
        else {
            return;
        };

        let old_size = std::fs::metadata(manifest_path).map(|m| m.len()).ok();
        debug!("adding result key to {}", manifest_path.display());
        match manifest_put(
            manifest_path,
            result_key,
            &self.included,
            self.time_of_compilation,
            self.compression(),
        ) {
            Ok(()) => {
                if let (Some(stats_file), Ok(meta)) =
                    (&self.manifest_stats_file, std::fs::metadata(manifest_path))
                {
                    stats::update_size(
                        stats_file,
                        meta.len() as i64 - old_size.unwrap_or(0) as i64,
                        if old_size.is_some() { 0 } else { 1 },
                    );
                }
            }
            Err(err) => {
                debug!(
                    "failed to add result key to {}: {err}",
                    manifest_path.display()
                );
            }
        }
    }

    fn path_env(&self) -> String {
        self.config
            .path
            .clone()
            .or_else(|| std::env::var("PATH").ok())
            .unwrap_or_default()
    }
}

/// Locates the real compiler and rewrites `argv` to start with it.
fn find_compiler(
    argv: &mut Vec<String>,
    config: &Config,
    own_name: &str,
) -> Result<(), FatalError> {
    // Strip "relic" when invoked as "relic gcc -c foo.c".
    if basename(&argv[0]) == own_name {
        argv.remove(0);
        if argv.is_empty() {
            return Err(FatalError::CompilerNotFound(String::new()));
        }
        if argv[0].contains('/') {
            // A full compiler path was given explicitly; use it as-is.
            return Ok(());
        }
    }

    let base = if config.compiler.is_empty() {
        basename(&argv[0]).to_string()
    } else {
        config.compiler.clone()
    };

    let path_env = config
        .path
        .clone()
        .or_else(|| std::env::var("PATH").ok())
        .unwrap_or_default();
    let compiler = execute::find_executable(&base, own_name, &path_env)
        .ok_or_else(|| FatalError::CompilerNotFound(base))?;

    if let Ok(own) = std::env::current_exe() {
        if compiler.canonicalize().ok() == own.canonicalize().ok() {
            return Err(FatalError::RecursiveInvocation(own_name.to_string()));
        }
    }

    argv[0] = compiler.to_string_lossy().into_owned();
    Ok(())
}

/// Strips `--ccache-*` options, prepends the prefix command, and replaces
/// this process with the real compiler.
fn fallback(config: &Config, orig_args: &[String], own_name: &str) -> i32 {
    let mut args: Vec<String> = orig_args
        .iter()
        .filter(|a| !a.starts_with("--ccache-"))
        .cloned()
        .collect();

    let path_env = config
        .path
        .clone()
        .or_else(|| std::env::var("PATH").ok())
        .unwrap_or_default();
    if let Err(err) = execute::add_prefix(&mut args, &config.prefix_command, own_name, &path_env)
    {
        eprintln!("{own_name}: error: {err}");
        return 1;
    }

    debug!("falling back to running the real compiler");
    tempfiles::cleanup_pending();
    let err = execute::exec(&args);
    eprintln!("{own_name}: error: exec of {} failed: {err}", args[0]);
    1
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn strip_extension(path: &str) -> &str {
    match path.rfind('.') {
        Some(dot) if !path[dot..].contains('/') => &path[..dot],
        _ => path,
    }
}

fn send_file_to_stderr(path: &Path) {
    if let Ok(data) = std::fs::read(path) {
        if !data.is_empty() {
            let _ = std::io::stderr().write_all(&data);
        }
    }
}

fn merge_files(first: &Path, second: &Path, temp_dir: &Path) -> std::io::Result<PathBuf> {
    let (merged_path, mut merged) = tempfiles::create_temp(temp_dir, "tmp.stderr")?;
    merged.write_all(&std::fs::read(first)?)?;
    merged.write_all(&std::fs::read(second)?)?;
    Ok(merged_path)
}

fn create_cachedir_tag(dir: &Path) {
    let path = dir.join("CACHEDIR.TAG");
    if path.exists() {
        return;
    }
    if let Err(err) = std::fs::write(&path, CACHEDIR_TAG) {
        debug!("failed to create {}: {err}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_and_extension_helpers() {
        assert_eq!(basename("/usr/bin/gcc-12"), "gcc-12");
        assert_eq!(basename("cc"), "cc");
        assert_eq!(strip_extension("dir/foo.o"), "dir/foo");
        assert_eq!(strip_extension("dir.x/foo"), "dir.x/foo");
    }

    #[test]
    fn args_error_statistics() {
        assert_eq!(
            statistic_for_args_error(&ArgsError::Preprocessing),
            Statistic::CalledForPreprocessing
        );
        assert_eq!(
            statistic_for_args_error(&ArgsError::CalledForLink),
            Statistic::CalledForLink
        );
        assert_eq!(
            statistic_for_args_error(&ArgsError::Conftest),
            Statistic::AutoconfTest
        );
        assert_eq!(
            statistic_for_args_error(&ArgsError::UnsupportedOption("-M".into())),
            Statistic::UnsupportedCompilerOption
        );
    }

    #[test]
    fn cachedir_tag_created_once() {
        let dir = tempfile::tempdir().unwrap();
        create_cachedir_tag(dir.path());
        let tag = dir.path().join("CACHEDIR.TAG");
        let content = std::fs::read_to_string(&tag).unwrap();
        assert!(content.starts_with("Signature: 8a477f597d28d172789f06886806bc55\n"));
        assert_eq!(content.lines().count(), 4);

        // A second call leaves the existing tag alone.
        std::fs::write(&tag, "custom").unwrap();
        create_cachedir_tag(dir.path());
        assert_eq!(std::fs::read_to_string(&tag).unwrap(), "custom");
    }

    #[test]
    fn merge_files_concatenates_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, "cpp warning\n").unwrap();
        std::fs::write(&b, "cc warning\n").unwrap();
        let merged = merge_files(&a, &b, dir.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(merged).unwrap(),
            "cpp warning\ncc warning\n"
        );
    }

    #[test]
    fn find_compiler_resolves_via_path() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let cc = dir.path().join("mycc");
        std::fs::write(&cc, "#!/bin/sh\nexit 0\n").unwrap();
        let mut perms = std::fs::metadata(&cc).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&cc, perms).unwrap();

        let mut config = Config::default();
        config.path = Some(dir.path().to_string_lossy().into_owned());

        let mut argv = vec!["relic".to_string(), "mycc".to_string(), "-c".to_string()];
        find_compiler(&mut argv, &config, "relic").unwrap();
        assert_eq!(argv[0], cc.to_string_lossy());
        assert_eq!(argv[1], "-c");
    }

    #[test]
    fn find_compiler_honors_full_path() {
        let mut argv = vec![
            "relic".to_string(),
            "/usr/bin/definitely-a-compiler".to_string(),
        ];
        let config = Config::default();
        find_compiler(&mut argv, &config, "relic").unwrap();
        assert_eq!(argv[0], "/usr/bin/definitely-a-compiler");
    }

    #[test]
    fn find_compiler_missing_is_fatal() {
        let mut config = Config::default();
        config.path = Some("/definitely/not/a/dir".to_string());
        let mut argv = vec!["relic".to_string(), "no-such-cc".to_string()];
        let err = find_compiler(&mut argv, &config, "relic").unwrap_err();
        assert!(matches!(err, FatalError::CompilerNotFound(_)));
    }
}
