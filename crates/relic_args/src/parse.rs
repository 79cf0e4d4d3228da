//! Compiler command-line classification.
//!
//! One pass over argv partitions every token into four streams:
//!
//! * `common`: passed to both the preprocessor and the compiler,
//! * `cpp`: passed to the preprocessor (and to the compiler only when the
//!   original source is recompiled rather than the preprocessed text),
//! * `dep`: dependency-generation options, preprocessor only,
//! * `compiler_only`: never passed to the preprocessor.
//!
//! The first matching rule wins for each token. Most of the rules below are
//! per-flag special cases accumulated from compiler behavior; the order is
//! load-bearing.

use std::fs;
use std::path::Path;

use log::debug;

use crate::compopt;
use crate::error::ArgsError;
use crate::language;
use crate::state::{
    GuessedCompiler, InvocationState, ParseContext, ParsedArgs, MAX_ARCH_ARGS,
};

/// Classifies `argv` (element 0 is the compiler) into the four argument
/// streams plus the invocation state.
pub fn parse(argv: &[String], ctx: &mut ParseContext<'_>) -> Result<ParsedArgs, ArgsError> {
    let mut state = InvocationState::new(ctx.compiler);

    let mut common: Vec<String> = vec![argv[0].clone()];
    let mut cpp: Vec<String> = Vec::new();
    let mut dep: Vec<String> = Vec::new();
    let mut compiler_only: Vec<String> = Vec::new();

    let mut found_c = false;
    let mut found_dc = false;
    let mut found_s = false;
    let mut found_pch = false;
    let mut found_fpch_preprocess = false;
    let mut found_color_diagnostics = false;
    let mut found_directives_only = false;
    let mut found_rewrite_includes = false;
    let mut explicit_language: Option<String> = None;
    let mut input_charset: Option<String> = None;
    let mut generating_debuginfo_level_3 = false;
    let mut dependency_filename_specified = false;
    let mut dependency_target_specified = false;
    let mut dependency_implicit_target_specified = false;

    let mut expanded: Vec<String> = argv.to_vec();
    let mut i = 1;
    while i < expanded.len() {
        let arg = expanded[i].clone();

        // The user knows best: just swallow the next argument.
        if arg == "--ccache-skip" {
            i += 1;
            let skipped = expanded
                .get(i)
                .ok_or_else(|| ArgsError::MissingArgument(arg.clone()))?;
            common.push(skipped.clone());
            i += 1;
            continue;
        }

        if arg == "-E" {
            return Err(ArgsError::Preprocessing);
        }

        // Response files are expanded in place and reprocessed.
        if arg.starts_with('@') || arg.starts_with("-@") {
            let path = arg.trim_start_matches('-').trim_start_matches('@');
            let tokens = read_atfile(Path::new(path))?;
            expanded.splice(i..=i, tokens);
            continue;
        }

        // nvcc option files: a comma-separated list of response files.
        if ctx.compiler == GuessedCompiler::Nvcc && (arg == "-optf" || arg == "--options-file") {
            let value = expanded
                .get(i + 1)
                .ok_or_else(|| ArgsError::MissingArgument(arg.clone()))?
                .clone();
            let mut insert_at = i + 2;
            for file in value.split(',') {
                let tokens = read_atfile(Path::new(file))?;
                let count = tokens.len();
                expanded.splice(insert_at..insert_at, tokens);
                insert_at += count;
            }
            i += 2;
            continue;
        }

        if compopt::too_hard(&arg) || arg.starts_with("-fdump-") {
            return Err(ArgsError::UnsupportedOption(arg));
        }

        if ctx.config.direct_mode && compopt::too_hard_for_direct_mode(&arg) {
            debug!("option {arg} is unsupported in direct mode; disabling");
            ctx.config.direct_mode = false;
        }

        if arg.starts_with("-Xarch_") {
            return Err(ArgsError::UnsupportedOption(arg));
        }

        if arg == "-arch" {
            if state.arch_args.len() == MAX_ARCH_ARGS {
                return Err(ArgsError::UnsupportedOption(arg));
            }
            i += 1;
            let value = expanded
                .get(i)
                .ok_or_else(|| ArgsError::MissingArgument(arg.clone()))?;
            state.arch_args.push(value.clone());
            if state.arch_args.len() == 2 {
                // Several architectures means several preprocessor outputs;
                // the compiler must see the original source.
                ctx.config.run_second_cpp = true;
            }
            i += 1;
            continue;
        }

        if compopt::affects_comp(&arg) {
            compiler_only.push(arg.clone());
            if compopt::takes_arg(&arg) {
                i += 1;
                let value = expanded
                    .get(i)
                    .ok_or_else(|| ArgsError::MissingArgument(arg.clone()))?;
                compiler_only.push(value.clone());
            }
            i += 1;
            continue;
        }
        if compopt::prefix_affects_comp(&arg) {
            compiler_only.push(arg);
            i += 1;
            continue;
        }

        if arg == "-fpch-preprocess" || arg == "-emit-pch" || arg == "-emit-pth" {
            found_fpch_preprocess = true;
            // Falls through to the generic routing below.
        }

        if arg == "-c" {
            found_c = true;
            i += 1;
            continue;
        }

        // nvcc separable compilation: -dc implies -c.
        if (arg == "-dc" || arg == "--device-c") && ctx.compiler == GuessedCompiler::Nvcc {
            found_dc = true;
            i += 1;
            continue;
        }

        if arg == "-S" {
            common.push(arg);
            found_s = true;
            i += 1;
            continue;
        }

        // Remember the last -x before the input file and strip it: the
        // preprocessed file has a different implicit language.
        if arg == "-x" {
            i += 1;
            let value = expanded
                .get(i)
                .ok_or_else(|| ArgsError::MissingArgument(arg.clone()))?;
            if state.input_file.is_empty() {
                explicit_language = Some(value.clone());
            }
            i += 1;
            continue;
        }
        if let Some(lang) = arg.strip_prefix("-x") {
            if state.input_file.is_empty() {
                explicit_language = Some(lang.to_string());
            }
            i += 1;
            continue;
        }

        if arg == "-o" {
            i += 1;
            let value = expanded
                .get(i)
                .ok_or_else(|| ArgsError::MissingArgument(arg.clone()))?;
            state.output_obj = ctx.rewriter.rewrite(value);
            i += 1;
            continue;
        }
        // -o with no space; nvcc does not support this form.
        if ctx.compiler != GuessedCompiler::Nvcc {
            if let Some(path) = arg.strip_prefix("-o") {
                state.output_obj = ctx.rewriter.rewrite(path);
                i += 1;
                continue;
            }
        }

        if arg.starts_with("-fdebug-prefix-map=")
            || arg.starts_with("-ffile-prefix-map=")
            || arg.starts_with("-fmacro-prefix-map=")
        {
            if let Some((_, map)) = arg.split_once('=') {
                state.debug_prefix_maps.push(map.to_string());
            }
            common.push(arg);
            i += 1;
            continue;
        }

        // Debug options decide whether the working directory is hashed and
        // whether the preprocessed-source trick stays sound.
        if arg.starts_with("-g") {
            common.push(arg.clone());
            if arg.starts_with("-gdwarf") {
                state.generating_debuginfo = true;
                i += 1;
                continue;
            }
            if arg.starts_with("-gz") {
                i += 1;
                continue;
            }
            match arg.chars().last() {
                Some('0') => {
                    state.generating_debuginfo = false;
                    generating_debuginfo_level_3 = false;
                }
                last => {
                    state.generating_debuginfo = true;
                    if last == Some('3') {
                        generating_debuginfo_level_3 = true;
                    }
                    if arg == "-gsplit-dwarf" {
                        state.seen_split_dwarf = true;
                    }
                }
            }
            i += 1;
            continue;
        }

        if arg == "-MD" || arg == "-MMD" {
            state.generating_dependencies = true;
            dep.push(arg);
            i += 1;
            continue;
        }

        if arg.starts_with("-MF") {
            dependency_filename_specified = true;
            let separate = arg.len() == 3;
            let value = if separate {
                i += 1;
                expanded
                    .get(i)
                    .ok_or_else(|| ArgsError::MissingArgument(arg.clone()))?
                    .clone()
            } else {
                arg[3..].to_string()
            };
            let relpath = ctx.rewriter.rewrite(&value);
            if separate {
                dep.push("-MF".to_string());
                dep.push(relpath.clone());
            } else {
                dep.push(format!("-MF{relpath}"));
            }
            state.output_dep = Some(relpath);
            i += 1;
            continue;
        }

        if arg.starts_with("-MQ") || arg.starts_with("-MT") {
            dependency_target_specified = true;
            if arg.len() == 3 {
                i += 1;
                let value = expanded
                    .get(i)
                    .ok_or_else(|| ArgsError::MissingArgument(arg.clone()))?;
                dep.push(arg.clone());
                dep.push(ctx.rewriter.rewrite(value));
            } else {
                let (opt, value) = arg.split_at(3);
                dep.push(format!("{opt}{}", ctx.rewriter.rewrite(value)));
            }
            i += 1;
            continue;
        }

        if arg == "-fprofile-arcs" {
            state.profile_arcs = true;
            common.push(arg);
            i += 1;
            continue;
        }
        if arg == "-ftest-coverage" {
            state.generating_coverage = true;
            common.push(arg);
            i += 1;
            continue;
        }
        if arg == "-fstack-usage" {
            state.generating_stackusage = true;
            common.push(arg);
            i += 1;
            continue;
        }
        if arg == "--coverage" || arg == "-coverage" {
            // Equivalent to -fprofile-arcs -ftest-coverage.
            state.profile_arcs = true;
            state.generating_coverage = true;
            common.push(arg);
            i += 1;
            continue;
        }
        if arg == "-fbranch-probabilities" {
            state.profile_use = true;
            common.push(arg);
            i += 1;
            continue;
        }
        if let Some(dir) = arg.strip_prefix("-fprofile-dir=") {
            state.profile_dir = Some(dir.to_string());
            common.push(arg);
            i += 1;
            continue;
        }
        if let Some(file) = arg.strip_prefix("-fsanitize-blacklist=") {
            state.sanitize_blacklists.push(file.to_string());
            common.push(arg);
            i += 1;
            continue;
        }

        if let Some(path) = arg.strip_prefix("--sysroot=") {
            common.push(format!("--sysroot={}", ctx.rewriter.rewrite(path)));
            i += 1;
            continue;
        }
        if arg == "--sysroot" {
            i += 1;
            let value = expanded
                .get(i)
                .ok_or_else(|| ArgsError::MissingArgument(arg.clone()))?;
            common.push(arg);
            common.push(ctx.rewriter.rewrite(value));
            i += 1;
            continue;
        }
        if arg == "-target" {
            i += 1;
            let value = expanded
                .get(i)
                .ok_or_else(|| ArgsError::MissingArgument(arg.clone()))?;
            common.push(arg);
            common.push(value.clone());
            i += 1;
            continue;
        }

        if arg.starts_with("-Wp,") {
            if arg == "-Wp,-P" || arg.contains(",-P,") || arg.ends_with(",-P") {
                // -P strips linemarkers, so an object built from the
                // preprocessed text would differ from an uncached build.
                return Err(ArgsError::UnsupportedOption(arg));
            }
            if let Some(path) = arg
                .strip_prefix("-Wp,-MD,")
                .filter(|rest| !rest.contains(','))
            {
                state.generating_dependencies = true;
                dependency_filename_specified = true;
                state.output_dep = Some(ctx.rewriter.rewrite(path));
                dep.push(arg);
                i += 1;
                continue;
            }
            if let Some(path) = arg
                .strip_prefix("-Wp,-MMD,")
                .filter(|rest| !rest.contains(','))
            {
                state.generating_dependencies = true;
                dependency_filename_specified = true;
                state.output_dep = Some(ctx.rewriter.rewrite(path));
                dep.push(arg);
                i += 1;
                continue;
            }
            if arg.starts_with("-Wp,-D") && !arg[6..].contains(',') {
                cpp.push(arg[4..].to_string());
                i += 1;
                continue;
            }
            if arg == "-Wp,-MP"
                || (arg.len() > 8
                    && arg.starts_with("-Wp,-M")
                    && arg.as_bytes()[7] == b','
                    && matches!(arg.as_bytes()[6], b'F' | b'Q' | b'T')
                    && !arg[8..].contains(','))
            {
                dep.push(arg);
                i += 1;
                continue;
            }
            if ctx.config.direct_mode {
                // -Wp, can smuggle arbitrary preprocessor options past the
                // classifier.
                debug!("option {arg} is unsupported in direct mode; disabling");
                ctx.config.direct_mode = false;
            }
            cpp.push(arg);
            i += 1;
            continue;
        }

        if arg == "-MP" {
            dep.push(arg);
            i += 1;
            continue;
        }

        // Passed only to the preprocessor; conversion must not happen twice.
        if arg.starts_with("-finput-charset=") {
            input_charset = Some(arg);
            i += 1;
            continue;
        }

        if arg == "--serialize-diagnostics" {
            i += 1;
            let value = expanded
                .get(i)
                .ok_or_else(|| ArgsError::MissingArgument(arg.clone()))?;
            state.generating_diagnostics = true;
            state.output_dia = Some(ctx.rewriter.rewrite(value));
            i += 1;
            continue;
        }

        if arg.starts_with("-fprofile-") {
            let rewritten = match arg.split_once('=') {
                Some((opt, dir)) => {
                    // The real path gives a better hit rate when the same
                    // directory is reached through different spellings.
                    let resolved = fs::canonicalize(dir)
                        .map(|p| p.to_string_lossy().into_owned())
                        .unwrap_or_else(|_| dir.to_string());
                    format!("{opt}={resolved}")
                }
                None => arg.clone(),
            };
            let arg_profile_dir = arg.split_once('=').map(|(_, d)| d.to_string());

            let supported = if arg.starts_with("-fprofile-generate") {
                state.profile_generate = true;
                true
            } else if arg.starts_with("-fprofile-use") {
                state.profile_use = true;
                true
            } else {
                arg == "-fprofile-dir"
            };

            if supported {
                common.push(rewritten);
                if let Some(dir) = arg_profile_dir {
                    if state.profile_dir.is_some() {
                        // Two different profile directories; no way to know
                        // which one the compiler will honor.
                        return Err(ArgsError::UnsupportedOption(arg));
                    }
                    state.profile_dir = Some(dir);
                }
                i += 1;
                continue;
            }
            debug!("unknown profile option {arg}");
            // Falls through to the generic routing below.
        }

        if arg == "-fcolor-diagnostics"
            || arg == "-fno-color-diagnostics"
            || arg == "-fdiagnostics-color"
            || arg == "-fdiagnostics-color=always"
            || arg == "-fno-diagnostics-color"
            || arg == "-fdiagnostics-color=never"
        {
            common.push(arg);
            found_color_diagnostics = true;
            i += 1;
            continue;
        }
        if arg == "-fdiagnostics-color=auto" {
            if color_output_possible(ctx) {
                // Our redirection hides the terminal from the compiler, so
                // "auto" must be forced.
                common.push("-fdiagnostics-color=always".to_string());
            } else {
                common.push(arg);
            }
            found_color_diagnostics = true;
            i += 1;
            continue;
        }

        if arg == "-fdirectives-only" {
            found_directives_only = true;
            i += 1;
            continue;
        }
        if arg == "-frewrite-includes" {
            found_rewrite_includes = true;
            i += 1;
            continue;
        }

        if ctx
            .config
            .sloppiness
            .has(relic_config::Sloppiness::CLANG_INDEX_STORE)
            && arg == "-index-store-path"
        {
            // Xcode passes a UUID-bearing path here; it would defeat cache
            // sharing between users.
            i += 2;
            continue;
        }

        // Options whose path argument is rewritten for portability.
        if compopt::takes_path(&arg) {
            let value = expanded
                .get(i + 1)
                .ok_or_else(|| ArgsError::MissingArgument(arg.clone()))?
                .clone();
            detect_pch(&arg, &value, &mut state, &mut found_pch)?;
            let relpath = ctx.rewriter.rewrite(&value);
            if compopt::affects_cpp(&arg) {
                cpp.push(arg);
                cpp.push(relpath);
            } else {
                common.push(arg);
                common.push(relpath);
            }
            i += 2;
            continue;
        }

        // Concatenated path arguments beginning with a slash.
        if arg.starts_with('-') {
            if let Some(slash) = arg.find('/') {
                let (option, path) = arg.split_at(slash);
                if compopt::takes_concat_arg(option) && compopt::takes_path(option) {
                    let combined = format!("{option}{}", ctx.rewriter.rewrite(path));
                    if compopt::affects_cpp(option) {
                        cpp.push(combined);
                    } else {
                        common.push(combined);
                    }
                    i += 1;
                    continue;
                }
            }
        }

        if compopt::takes_arg(&arg) {
            let value = expanded
                .get(i + 1)
                .ok_or_else(|| ArgsError::MissingArgument(arg.clone()))?
                .clone();
            if compopt::affects_cpp(&arg) {
                cpp.push(arg);
                cpp.push(value);
            } else {
                common.push(arg);
                common.push(value);
            }
            i += 2;
            continue;
        }

        if arg.starts_with('-') {
            if compopt::affects_cpp(&arg) || compopt::prefix_affects_cpp(&arg) {
                cpp.push(arg);
            } else {
                common.push(arg);
            }
            i += 1;
            continue;
        }

        // A non-file plain token is assumed to be some unusual option.
        let metadata = fs::metadata(&arg);
        let is_regular = metadata.map(|m| m.is_file()).unwrap_or(false);
        if arg != "/dev/null" && !is_regular {
            debug!("{arg} is not a regular file, treating as an option");
            common.push(arg);
            i += 1;
            continue;
        }

        if !state.input_file.is_empty() {
            return Err(if language::language_for_file(&arg).is_some() {
                ArgsError::MultipleInputFiles(state.input_file.clone(), arg)
            } else if !found_c && !found_dc {
                if arg.contains("conftest.") {
                    ArgsError::Conftest
                } else {
                    ArgsError::CalledForLink
                }
            } else {
                ArgsError::UnsupportedLanguage(arg)
            });
        }

        state.input_file = if state.generating_coverage {
            // The source path is recorded in coverage notes.
            arg
        } else if is_symlink(&arg) {
            // Resolving a symlinked source would relocate the directory that
            // relative includes resolve against.
            arg
        } else {
            ctx.rewriter.rewrite(&arg)
        };
        i += 1;
    }

    if state.generating_debuginfo && ctx.config.unify {
        debug!("generating debug info; disabling unify mode");
        ctx.config.unify = false;
    }
    if generating_debuginfo_level_3 && !ctx.config.run_second_cpp {
        debug!("generating debug info level 3; compiling original source");
        ctx.config.run_second_cpp = true;
    }

    // The dependency environment variables behave like -MMD/-MF; the child
    // must see the rewritten path so dep files land where the build expects.
    if let Some(deps) = ctx.dependencies_env.take() {
        state.generating_dependencies = true;
        dependency_filename_specified = true;
        let mut words = deps.value.split_whitespace();
        if let Some(file) = words.next() {
            let relpath = ctx.rewriter.rewrite(file);
            state.output_dep = Some(relpath.clone());
            match words.next() {
                Some(target) => {
                    dependency_target_specified = true;
                    let target_rel = ctx.rewriter.rewrite(target);
                    state
                        .env_updates
                        .push((deps.var.to_string(), format!("{relpath} {target_rel}")));
                }
                None => {
                    dependency_implicit_target_specified = true;
                    state.env_updates.push((deps.var.to_string(), relpath));
                }
            }
        }
    }

    if state.input_file.is_empty() {
        return Err(ArgsError::NoInputFile);
    }

    if found_pch || found_fpch_preprocess {
        state.using_precompiled_header = true;
        if !ctx
            .config
            .sloppiness
            .has(relic_config::Sloppiness::TIME_MACROS)
        {
            debug!("using a precompiled header requires the time_macros sloppiness");
            return Err(ArgsError::CannotUsePch);
        }
    }

    if explicit_language.as_deref() == Some("none") {
        explicit_language = None;
    }
    let file_language = language::language_for_file(&state.input_file);
    let actual_language = match &explicit_language {
        Some(lang) => {
            if !language::language_is_supported(lang) {
                return Err(ArgsError::UnsupportedLanguage(lang.clone()));
            }
            lang.clone()
        }
        None => match file_language {
            Some(lang) => lang.to_string(),
            None => return Err(ArgsError::UnsupportedLanguage(state.input_file.clone())),
        },
    };
    state.output_is_precompiled_header = actual_language.contains("-header");

    if state.output_is_precompiled_header
        && !ctx
            .config
            .sloppiness
            .has(relic_config::Sloppiness::PCH_DEFINES)
    {
        debug!("creating a precompiled header requires the pch_defines sloppiness");
        return Err(ArgsError::CannotUsePch);
    }

    if !found_c && !found_dc && !found_s {
        if state.output_is_precompiled_header {
            common.push("-c".to_string());
        } else if state.input_file.contains("conftest.") {
            return Err(ArgsError::Conftest);
        } else {
            return Err(ArgsError::CalledForLink);
        }
    }

    state.actual_language = actual_language;

    if !ctx.config.run_second_cpp && state.actual_language == "cu" {
        debug!("CUDA compilation; compiling original source");
        ctx.config.run_second_cpp = true;
    }

    state.direct_i_file = language::language_is_preprocessed(&state.actual_language);

    if state.output_is_precompiled_header && !ctx.config.run_second_cpp {
        // A precompiled header cannot be built from preprocessed text.
        ctx.config.run_second_cpp = true;
    }

    if ctx.config.cpp_extension.is_empty() {
        let p_language = language::p_language_for_language(&state.actual_language)
            .unwrap_or("cpp-output");
        ctx.config.cpp_extension = language::extension_for_language(p_language)
            .unwrap_or("i")
            .to_string();
    }

    if state.output_obj == "-" {
        return Err(ArgsError::OutputToStdout);
    }

    if state.output_obj.is_empty() {
        state.output_obj = if state.output_is_precompiled_header {
            format!("{}.gch", state.input_file)
        } else {
            default_object_name(&state.input_file, found_s)
        };
    }

    if state.seen_split_dwarf {
        match strip_extension(&state.output_obj) {
            Some(base) => state.output_dwo = Some(format!("{base}.dwo")),
            None => return Err(ArgsError::BadObjectName(state.output_obj.clone())),
        }
    }

    if state.output_obj != "/dev/null" {
        if let Ok(meta) = fs::metadata(&state.output_obj) {
            if !meta.is_file() {
                return Err(ArgsError::BadOutputFile(state.output_obj.clone().into()));
            }
        }
        let output_dir = Path::new(&state.output_obj).parent().unwrap_or(Path::new("."));
        let dir = if output_dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            output_dir
        };
        if !dir.is_dir() {
            return Err(ArgsError::BadOutputFile(state.output_obj.clone().into()));
        }
    }

    // Options the compiler must not see again when it consumes preprocessed
    // text.
    if let Some(charset) = input_charset {
        cpp.push(charset);
    }
    if found_pch {
        cpp.push("-fpch-preprocess".to_string());
    }
    if let Some(lang) = &explicit_language {
        cpp.push("-x".to_string());
        cpp.push(lang.clone());
    }

    // Output is redirected, so the compiler will not color on its own.
    if !found_color_diagnostics && color_output_possible(ctx) {
        match ctx.compiler {
            GuessedCompiler::Clang => {
                if state.actual_language != "assembler" {
                    common.push("-fdiagnostics-color=always".to_string());
                }
            }
            GuessedCompiler::Gcc => {
                if ctx.gcc_colors.as_deref().is_some_and(|v| !v.is_empty()) {
                    common.push("-fdiagnostics-color".to_string());
                }
            }
            _ => {}
        }
    }

    if state.generating_dependencies {
        if !dependency_filename_specified {
            let base = strip_extension(&state.output_obj)
                .map(str::to_string)
                .unwrap_or_else(|| state.output_obj.clone());
            let default_depfile = format!("{base}.d");
            dep.push("-MF".to_string());
            dep.push(default_depfile.clone());
            state.output_dep = Some(ctx.rewriter.rewrite(&default_depfile));
        }
        let dep_ext_is_o = state
            .output_dep
            .as_deref()
            .map(|d| d.ends_with(".o"))
            .unwrap_or(false);
        if !dependency_target_specified && !dependency_implicit_target_specified && !dep_ext_is_o {
            dep.push("-MQ".to_string());
            dep.push(state.output_obj.clone());
        }
    }
    if state.generating_coverage {
        let base = strip_extension(&state.output_obj)
            .map(str::to_string)
            .unwrap_or_else(|| state.output_obj.clone());
        state.output_cov = Some(ctx.rewriter.rewrite(&format!("{base}.gcno")));
    }
    if state.generating_stackusage {
        let base = strip_extension(&state.output_obj)
            .map(str::to_string)
            .unwrap_or_else(|| state.output_obj.clone());
        state.output_su = Some(ctx.rewriter.rewrite(&format!("{base}.su")));
    }

    let mut compiler_args = common.clone();
    compiler_args.extend(compiler_only.iter().cloned());

    if ctx.config.run_second_cpp {
        compiler_args.extend(cpp.iter().cloned());
    } else if found_directives_only || found_rewrite_includes {
        // The "preprocessed" text still carries directives that need one
        // more preprocessing pass.
        compiler_args.extend(cpp.iter().cloned());
        if found_directives_only {
            cpp.push("-fdirectives-only".to_string());
            compiler_args.push("-fpreprocessed".to_string());
            compiler_args.push("-fdirectives-only".to_string());
        }
        if found_rewrite_includes {
            cpp.push("-frewrite-includes".to_string());
            compiler_args.push("-x".to_string());
            compiler_args.push(state.actual_language.clone());
        }
    } else if let Some(lang) = &explicit_language {
        // The preprocessed language must be spelled out when -x was given;
        // some distcc variants do not reset it.
        compiler_args.push("-x".to_string());
        if let Some(p) = language::p_language_for_language(lang) {
            compiler_args.push(p.to_string());
        } else {
            compiler_args.push(lang.clone());
        }
    }

    if found_c {
        compiler_args.push("-c".to_string());
    }
    if found_dc {
        compiler_args.push("-dc".to_string());
    }
    for arch in &state.arch_args {
        compiler_args.push("-arch".to_string());
        compiler_args.push(arch.clone());
    }

    // Dependency options go only to the preprocessor; some compilers write
    // broken dep files when fed preprocessed source.
    cpp.extend(dep);

    let mut preprocessor_args = common;
    preprocessor_args.extend(cpp);

    Ok(ParsedArgs {
        preprocessor_args,
        extra_args_to_hash: compiler_only,
        compiler_args,
        state,
    })
}

fn color_output_possible(ctx: &ParseContext<'_>) -> bool {
    ctx.stderr_is_tty
        && ctx
            .term
            .as_deref()
            .is_some_and(|t| !t.eq_ignore_ascii_case("dumb"))
}

fn is_symlink(path: &str) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// `foo.c` → `foo.o` (or `foo.s` under `-S`), in the current directory.
fn default_object_name(input: &str, assembly: bool) -> String {
    let base = input.rsplit('/').next().unwrap_or(input);
    let ext = if assembly { 's' } else { 'o' };
    match base.rsplit_once('.') {
        Some((stem, _)) => format!("{stem}.{ext}"),
        None => format!("{base}.{ext}"),
    }
}

/// Strips the final extension, if the last path component has one.
fn strip_extension(path: &str) -> Option<&str> {
    let dot = path.rfind('.')?;
    if path[dot..].contains('/') {
        return None;
    }
    if path[dot + 1..].is_empty() {
        return None;
    }
    Some(&path[..dot])
}

fn detect_pch(
    option: &str,
    arg: &str,
    state: &mut InvocationState,
    found_pch: &mut bool,
) -> Result<(), ArgsError> {
    let mut pch_file: Option<String> = None;
    if option == "-include-pch" || option == "-include-pth" {
        if Path::new(arg).exists() {
            pch_file = Some(arg.to_string());
        }
    } else {
        for ext in ["gch", "pch", "pth"] {
            let candidate = format!("{arg}.{ext}");
            if Path::new(&candidate).exists() {
                pch_file = Some(candidate);
                break;
            }
        }
    }

    if let Some(file) = pch_file {
        debug!("detected use of precompiled header: {file}");
        if let Some(existing) = &state.included_pch_file {
            return Err(ArgsError::MultiplePrecompiledHeaders(
                existing.clone(),
                file,
            ));
        }
        state.included_pch_file = Some(file);
        *found_pch = true;
    }
    Ok(())
}

/// Reads a gcc-style response file: whitespace-separated arguments with
/// single/double quoting and backslash escapes.
fn read_atfile(path: &Path) -> Result<Vec<String>, ArgsError> {
    let content =
        fs::read_to_string(path).map_err(|_| ArgsError::BadArgumentFile(path.to_path_buf()))?;
    Ok(tokenize_atfile(&content))
}

fn tokenize_atfile(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;
    let mut chars = content.chars();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else if c == '\\' {
                    if let Some(next) = chars.next() {
                        cur.push(next);
                    }
                } else {
                    cur.push(c);
                }
            }
            None => {
                if c.is_whitespace() {
                    if in_arg {
                        out.push(std::mem::take(&mut cur));
                        in_arg = false;
                    }
                } else if c == '\'' || c == '"' {
                    quote = Some(c);
                    in_arg = true;
                } else if c == '\\' {
                    if let Some(next) = chars.next() {
                        cur.push(next);
                    }
                    in_arg = true;
                } else {
                    cur.push(c);
                    in_arg = true;
                }
            }
        }
    }
    if in_arg {
        out.push(cur);
    }
    out
}
