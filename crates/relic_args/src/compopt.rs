//! Classification table for compiler options.
//!
//! Each known option carries a set of flag bits describing how it must be
//! routed: whether it only matters to the preprocessor or only to the
//! compiler, whether it consumes a following (or concatenated) argument,
//! whether that argument is a path worth rewriting, and whether the option
//! makes the invocation uncacheable.

/// The option changes preprocessor output; route it to the cpp stream.
pub const AFFECTS_CPP: u32 = 1 << 0;
/// The option only matters to the compiler proper.
pub const AFFECTS_COMP: u32 = 1 << 1;
/// The invocation cannot be cached with this option present.
pub const TOO_HARD: u32 = 1 << 2;
/// The option defeats the manifest-based direct path only.
pub const TOO_HARD_DIRECT: u32 = 1 << 3;
/// The option consumes the following argument.
pub const TAKES_ARG: u32 = 1 << 4;
/// The argument may be concatenated onto the option itself.
pub const TAKES_CONCAT_ARG: u32 = 1 << 5;
/// The argument is a path that should be rewritten relative.
pub const TAKES_PATH: u32 = 1 << 6;

/// Known options, sorted by name for binary search.
const OPTIONS: &[(&str, u32)] = &[
    ("--compiler-bindir", TAKES_ARG | TAKES_PATH),
    ("--param", TAKES_ARG),
    ("--save-temps", TOO_HARD),
    ("--serialize-diagnostics", TAKES_ARG | TAKES_PATH),
    ("--specs", TAKES_ARG | TAKES_PATH),
    ("--specs=", TAKES_CONCAT_ARG | TAKES_PATH),
    ("-A", TAKES_ARG),
    ("-B", TAKES_ARG | TAKES_CONCAT_ARG | TAKES_PATH),
    ("-D", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG),
    ("-E", TOO_HARD),
    ("-F", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG | TAKES_PATH),
    ("-G", TAKES_ARG),
    ("-I", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG | TAKES_PATH),
    ("-L", TAKES_ARG),
    ("-M", TOO_HARD),
    ("-MF", TAKES_ARG),
    ("-MM", TOO_HARD),
    ("-MQ", TAKES_ARG),
    ("-MT", TAKES_ARG),
    ("-P", TOO_HARD),
    ("-U", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG),
    ("-V", TAKES_ARG),
    ("-Xassembler", TAKES_ARG),
    ("-Xclang", TAKES_ARG),
    ("-Xlinker", TAKES_ARG),
    ("-Xpreprocessor", AFFECTS_CPP | TOO_HARD_DIRECT | TAKES_ARG),
    ("-all_load", AFFECTS_COMP),
    ("-analyze", TOO_HARD),
    ("-arch", TAKES_ARG),
    ("-aux-info", TAKES_ARG),
    ("-b", TAKES_ARG),
    ("-bind_at_load", AFFECTS_COMP),
    ("-bundle", AFFECTS_COMP),
    ("-bundle_loader", TAKES_ARG),
    ("-ccbin", TAKES_ARG | TAKES_PATH),
    ("-fmodules", TOO_HARD),
    ("-fno-working-directory", AFFECTS_CPP),
    ("-fplugin=", TAKES_CONCAT_ARG | TAKES_PATH),
    ("-fplugin=libcc1plugin", TOO_HARD),
    ("-frepo", TOO_HARD),
    ("-fsyntax-only", TOO_HARD),
    ("-fworking-directory", AFFECTS_CPP),
    ("-gtoggle", TOO_HARD),
    ("-idirafter", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG | TAKES_PATH),
    ("-iframework", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG | TAKES_PATH),
    ("-imacros", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG | TAKES_PATH),
    ("-imultilib", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG | TAKES_PATH),
    ("-include", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG | TAKES_PATH),
    ("-include-pch", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG | TAKES_PATH),
    ("-include-pth", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG | TAKES_PATH),
    ("-index-store-path", TAKES_ARG | TAKES_PATH),
    ("-install_name", TAKES_ARG),
    ("-iprefix", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG | TAKES_PATH),
    ("-iquote", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG | TAKES_PATH),
    ("-isysroot", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG | TAKES_PATH),
    ("-isystem", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG | TAKES_PATH),
    ("-iwithprefix", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG | TAKES_PATH),
    ("-iwithprefixbefore", AFFECTS_CPP | TAKES_ARG | TAKES_CONCAT_ARG | TAKES_PATH),
    ("-ldir", TAKES_ARG),
    ("-nolibc", AFFECTS_COMP),
    ("-nostdinc", AFFECTS_CPP),
    ("-nostdinc++", AFFECTS_CPP),
    ("-odir", TAKES_ARG),
    ("-pie", AFFECTS_COMP),
    ("-prebind", AFFECTS_COMP),
    ("-preload", AFFECTS_COMP),
    ("-rdynamic", AFFECTS_COMP),
    ("-remap", AFFECTS_CPP),
    ("-save-temps", TOO_HARD),
    ("-save-temps=cwd", TOO_HARD),
    ("-save-temps=obj", TOO_HARD),
    ("-specs", TAKES_ARG | TAKES_PATH),
    ("-specs=", TAKES_CONCAT_ARG | TAKES_PATH),
    ("-stdlib=", AFFECTS_CPP | TAKES_CONCAT_ARG),
    ("-trigraphs", AFFECTS_CPP),
    ("-u", TAKES_ARG | TAKES_CONCAT_ARG),
];

fn flags(option: &str) -> u32 {
    OPTIONS
        .binary_search_by(|probe| probe.0.cmp(option))
        .map(|idx| OPTIONS[idx].1)
        .unwrap_or(0)
}

/// Flags for the two-character short form of `arg` (`-DFOO` consults `-D`).
fn short_flags(arg: &str) -> u32 {
    if arg.len() > 2 {
        flags(&arg[..2])
    } else {
        0
    }
}

/// The invocation cannot be cached with this option present.
pub fn too_hard(arg: &str) -> bool {
    flags(arg) & TOO_HARD != 0
}

/// The direct (manifest) path cannot be used with this option present.
pub fn too_hard_for_direct_mode(arg: &str) -> bool {
    flags(arg) & TOO_HARD_DIRECT != 0
}

/// The option changes preprocessor output.
pub fn affects_cpp(arg: &str) -> bool {
    flags(arg) & AFFECTS_CPP != 0
}

/// The short form of `arg` changes preprocessor output (`-DFOO`, `-Idir`).
pub fn prefix_affects_cpp(arg: &str) -> bool {
    short_flags(arg) & AFFECTS_CPP != 0
}

/// The option only matters to the compiler proper.
pub fn affects_comp(arg: &str) -> bool {
    flags(arg) & AFFECTS_COMP != 0
}

/// The short form of `arg` only matters to the compiler proper.
pub fn prefix_affects_comp(arg: &str) -> bool {
    short_flags(arg) & AFFECTS_COMP != 0
}

/// The option consumes the following argument.
pub fn takes_arg(arg: &str) -> bool {
    flags(arg) & TAKES_ARG != 0
}

/// The option's argument may be concatenated onto it.
pub fn takes_concat_arg(arg: &str) -> bool {
    flags(arg) & TAKES_CONCAT_ARG != 0
}

/// The option's argument is a path.
pub fn takes_path(arg: &str) -> bool {
    flags(arg) & TAKES_PATH != 0
}
