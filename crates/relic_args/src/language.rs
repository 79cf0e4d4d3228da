//! Source language tables.
//!
//! Languages are identified by the strings the compiler's `-x` option uses.
//! Extension matching is case-sensitive: `.C` is C++, `.c` is C.

/// File extension to language. First match wins for reverse lookups, so the
/// canonical extension for each language comes first.
const EXTENSIONS: &[(&str, &str)] = &[
    ("c", "c"),
    ("C", "c++"),
    ("cc", "c++"),
    ("CC", "c++"),
    ("cp", "c++"),
    ("CP", "c++"),
    ("cpp", "c++"),
    ("CPP", "c++"),
    ("cxx", "c++"),
    ("CXX", "c++"),
    ("c++", "c++"),
    ("C++", "c++"),
    ("m", "objective-c"),
    ("M", "objective-c++"),
    ("mm", "objective-c++"),
    ("sx", "assembler-with-cpp"),
    ("S", "assembler-with-cpp"),
    ("h", "c-header"),
    ("H", "c++-header"),
    ("h++", "c++-header"),
    ("H++", "c++-header"),
    ("hh", "c++-header"),
    ("HH", "c++-header"),
    ("hp", "c++-header"),
    ("HP", "c++-header"),
    ("hpp", "c++-header"),
    ("HPP", "c++-header"),
    ("hxx", "c++-header"),
    ("HXX", "c++-header"),
    ("tcc", "c++-header"),
    ("TCC", "c++-header"),
    ("cu", "cu"),
    ("i", "cpp-output"),
    ("ii", "c++-cpp-output"),
    ("mi", "objc-cpp-output"),
    ("mii", "objc++-cpp-output"),
    ("s", "assembler"),
];

/// Language to its preprocessed form. Also the list of supported languages.
const P_LANGUAGES: &[(&str, &str)] = &[
    ("c", "cpp-output"),
    ("cpp-output", "cpp-output"),
    ("c-header", "c"),
    ("c++", "c++-cpp-output"),
    ("c++-cpp-output", "c++-cpp-output"),
    ("c++-header", "c++"),
    ("objective-c", "objc-cpp-output"),
    ("objective-c-header", "objective-c"),
    ("objc-cpp-output", "objc-cpp-output"),
    ("objective-c++", "objc++-cpp-output"),
    ("objc++-cpp-output", "objc++-cpp-output"),
    ("objective-c++-header", "objective-c++"),
    ("cu", "cpp-output"),
    ("assembler-with-cpp", "assembler"),
    ("assembler", "assembler"),
];

/// Returns the language deduced from `path`'s extension, if known.
pub fn language_for_file(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.')?.1;
    EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

/// Returns the preprocessed form of `language`, if supported.
pub fn p_language_for_language(language: &str) -> Option<&'static str> {
    P_LANGUAGES
        .iter()
        .find(|(l, _)| *l == language)
        .map(|(_, p)| *p)
}

/// Returns the canonical extension (without the dot) for `language`.
pub fn extension_for_language(language: &str) -> Option<&'static str> {
    EXTENSIONS
        .iter()
        .find(|(_, l)| *l == language)
        .map(|(e, _)| *e)
}

/// Returns `true` if `-x language` names something we can cache.
pub fn language_is_supported(language: &str) -> bool {
    p_language_for_language(language).is_some()
}

/// Returns `true` if sources in `language` are already preprocessed.
pub fn language_is_preprocessed(language: &str) -> bool {
    language.ends_with("-cpp-output") || language == "assembler"
}
