//! Preprocessor-output scanning and include-file bookkeeping.
//!
//! The scanner hashes preprocessed source while replacing every linemarker
//! path with its rewritten (base-dir-relative) form, and records each
//! referenced include file's content digest for the manifest.

use std::path::Path;

use log::debug;
use relic_common::{hash_file, is_precompiled_header, Digest, DigestHasher, IncludeSet, PathRewriter};
use relic_config::{Config, Sloppiness};

use crate::hashutil::hash_source_buffer;

/// Why scanning aborted the whole cache attempt.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// An assembler `.incbin` directive references a file the cache cannot
    /// track.
    #[error("unsupported .incbin directive in source")]
    UnsupportedDirective,

    /// The preprocessor output could not be parsed.
    #[error("failed to parse preprocessed output")]
    Parse,
}

/// State threaded through one compilation's include scanning.
pub struct IncludeScanner<'a> {
    /// Mutable: include anomalies degrade direct mode.
    pub config: &'a mut Config,
    /// Rewrites linemarker paths.
    pub rewriter: &'a PathRewriter,
    /// The input file, which is never recorded as its own include.
    pub input_file: &'a str,
    /// The `-include`d precompiled header, if any.
    pub included_pch_file: Option<&'a str>,
    /// Compilation start time, for the write-race checks.
    pub time_of_compilation: i64,
    /// Include-path prefixes exempt from manifest tracking.
    pub ignore_headers: Vec<String>,
    /// Output: every include file seen, with its content digest.
    pub included: IncludeSet,
    /// Output: whether any include path was absolute (drives dependency
    /// file rewriting).
    pub has_absolute_include_headers: bool,
}

impl<'a> IncludeScanner<'a> {
    /// Creates a scanner with empty outputs.
    pub fn new(
        config: &'a mut Config,
        rewriter: &'a PathRewriter,
        input_file: &'a str,
        included_pch_file: Option<&'a str>,
        time_of_compilation: i64,
    ) -> Self {
        let ignore_headers = config.ignore_headers_in_manifest.clone();
        Self {
            config,
            rewriter,
            input_file,
            included_pch_file,
            time_of_compilation,
            ignore_headers,
            included: IncludeSet::new(),
            has_absolute_include_headers: false,
        }
    }

    fn ignored(&self, path: &str) -> bool {
        let canonical = path.strip_prefix("./").unwrap_or(path);
        self.ignore_headers.iter().any(|prefix| {
            canonical == prefix.as_str()
                || (prefix.ends_with('/') && canonical.starts_with(prefix.as_str()))
                || canonical
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    fn disable_direct_mode(&mut self, path: &str, reason: &str) {
        if self.config.direct_mode {
            debug!("include file {path} {reason}; disabling direct mode");
            self.config.direct_mode = false;
        }
    }

    /// Records one include file: hashes its content into the include set
    /// and, for precompiled headers, into the preprocessor hash as well.
    /// With `record_digest`, each file's digest is additionally mixed into
    /// `cpp_hasher` (the depend-mode key accumulation).
    ///
    /// Anything that makes the file untrackable (write races, non-regular
    /// files, temporal macros) degrades the invocation to preprocessor
    /// mode instead of failing it.
    pub fn remember_include_file(
        &mut self,
        path: String,
        cpp_hasher: &mut DigestHasher,
        system: bool,
        record_digest: bool,
    ) {
        if path.len() >= 2 && path.starts_with('<') && path.ends_with('>') {
            // Typically <built-in> or <command-line>.
            return;
        }
        if path == self.input_file {
            return;
        }
        if system
            && (self.config.sloppiness.has(Sloppiness::SYSTEM_HEADERS)
                || self.config.sloppiness.has(Sloppiness::NO_SYSTEM_HEADERS))
        {
            return;
        }
        if self.included.contains_key(&path) {
            return;
        }
        if self.ignored(&path) {
            return;
        }

        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(_) => {
                self.disable_direct_mode(&path, "cannot be statted");
                return;
            }
        };
        if meta.is_dir() {
            // Typically $PWD appearing in -g linemarkers.
            return;
        }
        if !meta.is_file() {
            self.disable_direct_mode(&path, "is not a regular file");
            return;
        }

        {
            use std::os::unix::fs::MetadataExt;
            // >= is intentional: a file written within the same second as
            // the compilation started may change again without the
            // timestamp moving.
            if !self.config.sloppiness.has(Sloppiness::INCLUDE_FILE_MTIME)
                && meta.mtime() >= self.time_of_compilation
            {
                self.disable_direct_mode(&path, "is too new");
                return;
            }
            if !self.config.sloppiness.has(Sloppiness::INCLUDE_FILE_CTIME)
                && meta.ctime() >= self.time_of_compilation
            {
                self.disable_direct_mode(&path, "has a too new ctime");
                return;
            }
        }

        let mut file_hasher = DigestHasher::new();
        let is_pch = is_precompiled_header(Path::new(&path));
        if is_pch {
            if self.included_pch_file.is_none() {
                debug!("detected use of precompiled header: {path}");
            }
            let mut hashed_path = path.clone();
            let mut using_pch_sum = false;
            if self.config.pch_external_checksum {
                // Hash <pch>.sum instead of a very large PCH when present.
                let sum_path = format!("{path}.sum");
                if Path::new(&sum_path).is_file() {
                    hashed_path = sum_path;
                    using_pch_sum = true;
                }
            }
            if hash_file(&mut file_hasher, Path::new(&hashed_path)).is_err() {
                self.disable_direct_mode(&path, "cannot be read");
                return;
            }
            // Two different PCHs must never produce the same key.
            cpp_hasher.delimiter(if using_pch_sum { "pch_sum_hash" } else { "pch_hash" });
            cpp_hasher.update_str(&file_hasher.finish().to_string());
        }

        if self.config.direct_mode {
            if !is_pch {
                let data = match std::fs::read(&path) {
                    Ok(data) => data,
                    Err(_) => {
                        self.disable_direct_mode(&path, "cannot be read");
                        return;
                    }
                };
                let flags = hash_source_buffer(self.config, &mut file_hasher, &data);
                if flags.error || flags.temporal() {
                    self.disable_direct_mode(&path, "contains a temporal macro");
                    return;
                }
            }

            let digest = file_hasher.finish();
            if record_digest {
                cpp_hasher.delimiter("include");
                cpp_hasher.update_str(&digest.to_string());
            }
            self.included.insert(path, digest);
        }
    }

    /// Hashes preprocessed source, replacing linemarker paths with their
    /// rewritten forms and recording every referenced include file.
    ///
    /// `pump` skips distcc-pump banner lines instead of hashing them.
    pub fn process_preprocessed_output(
        &mut self,
        hasher: &mut DigestHasher,
        mut data: Vec<u8>,
        pump: bool,
    ) -> Result<(), ScanError> {
        let cwd = self.rewriter.cwd().to_string_lossy().into_owned();

        let end = data.len();
        let mut p = 0; // Start of the pending unhashed region.
        let mut q = 0; // Scan position.

        // At least "# 1 \"x\"" must fit for a linemarker to be possible.
        while q < end.saturating_sub(7) {
            let at_line_start = q == 0 || data[q - 1] == b'\n';
            let is_marker = data[q] == b'#'
                && at_line_start
                && ((data[q + 1] == b' ' && data[q + 2].is_ascii_digit())
                    || (data[q + 1] == b'p'
                        && data[q + 2..].starts_with(b"ragma GCC pch_preprocess "))
                    || data[q + 1..].starts_with(b"line "));

            if is_marker {
                // gcc-6 linemarker bugs around "<command-line>".
                if data[q + 2] == b'3' {
                    if data[q..].starts_with(b"# 31 \"<command-line>\"\n") {
                        // Bogus extra line: drop it entirely.
                        hasher.update(&data[p..q]);
                        while q < end && data[q] != b'\n' {
                            q += 1;
                        }
                        q += 1;
                        p = q;
                        continue;
                    } else if data[q..].starts_with(b"# 32 \"<command-line>\" 2\n") {
                        // Wrong line number where "# 1" belongs.
                        hasher.update(&data[p..q]);
                        q += 1;
                        data[q] = b'#';
                        data[q + 1] = b' ';
                        data[q + 2] = b'1';
                        p = q;
                    }
                }

                while q < end && data[q] != b'"' && data[q] != b'\n' {
                    q += 1;
                }
                if q < end && data[q] == b'\n' {
                    // No quoted path on this line.
                    continue;
                }
                q += 1;
                if q >= end {
                    debug!("failed to parse included file path");
                    return Err(ScanError::Parse);
                }

                // q is at the start of the include path.
                hasher.update(&data[p..q]);
                p = q;
                while q < end && data[q] != b'"' {
                    q += 1;
                }

                // Trailing linemarker flags; 3 marks a system header.
                let mut system = false;
                let mut r = q + 1;
                while r < end && data[r] != b'\n' {
                    if data[r] == b'3' {
                        system = true;
                    }
                    r += 1;
                }

                let raw_path = String::from_utf8_lossy(&data[p..q]).into_owned();
                if !self.has_absolute_include_headers {
                    self.has_absolute_include_headers = raw_path.starts_with('/');
                }
                let inc_path = self.rewriter.rewrite(&raw_path);

                // With -g gcc emits "# 1 \"CWD//\""; honor the opt-out from
                // hashing the working directory.
                let hash_inc_path = self.config.hash_dir
                    || !(inc_path.starts_with(cwd.as_str()) && inc_path.ends_with("//"));
                if hash_inc_path {
                    hasher.update_str(&inc_path);
                }

                self.remember_include_file(inc_path, hasher, system, false);
                p = q;
            } else if data[q..].starts_with(b".incbin") {
                // The referenced blob cannot be tracked.
                debug!("found unsupported .incbin directive in source");
                return Err(ScanError::UnsupportedDirective);
            } else if pump && data[q..].starts_with(b"_________") {
                // distcc-pump wrapper banners on stdout.
                while q < end && data[q] != b'\n' {
                    q += 1;
                }
                if q < end {
                    q += 1;
                }
                p = q;
            } else {
                q += 1;
            }
        }

        hasher.update(&data[p..end]);

        // Clang does not mention an -include'd PCH in its preprocessed
        // output, so record it explicitly.
        if let Some(pch) = self.included_pch_file {
            let pch_path = self.rewriter.rewrite(pch);
            hasher.update_str(&pch_path);
            self.remember_include_file(pch_path, hasher, false, false);
        }

        Ok(())
    }

    /// Derives a result key from a compiler-written dependency file: every
    /// listed path is recorded as an include and mixed into `hasher`.
    pub fn result_key_from_depfile(
        &mut self,
        depfile: &Path,
        hasher: &mut DigestHasher,
    ) -> Option<Digest> {
        let content = match std::fs::read_to_string(depfile) {
            Ok(content) => content,
            Err(err) => {
                debug!("cannot read dependency file {}: {err}", depfile.display());
                return None;
            }
        };

        for token in content.split_whitespace() {
            if token.ends_with(':') || token == "\\" {
                continue;
            }
            if !self.has_absolute_include_headers {
                self.has_absolute_include_headers = token.starts_with('/');
            }
            let path = self.rewriter.rewrite(token);
            self.remember_include_file(path, hasher, false, true);
        }

        if let Some(pch) = self.included_pch_file {
            let pch_path = self.rewriter.rewrite(pch);
            hasher.update_str(&pch_path);
            self.remember_include_file(pch_path, hasher, false, false);
        }

        Some(hasher.finish())
    }
}

/// Rewrites absolute base-dir paths in a dependency file to relative form.
pub fn use_relative_paths_in_depfile(
    depfile: &Path,
    rewriter: &PathRewriter,
    has_absolute_include_headers: bool,
) {
    if rewriter.base_dir().is_none() {
        return;
    }
    if !has_absolute_include_headers {
        return;
    }

    let content = match std::fs::read_to_string(depfile) {
        Ok(content) => content,
        Err(err) => {
            debug!("cannot open dependency file {}: {err}", depfile.display());
            return;
        }
    };

    let mut changed = false;
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        let mut first = true;
        for token in line.split([' ', '\t']) {
            if !first {
                out.push(' ');
            }
            first = false;
            if token.starts_with('/') && rewriter.applies_to(Path::new(token)) {
                let rel = rewriter.rewrite(token);
                if rel != token {
                    changed = true;
                }
                out.push_str(&rel);
            } else {
                out.push_str(token);
            }
        }
        out.push('\n');
    }

    if changed {
        let tmp = depfile.with_extension("tmp");
        if std::fs::write(&tmp, out).is_ok() {
            if std::fs::rename(&tmp, depfile).is_err() {
                let _ = std::fs::remove_file(&tmp);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        config: Config,
        rewriter: PathRewriter,
        input: String,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().canonicalize().unwrap();
            let input = root.join("a.c").to_string_lossy().into_owned();
            std::fs::write(&input, "int main;\n").unwrap();
            Self {
                _dir: dir,
                rewriter: PathRewriter::new(None, root.clone()),
                root,
                config: Config::default(),
                input,
            }
        }

        fn header(&self, name: &str, content: &str) -> String {
            let path = self.root.join(name);
            std::fs::write(&path, content).unwrap();
            path.to_string_lossy().into_owned()
        }

        fn scan(&mut self, text: &str) -> (Result<(), ScanError>, IncludeSet, Digest) {
            let mut scanner = IncludeScanner::new(
                &mut self.config,
                &self.rewriter,
                &self.input,
                None,
                i64::MAX,
            );
            let mut hasher = DigestHasher::new();
            let result =
                scanner.process_preprocessed_output(&mut hasher, text.as_bytes().to_vec(), false);
            (result, scanner.included, hasher.finish())
        }
    }

    #[test]
    fn records_linemarker_includes() {
        let mut f = Fixture::new();
        let header = f.header("a.h", "#define A 1\n");
        let text = format!("# 1 \"{header}\"\nint a;\n");
        let (result, included, _) = f.scan(&text);
        result.unwrap();
        assert!(included.contains_key(&header));
        assert!(f.config.direct_mode);
    }

    #[test]
    fn input_file_is_not_recorded() {
        let mut f = Fixture::new();
        let input = f.input.clone();
        let text = format!("# 1 \"{input}\"\nint a;\n");
        let (result, included, _) = f.scan(&text);
        result.unwrap();
        assert!(included.is_empty());
        assert!(f.config.direct_mode);
    }

    #[test]
    fn builtin_markers_are_ignored() {
        let mut f = Fixture::new();
        let text = "# 1 \"<built-in>\"\n# 1 \"<command-line>\"\nint a;\n";
        let (result, included, _) = f.scan(text);
        result.unwrap();
        assert!(included.is_empty());
        assert!(f.config.direct_mode);
    }

    #[test]
    fn missing_include_disables_direct_mode() {
        let mut f = Fixture::new();
        let text = "# 1 \"/no/such/header.h\"\nint a;\n";
        let (result, included, _) = f.scan(text);
        result.unwrap();
        assert!(included.is_empty());
        assert!(!f.config.direct_mode);
    }

    #[test]
    fn hash_reflects_content_and_paths() {
        let mut f = Fixture::new();
        let header = f.header("a.h", "#define A 1\n");

        let (_, _, h1) = f.scan(&format!("# 1 \"{header}\"\nint a;\n"));
        let (_, _, h2) = f.scan(&format!("# 1 \"{header}\"\nint a;\n"));
        assert_eq!(h1, h2, "scanning is deterministic");

        let (_, _, h3) = f.scan(&format!("# 1 \"{header}\"\nint b;\n"));
        assert_ne!(h1, h3, "content changes the hash");
    }

    #[test]
    fn base_dir_makes_hash_portable() {
        // Two trees with identical content under different roots must hash
        // identically once the base dir is applied.
        let mut digests = Vec::new();
        for _ in 0..2 {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().canonicalize().unwrap();
            let input = root.join("a.c").to_string_lossy().into_owned();
            std::fs::write(&input, "int main;\n").unwrap();
            let header = root.join("a.h");
            std::fs::write(&header, "#define A 1\n").unwrap();

            let mut config = Config::default();
            let rewriter = PathRewriter::new(Some(root.clone()), root.clone());
            let mut scanner =
                IncludeScanner::new(&mut config, &rewriter, &input, None, i64::MAX);
            let mut hasher = DigestHasher::new();
            let text = format!("# 1 \"{}\"\nint a;\n", header.display());
            scanner
                .process_preprocessed_output(&mut hasher, text.into_bytes(), false)
                .unwrap();
            digests.push(hasher.finish());
        }
        assert_eq!(digests[0], digests[1]);
    }

    #[test]
    fn gcc6_spurious_line_31_is_skipped() {
        let mut f = Fixture::new();
        let with_bug = "# 1 \"<command-line>\"\n# 31 \"<command-line>\"\nint a;\n";
        let without_bug = "# 1 \"<command-line>\"\nint a;\n";
        let (r1, _, h1) = f.scan(with_bug);
        let (r2, _, h2) = f.scan(without_bug);
        r1.unwrap();
        r2.unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn gcc6_line_32_is_rewritten_to_one() {
        let mut f = Fixture::new();
        let with_bug = "# 32 \"<command-line>\" 2\nint a;\n";
        let fixed = "# 1 \"<command-line>\" 2\nint a;\n";
        let (r1, _, h1) = f.scan(with_bug);
        let (r2, _, h2) = f.scan(fixed);
        r1.unwrap();
        r2.unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn incbin_aborts_caching() {
        let mut f = Fixture::new();
        let text = "int a;\n__asm__(\".incbin \\\"blob.bin\\\"\");\n";
        let (result, _, _) = f.scan(text);
        assert!(matches!(result, Err(ScanError::UnsupportedDirective)));
    }

    #[test]
    fn pump_banners_are_skipped() {
        let mut f = Fixture::new();
        let banner = "__________Using distcc-pump from /usr/bin\nint a;\n";
        let mut scanner = IncludeScanner::new(
            &mut f.config,
            &f.rewriter,
            &f.input,
            None,
            i64::MAX,
        );
        let mut hasher = DigestHasher::new();
        scanner
            .process_preprocessed_output(&mut hasher, banner.as_bytes().to_vec(), true)
            .unwrap();
        let with_banner = hasher.finish();

        let mut scanner = IncludeScanner::new(
            &mut f.config,
            &f.rewriter,
            &f.input,
            None,
            i64::MAX,
        );
        let mut hasher = DigestHasher::new();
        scanner
            .process_preprocessed_output(&mut hasher, b"int a;\n".to_vec(), true)
            .unwrap();
        assert_eq!(with_banner, hasher.finish());
    }

    #[test]
    fn system_header_flag_respects_sloppiness() {
        let mut f = Fixture::new();
        let header = f.header("sys.h", "#define SYS 1\n");

        let text = format!("# 1 \"{header}\" 3\nint a;\n");
        let (_, included, _) = f.scan(&text);
        assert!(included.contains_key(&header), "tracked by default");

        f.config.sloppiness = Sloppiness::parse("no_system_headers");
        let (_, included, _) = f.scan(&text);
        assert!(included.is_empty(), "untracked with no_system_headers");
    }

    #[test]
    fn ignore_headers_prefix_list() {
        let mut f = Fixture::new();
        let header = f.header("gen.h", "#define G 1\n");
        f.config.ignore_headers_in_manifest = vec![header.clone()];
        let text = format!("# 1 \"{header}\"\nint a;\n");
        let (_, included, _) = f.scan(&text);
        assert!(included.is_empty());
        assert!(f.config.direct_mode, "ignored headers are not an anomaly");
    }

    #[test]
    fn too_new_include_disables_direct_mode() {
        let mut f = Fixture::new();
        let header = f.header("fresh.h", "#define F 1\n");
        let text = format!("# 1 \"{header}\"\nint a;\n");

        let mut scanner =
            IncludeScanner::new(&mut f.config, &f.rewriter, &f.input, None, 1_000);
        let mut hasher = DigestHasher::new();
        scanner
            .process_preprocessed_output(&mut hasher, text.into_bytes(), false)
            .unwrap();
        assert!(!scanner.config.direct_mode);
        assert!(scanner.included.is_empty());
    }

    #[test]
    fn temporal_macro_in_header_disables_direct_mode() {
        let mut f = Fixture::new();
        let header = f.header("t.h", "#define NOW __TIME__\n");
        let text = format!("# 1 \"{header}\"\nint a;\n");
        let (result, included, _) = f.scan(&text);
        result.unwrap();
        assert!(included.is_empty());
        assert!(!f.config.direct_mode);
    }

    #[test]
    fn pch_content_perturbs_cpp_hash() {
        let mut f = Fixture::new();
        f.config.sloppiness = Sloppiness::parse("time_macros,pch_defines");
        let pch = f.header("all.h.gch", "pch binary one");

        let hash_with_pch = |f: &mut Fixture, content: &str| {
            std::fs::write(&pch, content).unwrap();
            let input = f.input.clone();
            let mut scanner = IncludeScanner::new(
                &mut f.config,
                &f.rewriter,
                &input,
                Some(&pch),
                i64::MAX,
            );
            let mut hasher = DigestHasher::new();
            scanner
                .process_preprocessed_output(&mut hasher, b"int a;\n".to_vec(), false)
                .unwrap();
            hasher.finish()
        };

        let h1 = hash_with_pch(&mut f, "pch binary one");
        let h2 = hash_with_pch(&mut f, "pch binary two");
        assert_ne!(h1, h2);
    }

    #[test]
    fn pch_sum_file_used_when_enabled() {
        let mut f = Fixture::new();
        f.config.sloppiness = Sloppiness::parse("time_macros");
        f.config.pch_external_checksum = true;
        let pch = f.header("all.h.gch", "giant pch blob");
        f.header("all.h.gch.sum", "checksum-v1");

        let input = f.input.clone();
        let mut scanner = IncludeScanner::new(
            &mut f.config,
            &f.rewriter,
            &input,
            Some(&pch),
            i64::MAX,
        );
        let mut hasher = DigestHasher::new();
        scanner
            .process_preprocessed_output(&mut hasher, b"int a;\n".to_vec(), false)
            .unwrap();
        let with_sum = hasher.finish();

        // Changing the PCH itself without changing the sum keeps the hash.
        std::fs::write(&pch, "different giant pch blob").unwrap();
        let mut scanner = IncludeScanner::new(
            &mut f.config,
            &f.rewriter,
            &input,
            Some(&pch),
            i64::MAX,
        );
        let mut hasher = DigestHasher::new();
        scanner
            .process_preprocessed_output(&mut hasher, b"int a;\n".to_vec(), false)
            .unwrap();
        assert_eq!(with_sum, hasher.finish());
    }

    #[test]
    fn depfile_result_key() {
        let mut f = Fixture::new();
        let header = f.header("a.h", "#define A 1\n");
        let dep = f.root.join("a.d");
        std::fs::write(&dep, format!("a.o: {} \\\n {header}\n", f.input)).unwrap();

        let input = f.input.clone();
        let mut scanner =
            IncludeScanner::new(&mut f.config, &f.rewriter, &input, None, i64::MAX);
        let mut hasher = DigestHasher::new();
        let key = scanner.result_key_from_depfile(&dep, &mut hasher).unwrap();
        assert!(scanner.included.contains_key(&header));

        // A different header content yields a different key.
        f.header("a.h", "#define A 2\n");
        let mut scanner =
            IncludeScanner::new(&mut f.config, &f.rewriter, &input, None, i64::MAX);
        let mut hasher = DigestHasher::new();
        let key2 = scanner.result_key_from_depfile(&dep, &mut hasher).unwrap();
        assert_ne!(key, key2);
    }

    #[test]
    fn depfile_rewriting_to_relative() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let header = root.join("inc").join("a.h");
        std::fs::create_dir_all(header.parent().unwrap()).unwrap();
        std::fs::write(&header, "").unwrap();

        let dep = root.join("a.d");
        std::fs::write(&dep, format!("a.o: {}\n", header.display())).unwrap();

        let rewriter = PathRewriter::new(Some(root.clone()), root.clone());
        use_relative_paths_in_depfile(&dep, &rewriter, true);

        let rewritten = std::fs::read_to_string(&dep).unwrap();
        assert_eq!(rewritten, "a.o: inc/a.h\n");
    }
}
