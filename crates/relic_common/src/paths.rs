//! Path rewriting against a configured base directory.
//!
//! Build trees often live under per-user absolute paths. Rewriting paths
//! under the base directory to be relative to the working directory makes
//! cache keys identical across such trees, so users can share entries.

use std::path::{Component, Path, PathBuf};

/// Rewrites absolute paths under a base directory to relative form.
pub struct PathRewriter {
    base_dir: Option<PathBuf>,
    cwd: PathBuf,
}

impl PathRewriter {
    /// Creates a rewriter for the given base directory and working directory.
    ///
    /// `cwd` should already be in canonical form; `base_dir` of `None`
    /// disables rewriting entirely.
    pub fn new(base_dir: Option<PathBuf>, cwd: PathBuf) -> Self {
        Self { base_dir, cwd }
    }

    /// Returns the configured base directory, if any.
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Returns the working directory paths are made relative to.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Returns `true` if `path` is absolute and under the base directory.
    pub fn applies_to(&self, path: &Path) -> bool {
        match &self.base_dir {
            Some(base) => path.is_absolute() && path.starts_with(base),
            None => false,
        }
    }

    /// Rewrites `path` relative to the working directory if it lies under
    /// the base directory; otherwise returns it unchanged.
    ///
    /// Nonexistent paths are resolved by canonicalizing the nearest existing
    /// ancestor and re-appending the remaining components.
    pub fn rewrite(&self, path: &str) -> String {
        let p = Path::new(path);
        if !self.applies_to(p) {
            return path.to_string();
        }

        let (existing, suffix) = split_at_existing_ancestor(p);
        let canon = match existing.canonicalize() {
            Ok(c) => c,
            // Nothing along the path exists; leave it alone.
            Err(_) => return path.to_string(),
        };

        let mut rel = relative_path(&self.cwd, &canon);
        if let Some(suffix) = suffix {
            rel = rel.join(suffix);
        }
        rel.to_string_lossy().into_owned()
    }
}

/// Splits `path` into its nearest existing ancestor and the nonexistent
/// remainder (if any).
fn split_at_existing_ancestor(path: &Path) -> (PathBuf, Option<PathBuf>) {
    if path.exists() {
        return (path.to_path_buf(), None);
    }
    let mut dir = path.to_path_buf();
    let mut suffix = PathBuf::new();
    while let Some(parent) = dir.parent() {
        let tail = dir
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_default();
        suffix = tail.join(&suffix);
        dir = parent.to_path_buf();
        if dir.exists() {
            break;
        }
    }
    // Trailing empty component from the join above is harmless; normalize it
    // away by rebuilding from components.
    let suffix: PathBuf = suffix.components().collect();
    (dir, Some(suffix))
}

/// Computes a relative path from `from` to `to`, both absolute.
fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from_parts: Vec<Component> = from.components().collect();
    let to_parts: Vec<Component> = to.components().collect();

    let common = from_parts
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..from_parts.len() {
        rel.push("..");
    }
    for part in &to_parts[common..] {
        rel.push(part);
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}

/// Returns `true` if `path` names a precompiled (or pretokenized) header.
///
/// Matches the `.gch`, `.pch` and `.pth` extensions as well as files placed
/// inside a `<header>.gch/` directory.
pub fn is_precompiled_header(path: &Path) -> bool {
    let ext_matches = |p: &Path| {
        matches!(
            p.extension().and_then(|e| e.to_str()),
            Some("gch") | Some("pch") | Some("pth")
        )
    };
    if ext_matches(path) {
        return true;
    }
    match path.parent() {
        Some(dir) => {
            dir.extension().and_then(|e| e.to_str()) == Some("gch")
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_base_dir_returns_unchanged() {
        let rw = PathRewriter::new(None, PathBuf::from("/work"));
        assert_eq!(rw.rewrite("/home/user/src/a.c"), "/home/user/src/a.c");
    }

    #[test]
    fn path_outside_base_dir_returns_unchanged() {
        let rw = PathRewriter::new(Some(PathBuf::from("/home/user")), PathBuf::from("/work"));
        assert_eq!(rw.rewrite("/opt/include/x.h"), "/opt/include/x.h");
    }

    #[test]
    fn relative_input_returns_unchanged() {
        let rw = PathRewriter::new(Some(PathBuf::from("/home/user")), PathBuf::from("/work"));
        assert_eq!(rw.rewrite("src/a.c"), "src/a.c");
    }

    #[test]
    fn rewrites_existing_path_under_base() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let cwd = base.join("build");
        let src = base.join("src");
        std::fs::create_dir_all(&cwd).unwrap();
        std::fs::create_dir_all(&src).unwrap();
        let file = src.join("a.c");
        std::fs::write(&file, "int x;").unwrap();

        let rw = PathRewriter::new(Some(base), cwd);
        let rel = rw.rewrite(file.to_str().unwrap());
        assert_eq!(rel, "../src/a.c");
    }

    #[test]
    fn rewrites_nonexistent_path_via_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let cwd = base.join("build");
        std::fs::create_dir_all(&cwd).unwrap();

        let missing = base.join("out/obj/a.o");
        let rw = PathRewriter::new(Some(base), cwd);
        let rel = rw.rewrite(missing.to_str().unwrap());
        assert_eq!(rel, "../out/obj/a.o");
    }

    #[test]
    fn path_equal_to_cwd_becomes_dot() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let rw = PathRewriter::new(Some(base.clone()), base.clone());
        assert_eq!(rw.rewrite(base.to_str().unwrap()), ".");
    }

    #[test]
    fn resolves_symlinked_components() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let real = base.join("real");
        std::fs::create_dir_all(&real).unwrap();
        let link = base.join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        std::fs::write(real.join("a.h"), "").unwrap();

        let rw = PathRewriter::new(Some(base.clone()), base);
        let rel = rw.rewrite(link.join("a.h").to_str().unwrap());
        assert_eq!(rel, "real/a.h");
    }

    #[test]
    fn pch_extensions() {
        assert!(is_precompiled_header(Path::new("foo.h.gch")));
        assert!(is_precompiled_header(Path::new("foo.pch")));
        assert!(is_precompiled_header(Path::new("foo.pth")));
        assert!(is_precompiled_header(Path::new("dir/foo.h.gch/c++")));
        assert!(!is_precompiled_header(Path::new("foo.h")));
        assert!(!is_precompiled_header(Path::new("foo.o")));
    }
}
