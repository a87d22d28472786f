//! Indexable file enumeration with extension allow-list and exclude patterns.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use glob::Pattern;

use crate::error::{IndexError, Result};

/// A file selected for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub abs_path: PathBuf,
    /// Path relative to the project root, `/`-separated.
    pub rel_path: String,
    pub language: String,
}

/// Compiled exclude patterns.
///
/// A pattern ending in `/` excludes every path with a matching directory
/// component. Other patterns are matched against both the basename and the
/// full relative path.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    dirs: Vec<Pattern>,
    paths: Vec<Pattern>,
}

impl ExcludeSet {
    /// # Errors
    ///
    /// Returns [`IndexError::Pattern`] if a pattern is not valid glob syntax.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut set = Self::default();
        for raw in patterns {
            let raw = raw.as_ref().trim();
            if raw.is_empty() {
                continue;
            }
            let compile = |p: &str| {
                Pattern::new(p).map_err(|source| IndexError::Pattern {
                    pattern: raw.to_owned(),
                    source,
                })
            };
            match raw.strip_suffix('/') {
                Some(dir) => set.dirs.push(compile(dir)?),
                None => set.paths.push(compile(raw)?),
            }
        }
        Ok(set)
    }

    /// Whether a directory (relative path) should be skipped entirely.
    #[must_use]
    pub fn is_excluded_dir(&self, rel_dir: &str) -> bool {
        let name = rel_dir.rsplit('/').next().unwrap_or(rel_dir);
        self.dirs.iter().any(|p| p.matches(name)) || self.matches_path(rel_dir, name)
    }

    /// Whether a file (relative path) should be skipped.
    #[must_use]
    pub fn is_excluded(&self, rel_path: &str) -> bool {
        let mut parts: Vec<&str> = rel_path.split('/').collect();
        let name = parts.pop().unwrap_or(rel_path);
        parts
            .iter()
            .any(|dir| self.dirs.iter().any(|p| p.matches(dir)))
            || self.matches_path(rel_path, name)
    }

    fn matches_path(&self, rel_path: &str, name: &str) -> bool {
        self.paths
            .iter()
            .any(|p| p.matches(name) || p.matches(rel_path))
    }
}

/// Enumerates indexable files under a project root.
#[derive(Debug, Clone)]
pub struct SourceSelector {
    /// Lower-cased extension without the dot, mapped to its language tag.
    extensions: HashMap<String, String>,
    excludes: ExcludeSet,
}

impl SourceSelector {
    /// Build a selector from a language → extensions table.
    ///
    /// # Errors
    ///
    /// Returns an error if an exclude pattern is invalid.
    pub fn new<S: AsRef<str>>(
        languages: &BTreeMap<String, Vec<String>>,
        exclude_patterns: &[S],
    ) -> Result<Self> {
        let mut extensions = HashMap::new();
        for (language, exts) in languages {
            for ext in exts {
                let ext = ext.trim_start_matches('.').to_ascii_lowercase();
                extensions.entry(ext).or_insert_with(|| language.clone());
            }
        }
        Ok(Self {
            extensions,
            excludes: ExcludeSet::new(exclude_patterns)?,
        })
    }

    #[must_use]
    pub fn excludes(&self) -> &ExcludeSet {
        &self.excludes
    }

    /// Language tag for `path`, or `None` when its extension is not allowed.
    #[must_use]
    pub fn language_of(&self, path: &Path) -> Option<&str> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.extensions.get(&ext).map(String::as_str)
    }

    /// All selected files under `root`, sorted by relative path.
    #[must_use]
    pub fn select(&self, root: &Path) -> Vec<SourceFile> {
        let mut files: Vec<SourceFile> = walk(root, &self.excludes)
            .into_iter()
            .filter_map(|(abs_path, rel_path)| {
                let language = self.language_of(&abs_path)?.to_owned();
                Some(SourceFile {
                    abs_path,
                    rel_path,
                    language,
                })
            })
            .collect();
        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        tracing::debug!(root = %root.display(), files = files.len(), "source files selected");
        files
    }
}

/// Walk `root` honouring hidden-file and `.gitignore` rules plus `excludes`.
/// Returns `(absolute, relative)` pairs for regular files in walk order.
#[must_use]
pub fn walk(root: &Path, excludes: &ExcludeSet) -> Vec<(PathBuf, String)> {
    let filter_root = root.to_path_buf();
    let filter_excludes = excludes.clone();
    ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .filter_entry(move |entry| {
            if !entry.file_type().is_some_and(|ft| ft.is_dir()) {
                return true;
            }
            let rel = relative(&filter_root, entry.path());
            rel.is_empty() || !filter_excludes.is_excluded_dir(&rel)
        })
        .build()
        .flatten()
        .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
        .filter_map(|e| {
            let rel = relative(root, e.path());
            (!excludes.is_excluded(&rel)).then(|| (e.into_path(), rel))
        })
        .collect()
}

/// `/`-separated path of `path` relative to `root`.
#[must_use]
pub fn relative(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn languages() -> BTreeMap<String, Vec<String>> {
        BTreeMap::from([
            ("python".to_owned(), vec![".py".to_owned()]),
            (
                "javascript".to_owned(),
                vec![".js".to_owned(), ".jsx".to_owned()],
            ),
        ])
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn dir_pattern_matches_any_component() {
        let set = ExcludeSet::new(&["node_modules/"]).unwrap();
        assert!(set.is_excluded("node_modules/react/index.js"));
        assert!(set.is_excluded("web/node_modules/react/index.js"));
        assert!(!set.is_excluded("web/node_modules.js"));
        assert!(set.is_excluded_dir("web/node_modules"));
    }

    #[test]
    fn file_pattern_matches_basename_or_path() {
        let set = ExcludeSet::new(&["*.lock", "docs/*.md"]).unwrap();
        assert!(set.is_excluded("Cargo.lock"));
        assert!(set.is_excluded("sub/yarn.lock"));
        assert!(set.is_excluded("docs/intro.md"));
        assert!(!set.is_excluded("README.md"));
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = ExcludeSet::new(&["[unclosed"]).unwrap_err();
        assert!(matches!(err, IndexError::Pattern { .. }));
    }

    #[test]
    fn select_filters_extensions_and_excludes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app.py", "print('hi')");
        write(dir.path(), "web/index.js", "console.log(1)");
        write(dir.path(), "web/node_modules/lib/index.js", "x");
        write(dir.path(), "README.md", "# readme");
        write(dir.path(), "tests/test_app.py", "assert True");

        let selector = SourceSelector::new(&languages(), &["node_modules/", "test_*"]).unwrap();
        let files = selector.select(dir.path());
        let rels: Vec<_> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["app.py", "web/index.js"]);
        assert_eq!(files[0].language, "python");
        assert_eq!(files[1].language, "javascript");
        assert!(files[1].abs_path.is_absolute() || files[1].abs_path.starts_with(dir.path()));
    }

    #[test]
    fn select_skips_hidden_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".venv/lib/site.py", "x = 1");
        write(dir.path(), "main.py", "x = 1");
        let selector = SourceSelector::new(&languages(), &[] as &[&str]).unwrap();
        let files = selector.select(dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "main.py");
    }

    #[test]
    fn extension_lookup_is_case_insensitive() {
        let selector = SourceSelector::new(&languages(), &[] as &[&str]).unwrap();
        assert_eq!(selector.language_of(Path::new("A.PY")), Some("python"));
        assert_eq!(selector.language_of(Path::new("a.rb")), None);
        assert_eq!(selector.language_of(Path::new("Makefile")), None);
    }

    #[test]
    fn relative_uses_forward_slashes() {
        let root = Path::new("/repo");
        assert_eq!(relative(root, Path::new("/repo/a/b.py")), "a/b.py");
        assert_eq!(relative(root, root), "");
    }
}
