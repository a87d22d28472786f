//! Repository snapshot: summary, file tree, and small text file contents.

use std::collections::BTreeMap;
use std::path::Path;

use kiln_index::ExcludeSet;
use kiln_index::sources::walk;

use crate::error::PipelineError;

/// Files larger than this are listed in the tree but their content is not kept.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoSnapshot {
    pub name: String,
    pub summary: String,
    /// Relative, `/`-separated paths in sorted order.
    pub tree: Vec<String>,
    /// Relative path → UTF-8 content, for files under the size limit.
    pub contents: BTreeMap<String, String>,
}

impl RepoSnapshot {
    #[must_use]
    pub fn content(&self, rel_path: &str) -> Option<&str> {
        self.contents.get(rel_path).map(String::as_str)
    }
}

pub trait RepoIngest: Send + Sync {
    /// # Errors
    ///
    /// Returns [`PipelineError::Ingest`] if the root cannot be read.
    fn ingest(&self, root: &Path) -> Result<RepoSnapshot, PipelineError>;
}

/// Walks a local directory honouring `.gitignore` and exclude patterns.
#[derive(Debug, Clone)]
pub struct LocalIngest {
    excludes: ExcludeSet,
    max_file_bytes: u64,
}

impl LocalIngest {
    #[must_use]
    pub fn new(excludes: ExcludeSet) -> Self {
        Self {
            excludes,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }

    #[must_use]
    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }
}

impl RepoIngest for LocalIngest {
    fn ingest(&self, root: &Path) -> Result<RepoSnapshot, PipelineError> {
        if !root.is_dir() {
            return Err(PipelineError::Ingest(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let name = kiln_index::project_name(root);

        let mut files = walk(root, &self.excludes);
        files.sort_by(|a, b| a.1.cmp(&b.1));

        let mut tree = Vec::with_capacity(files.len());
        let mut contents = BTreeMap::new();
        let mut total_chars = 0usize;
        for (abs, rel) in files {
            tree.push(rel.clone());
            let small = std::fs::metadata(&abs).is_ok_and(|m| m.len() <= self.max_file_bytes);
            if !small {
                continue;
            }
            if let Ok(text) = std::fs::read_to_string(&abs) {
                total_chars += text.chars().count();
                contents.insert(rel, text);
            }
        }

        let summary = format!(
            "Repository: {name}\nFiles analyzed: {}\nText files read: {}\nEstimated tokens: {}",
            tree.len(),
            contents.len(),
            format_tokens(total_chars / 4),
        );
        tracing::debug!(root = %root.display(), files = tree.len(), "repository ingested");

        Ok(RepoSnapshot {
            name,
            summary,
            tree,
            contents,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_tokens(n: usize) -> String {
    match n {
        0..1_000 => n.to_string(),
        1_000..1_000_000 => format!("{:.1}k", n as f64 / 1_000.0),
        _ => format!("{:.1}M", n as f64 / 1_000_000.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn snapshot_lists_tree_and_contents() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "requirements.txt", "flask==3.0\n");
        write(dir.path(), "frontend/package.json", "{\"name\": \"web\"}");
        write(dir.path(), "frontend/node_modules/left-pad/index.js", "module.exports = 1;");

        let ingest = LocalIngest::new(ExcludeSet::new(&["node_modules/"]).unwrap());
        let snap = ingest.ingest(dir.path()).unwrap();

        assert_eq!(snap.tree, vec!["frontend/package.json", "requirements.txt"]);
        assert_eq!(snap.content("requirements.txt"), Some("flask==3.0\n"));
        assert!(snap.summary.contains("Files analyzed: 2"));
        assert_eq!(snap.name, kiln_index::project_name(dir.path()));
    }

    #[test]
    fn large_files_are_listed_without_content() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "big.sql", &"x".repeat(200));
        write(dir.path(), "go.mod", "module example.com/api\n");
        let ingest = LocalIngest::new(ExcludeSet::default()).with_max_file_bytes(100);
        let snap = ingest.ingest(dir.path()).unwrap();
        assert_eq!(snap.tree, vec!["big.sql", "go.mod"]);
        assert!(snap.content("big.sql").is_none());
        assert!(snap.content("go.mod").is_some());
    }

    #[test]
    fn missing_root_is_ingest_error() {
        let ingest = LocalIngest::new(ExcludeSet::default());
        let err = ingest.ingest(Path::new("/no/such/repo")).unwrap_err();
        assert!(matches!(err, PipelineError::Ingest(_)));
    }

    #[test]
    fn token_estimate_formatting() {
        assert_eq!(format_tokens(999), "999");
        assert_eq!(format_tokens(12_500), "12.5k");
        assert_eq!(format_tokens(3_000_000), "3.0M");
    }
}
