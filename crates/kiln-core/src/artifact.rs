//! Generated files and writing them under the output folder.

use std::path::{Path, PathBuf};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PerService,
    Aggregate,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::PerService => "per-service",
            Self::Aggregate => "aggregate",
        })
    }
}

/// A generated file, addressed relative to the output folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub content: String,
    pub stage: Stage,
    /// Path of the owning service for per-service artifacts. Paths are
    /// unique within a repository; names are not.
    pub service_path: Option<String>,
}

/// Path of a service's artifact relative to the output folder.
#[must_use]
pub fn service_artifact_path(service_path: &str, file_name: &str) -> PathBuf {
    if service_path.is_empty() {
        PathBuf::from(file_name)
    } else {
        Path::new(service_path).join(file_name)
    }
}

/// Writes artifacts below one output directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
}

impl ArtifactWriter {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn destination(&self, rel: &Path) -> PathBuf {
        self.root.join(rel)
    }

    /// Whether a file already exists at `rel` under the output folder.
    pub async fn exists(&self, rel: &Path) -> bool {
        tokio::fs::try_exists(self.destination(rel))
            .await
            .unwrap_or(false)
    }

    /// Write one artifact, creating parent directories. The file always ends
    /// with a newline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Write`] if a directory or the file cannot be
    /// written.
    pub async fn write(&self, artifact: &Artifact) -> Result<PathBuf, PipelineError> {
        let dest = self.destination(&artifact.path);
        let write_err = |source| PipelineError::Write {
            path: dest.clone(),
            source,
        };
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let mut content = artifact.content.clone();
        if !content.ends_with('\n') {
            content.push_str(if content.contains("\r\n") { "\r\n" } else { "\n" });
        }
        tokio::fs::write(&dest, content).await.map_err(write_err)?;
        tracing::info!(path = %dest.display(), stage = %artifact.stage, "artifact written");
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(path: &str, content: &str) -> Artifact {
        Artifact {
            path: PathBuf::from(path),
            content: content.into(),
            stage: Stage::PerService,
            service_path: Some("api".into()),
        }
    }

    #[test]
    fn service_paths() {
        assert_eq!(service_artifact_path("", "Dockerfile"), Path::new("Dockerfile"));
        assert_eq!(
            service_artifact_path("services/api", "Dockerfile"),
            Path::new("services/api/Dockerfile")
        );
    }

    #[tokio::test]
    async fn write_creates_parents_and_terminates_with_newline() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("infra"));
        let dest = writer
            .write(&artifact("frontend/Dockerfile", "FROM node:20-alpine"))
            .await
            .unwrap();
        assert_eq!(dest, dir.path().join("infra/frontend/Dockerfile"));
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "FROM node:20-alpine\n");
        assert!(writer.exists(Path::new("frontend/Dockerfile")).await);
        assert!(!writer.exists(Path::new("Dockerfile")).await);
    }

    #[tokio::test]
    async fn write_terminates_crlf_content_with_crlf() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        let dest = writer
            .write(&artifact("Dockerfile", "FROM alpine:3.20\r\nCMD [\"sh\"]"))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(&dest).unwrap(),
            "FROM alpine:3.20\r\nCMD [\"sh\"]\r\n"
        );
    }

    #[tokio::test]
    async fn write_failure_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("infra");
        std::fs::write(&blocker, "not a directory").unwrap();
        let writer = ArtifactWriter::new(&blocker);
        let err = writer
            .write(&artifact("api/Dockerfile", "FROM scratch"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Write { ref path, .. } if path.ends_with("api/Dockerfile")
        ));
    }
}
