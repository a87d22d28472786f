//! Project-level facade over a [`VectorStore`]: one collection per project.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::vector_store::{Payload, StoredRecord, VectorRecord, VectorStore, VectorStoreError};

const PROJECT_ROOT_KEY: &str = "project_root";
const INDEX_COMPLETE_KEY: &str = "index_complete";

/// Per-record metadata stored alongside each chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_path: String,
    pub language: String,
    pub project: String,
    pub chunk_index: usize,
    #[serde(default = "unresolved")]
    pub start_line: i64,
    #[serde(default = "unresolved")]
    pub end_line: i64,
    #[serde(default)]
    pub content_hash: String,
}

fn unresolved() -> i64 {
    -1
}

impl ChunkMetadata {
    /// Lenient decoding: missing fields read as empty / `-1`.
    #[must_use]
    pub fn from_payload(payload: &Payload) -> Self {
        let text = |key: &str| {
            payload
                .get(key)
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        let int = |key: &str| {
            payload
                .get(key)
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(-1)
        };
        Self {
            file_path: text("file_path"),
            language: text("language"),
            project: text("project"),
            chunk_index: payload
                .get("chunk_index")
                .and_then(serde_json::Value::as_u64)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or_default(),
            start_line: int("start_line"),
            end_line: int("end_line"),
            content_hash: text("content_hash"),
        }
    }

    fn to_payload(&self) -> Result<Payload> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => Ok(map.into_iter().collect()),
            Ok(_) => Ok(Payload::new()),
            Err(e) => Err(VectorStoreError::Serialization(e.to_string()).into()),
        }
    }
}

/// One embedded chunk ready for upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedRecord {
    /// `project:rel_path:chunk_index`
    pub id: String,
    pub document: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

impl IndexedRecord {
    #[must_use]
    pub fn record_id(project: &str, rel_path: &str, index: usize) -> String {
        format!("{project}:{rel_path}:{index}")
    }
}

/// Collection-level metadata of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMetadata {
    pub name: String,
    pub project_root: Option<PathBuf>,
    /// Set once an indexing run finished. Collections created by an
    /// interrupted run stay `false` until the next run completes.
    pub index_complete: bool,
}

/// A stored document and its metadata, as returned by [`IndexStore::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    pub document: String,
    pub metadata: ChunkMetadata,
    pub score: Option<f32>,
}

/// Shared handle to the project collections.
#[derive(Clone)]
pub struct IndexStore {
    backend: Arc<dyn VectorStore>,
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore").finish_non_exhaustive()
    }
}

impl IndexStore {
    #[must_use]
    pub fn new(backend: Arc<dyn VectorStore>) -> Self {
        Self { backend }
    }

    /// Open or create the project's collection.
    ///
    /// `project_root` is recorded only when the collection is created. A
    /// later call with a different root keeps the stored value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store call fails.
    pub async fn get_or_create(
        &self,
        project: &str,
        project_root: Option<&Path>,
    ) -> Result<ProjectMetadata> {
        let mut requested = Payload::new();
        if let Some(root) = project_root {
            requested.insert(
                PROJECT_ROOT_KEY.to_owned(),
                serde_json::Value::String(root.to_string_lossy().into_owned()),
            );
        }
        let stored = self
            .backend
            .get_or_create_collection(project, requested)
            .await?;
        let meta = to_metadata(project, &stored);

        if let (Some(wanted), Some(kept)) = (project_root, meta.project_root.as_deref())
            && wanted != kept
        {
            tracing::warn!(
                project,
                stored = %kept.display(),
                requested = %wanted.display(),
                "project root differs from the one recorded at creation; keeping the original"
            );
        }
        Ok(meta)
    }

    /// Record whether the project's last indexing run finished.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ProjectNotIndexed`] if the project is unknown.
    pub async fn set_index_complete(&self, project: &str, complete: bool) -> Result<()> {
        let entries = Payload::from([(
            INDEX_COMPLETE_KEY.to_owned(),
            serde_json::Value::Bool(complete),
        )]);
        if self
            .backend
            .update_collection_metadata(project, entries)
            .await?
        {
            Ok(())
        } else {
            Err(IndexError::ProjectNotIndexed(project.to_owned()))
        }
    }

    /// # Errors
    ///
    /// Returns an error if the store call fails.
    pub async fn list_projects(&self) -> Result<BTreeSet<String>> {
        Ok(self.backend.list_collections().await?.into_iter().collect())
    }

    /// # Errors
    ///
    /// Returns [`IndexError::ProjectNotIndexed`] if the project is unknown.
    pub async fn get_metadata(&self, project: &str) -> Result<ProjectMetadata> {
        match self.backend.collection_metadata(project).await? {
            Some(stored) => Ok(to_metadata(project, &stored)),
            None => Err(IndexError::ProjectNotIndexed(project.to_owned())),
        }
    }

    /// Write records, overwriting any with the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the store call fails.
    pub async fn upsert(&self, project: &str, records: Vec<IndexedRecord>) -> Result<()> {
        let points = records
            .into_iter()
            .map(|r| {
                Ok(VectorRecord {
                    payload: r.metadata.to_payload()?,
                    id: r.id,
                    document: r.document,
                    vector: r.embedding,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.backend.upsert(project, points).await?;
        Ok(())
    }

    /// Up to `k` nearest chunks, best first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store call fails.
    pub async fn query(
        &self,
        project: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<StoredChunk>> {
        let hits = self.backend.query(project, embedding.to_vec(), k).await?;
        Ok(hits
            .into_iter()
            .map(|h| StoredChunk {
                metadata: ChunkMetadata::from_payload(&h.payload),
                id: h.id,
                document: h.document,
                score: Some(h.score),
            })
            .collect())
    }

    /// # Errors
    ///
    /// Returns [`IndexError::ProjectNotIndexed`] if the project is unknown.
    pub async fn delete(&self, project: &str) -> Result<()> {
        if self.backend.delete_collection(project).await? {
            tracing::info!(project, "project collection deleted");
            Ok(())
        } else {
            Err(IndexError::ProjectNotIndexed(project.to_owned()))
        }
    }

    /// # Errors
    ///
    /// Returns an error if the store call fails.
    pub async fn record_count(&self, project: &str) -> Result<usize> {
        Ok(self.backend.count(project).await?)
    }

    /// # Errors
    ///
    /// Returns an error if the store call fails.
    pub async fn record_ids(&self, project: &str) -> Result<Vec<String>> {
        Ok(self.backend.ids(project).await?)
    }

    /// # Errors
    ///
    /// Returns an error if the store call fails.
    pub async fn delete_records(&self, project: &str, ids: Vec<String>) -> Result<()> {
        Ok(self.backend.delete_ids(project, ids).await?)
    }

    /// First `limit` records of a project ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ProjectNotIndexed`] if the project is unknown.
    pub async fn peek(&self, project: &str, limit: usize) -> Result<Vec<StoredChunk>> {
        self.get_metadata(project).await?;
        let records = self.backend.peek(project, limit).await?;
        Ok(records
            .into_iter()
            .map(|StoredRecord { id, document, payload }| StoredChunk {
                metadata: ChunkMetadata::from_payload(&payload),
                id,
                document,
                score: None,
            })
            .collect())
    }
}

fn to_metadata(project: &str, stored: &Payload) -> ProjectMetadata {
    ProjectMetadata {
        name: project.to_owned(),
        project_root: stored
            .get(PROJECT_ROOT_KEY)
            .and_then(serde_json::Value::as_str)
            .map(PathBuf::from),
        index_complete: stored
            .get(INDEX_COMPLETE_KEY)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
    }
}
