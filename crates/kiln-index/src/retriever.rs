//! Similarity retrieval across one or all project collections.

use std::collections::BTreeMap;
use std::sync::Arc;

use kiln_llm::LlmProvider;

use crate::error::Result;
use crate::store::{IndexStore, StoredChunk};

/// One ranked result of a similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalHit {
    pub code: String,
    pub file_path: String,
    /// `-1` when provenance was not resolved.
    pub start_line: i64,
    pub end_line: i64,
    pub language: String,
    pub project: String,
    pub score: f32,
}

impl RetrievalHit {
    fn from_stored(project: &str, chunk: StoredChunk) -> Self {
        Self {
            code: chunk.document,
            file_path: chunk.metadata.file_path,
            start_line: chunk.metadata.start_line,
            end_line: chunk.metadata.end_line,
            language: chunk.metadata.language,
            project: project.to_owned(),
            score: chunk.score.unwrap_or_default(),
        }
    }
}

pub struct Retriever<P: LlmProvider> {
    store: IndexStore,
    provider: Arc<P>,
}

impl<P: LlmProvider> Retriever<P> {
    #[must_use]
    pub fn new(store: IndexStore, provider: Arc<P>) -> Self {
        Self { store, provider }
    }

    /// Ranked hits per project for `query`.
    ///
    /// `scope` names a single project; `None` searches every known project.
    /// The query is embedded once per call. With no known projects the
    /// result is empty and nothing is embedded.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IndexError::ProjectNotIndexed`] for an unknown `scope`, and
    /// an embedding or store error if either call fails.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        scope: Option<&str>,
    ) -> Result<BTreeMap<String, Vec<RetrievalHit>>> {
        let projects: Vec<String> = match scope {
            Some(project) => {
                self.store.get_metadata(project).await?;
                vec![project.to_owned()]
            }
            None => self.store.list_projects().await?.into_iter().collect(),
        };
        if projects.is_empty() {
            tracing::debug!("no indexed projects, skipping retrieval");
            return Ok(BTreeMap::new());
        }

        let embedding = self.provider.embed(query).await?;

        let mut results = BTreeMap::new();
        for project in projects {
            let hits: Vec<RetrievalHit> = self
                .store
                .query(&project, &embedding, k)
                .await?
                .into_iter()
                .map(|chunk| RetrievalHit::from_stored(&project, chunk))
                .collect();
            tracing::debug!(project = %project, hits = hits.len(), k, "retrieved");
            results.insert(project, hits);
        }
        Ok(results)
    }

    /// [`Self::retrieve`] flattened in project-name order, each project's
    /// hits in rank order.
    ///
    /// # Errors
    ///
    /// See [`Self::retrieve`].
    pub async fn retrieve_ranked(
        &self,
        query: &str,
        k: usize,
        scope: Option<&str>,
    ) -> Result<Vec<RetrievalHit>> {
        Ok(self
            .retrieve(query, k, scope)
            .await?
            .into_values()
            .flatten()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use kiln_llm::mock::MockProvider;

    use super::*;
    use crate::error::IndexError;
    use crate::in_memory_store::InMemoryVectorStore;
    use crate::store::{ChunkMetadata, IndexedRecord};

    fn record(project: &str, path: &str, embedding: Vec<f32>, lines: (i64, i64)) -> IndexedRecord {
        IndexedRecord {
            id: IndexedRecord::record_id(project, path, 0),
            document: format!("code from {path}"),
            metadata: ChunkMetadata {
                file_path: path.into(),
                language: "go".into(),
                project: project.into(),
                chunk_index: 0,
                start_line: lines.0,
                end_line: lines.1,
                content_hash: String::new(),
            },
            embedding,
        }
    }

    async fn seeded() -> (IndexStore, Arc<MockProvider>) {
        let store = IndexStore::new(Arc::new(InMemoryVectorStore::new()));
        for project in ["alpha", "beta"] {
            store.get_or_create(project, None).await.unwrap();
            store
                .upsert(
                    project,
                    vec![
                        record(project, "near.go", vec![1.0, 0.0, 0.0, 0.0], (1, 9)),
                        record(project, "mid.go", vec![1.0, 1.0, 0.0, 0.0], (-1, -1)),
                        record(project, "far.go", vec![0.0, 0.0, 0.0, 1.0], (4, 4)),
                    ],
                )
                .await
                .unwrap();
        }
        let provider = MockProvider::default().with_embedding(vec![1.0, 0.0, 0.0, 0.0]);
        (store, Arc::new(provider))
    }

    #[tokio::test]
    async fn empty_store_returns_empty_without_embedding() {
        let provider = Arc::new(MockProvider::default());
        let store = IndexStore::new(Arc::new(InMemoryVectorStore::new()));
        let retriever = Retriever::new(store, Arc::clone(&provider));
        let result = retriever.retrieve("anything", 5, None).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(provider.embed_calls(), 0);
    }

    #[tokio::test]
    async fn all_projects_share_one_embedding() {
        let (store, provider) = seeded().await;
        let retriever = Retriever::new(store, Arc::clone(&provider));
        let result = retriever.retrieve("server setup", 2, None).await.unwrap();
        assert_eq!(provider.embed_calls(), 1);
        assert_eq!(result.keys().collect::<Vec<_>>(), vec!["alpha", "beta"]);
        for hits in result.values() {
            assert_eq!(hits.len(), 2);
            assert_eq!(hits[0].file_path, "near.go");
            assert_eq!(hits[1].file_path, "mid.go");
            assert!(hits[0].score >= hits[1].score);
        }
    }

    #[tokio::test]
    async fn scoped_to_one_project() {
        let (store, provider) = seeded().await;
        let retriever = Retriever::new(store, provider);
        let result = retriever.retrieve("q", 5, Some("beta")).await.unwrap();
        assert_eq!(result.len(), 1);
        let hits = &result["beta"];
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.project == "beta"));
        assert_eq!(hits[1].start_line, -1);
        assert_eq!(hits[0].language, "go");
    }

    #[tokio::test]
    async fn unknown_scope_is_not_indexed() {
        let (store, provider) = seeded().await;
        let retriever = Retriever::new(store, Arc::clone(&provider));
        let err = retriever.retrieve("q", 5, Some("gamma")).await.unwrap_err();
        assert!(matches!(err, IndexError::ProjectNotIndexed(_)));
        assert_eq!(provider.embed_calls(), 0);
    }

    #[tokio::test]
    async fn embedding_failure_is_retrieval_error() {
        let (store, _) = seeded().await;
        let provider = Arc::new(MockProvider::default().with_embed_failure_after(0));
        let retriever = Retriever::new(store, provider);
        let err = retriever.retrieve("q", 5, None).await.unwrap_err();
        assert!(err.is_retrieval());
    }

    #[tokio::test]
    async fn ranked_flattens_in_project_order() {
        let (store, provider) = seeded().await;
        let retriever = Retriever::new(store, provider);
        let hits = retriever.retrieve_ranked("q", 1, None).await.unwrap();
        let pairs: Vec<_> = hits
            .iter()
            .map(|h| (h.project.as_str(), h.file_path.as_str()))
            .collect();
        assert_eq!(pairs, vec![("alpha", "near.go"), ("beta", "near.go")]);
    }
}
