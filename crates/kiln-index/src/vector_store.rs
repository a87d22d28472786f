//! Collection-level vector store abstraction.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("query error: {0}")]
    Query(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Payload = HashMap<String, serde_json::Value>;

/// A record to write: document text, metadata payload and embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub document: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// A stored record without its vector.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub document: String,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub id: String,
    pub document: String,
    pub score: f32,
    pub payload: Payload,
}

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait VectorStore: Send + Sync {
    /// Create the collection if missing and return its stored metadata.
    ///
    /// `metadata` is only written on creation; an existing collection keeps
    /// the metadata it was created with.
    fn get_or_create_collection(
        &self,
        collection: &str,
        metadata: Payload,
    ) -> BoxFuture<'_, Result<Payload, VectorStoreError>>;

    /// Metadata of an existing collection, `None` if it does not exist.
    fn collection_metadata(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<Option<Payload>, VectorStoreError>>;

    /// Merge `entries` into an existing collection's metadata, replacing
    /// keys already present. Returns `false` when the collection does not
    /// exist.
    fn update_collection_metadata(
        &self,
        collection: &str,
        entries: Payload,
    ) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    fn list_collections(&self) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>>;

    /// Returns `false` when the collection did not exist.
    fn delete_collection(&self, collection: &str)
    -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    /// Insert or overwrite records by id.
    fn upsert(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Up to `k` records, most similar first.
    fn query(
        &self,
        collection: &str,
        vector: Vec<f32>,
        k: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredRecord>, VectorStoreError>>;

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<usize, VectorStoreError>>;

    fn ids(&self, collection: &str) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>>;

    fn delete_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// First `limit` records ordered by id.
    fn peek(
        &self,
        collection: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<StoredRecord>, VectorStoreError>>;
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Sort best first with ties broken by id, then keep `k`.
pub(crate) fn rank(mut scored: Vec<ScoredRecord>, k: usize) -> Vec<ScoredRecord> {
    scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    scored.truncate(k);
    scored
}
