//! Persistent vector store backed by `SQLite`.
//!
//! Embeddings are stored as little-endian `f32` blobs and scored in process.

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::vector_store::{
    BoxFuture, Payload, ScoredRecord, StoredRecord, VectorRecord, VectorStore, VectorStoreError,
    cosine_similarity, rank,
};

#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database on a single connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub async fn open(path: &str) -> Result<Self, VectorStoreError> {
        let in_memory = path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
            }
            format!("sqlite:{path}?mode=rwc")
        };

        let opts = SqliteConnectOptions::from_str(&url)
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(opts)
            .await
            .map_err(|e| VectorStoreError::Connection(format!("failed to open {path}: {e}")))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| VectorStoreError::Connection(format!("migrations failed: {e}")))?;

        tracing::debug!(path, "vector store opened");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn exists(&self, collection: &str) -> Result<bool, VectorStoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT name FROM collections WHERE name = ?")
            .bind(collection)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn require(&self, collection: &str) -> Result<(), VectorStoreError> {
        if self.exists(collection).await? {
            Ok(())
        } else {
            Err(VectorStoreError::Collection(format!(
                "collection {collection} not found"
            )))
        }
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn encode_payload(payload: &Payload) -> Result<String, VectorStoreError> {
    serde_json::to_string(payload).map_err(|e| VectorStoreError::Serialization(e.to_string()))
}

fn decode_payload(raw: &str) -> Result<Payload, VectorStoreError> {
    serde_json::from_str(raw).map_err(|e| VectorStoreError::Serialization(e.to_string()))
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl VectorStore for SqliteVectorStore {
    fn get_or_create_collection(
        &self,
        collection: &str,
        metadata: Payload,
    ) -> BoxFuture<'_, Result<Payload, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let raw = encode_payload(&metadata)?;
            sqlx::query("INSERT INTO collections (name, metadata) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
                .bind(&collection)
                .bind(&raw)
                .execute(&self.pool)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let (stored,): (String,) =
                sqlx::query_as("SELECT metadata FROM collections WHERE name = ?")
                    .bind(&collection)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            decode_payload(&stored)
        })
    }

    fn collection_metadata(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<Option<Payload>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT metadata FROM collections WHERE name = ?")
                    .bind(&collection)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            row.map(|(raw,)| decode_payload(&raw)).transpose()
        })
    }

    fn update_collection_metadata(
        &self,
        collection: &str,
        entries: Payload,
    ) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let row: Option<(String,)> =
                sqlx::query_as("SELECT metadata FROM collections WHERE name = ?")
                    .bind(&collection)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let Some((raw,)) = row else {
                return Ok(false);
            };
            let mut metadata = decode_payload(&raw)?;
            metadata.extend(entries);
            sqlx::query("UPDATE collections SET metadata = ? WHERE name = ?")
                .bind(encode_payload(&metadata)?)
                .bind(&collection)
                .execute(&mut *tx)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            tx.commit()
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(true)
        })
    }

    fn list_collections(&self) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>> {
        Box::pin(async move {
            let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM collections ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(rows.into_iter().map(|(name,)| name).collect())
        })
    }

    fn delete_collection(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM collections WHERE name = ?")
                .bind(&collection)
                .execute(&self.pool)
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn upsert(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.require(&collection)
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            for r in records {
                let payload = encode_payload(&r.payload)?;
                sqlx::query(
                    "INSERT INTO records (collection, id, document, metadata, embedding) \
                     VALUES (?, ?, ?, ?, ?) \
                     ON CONFLICT(collection, id) DO UPDATE SET \
                     document = excluded.document, metadata = excluded.metadata, \
                     embedding = excluded.embedding",
                )
                .bind(&collection)
                .bind(&r.id)
                .bind(&r.document)
                .bind(&payload)
                .bind(encode_vector(&r.vector))
                .execute(&self.pool)
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            }
            Ok(())
        })
    }

    fn query(
        &self,
        collection: &str,
        vector: Vec<f32>,
        k: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredRecord>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.require(&collection)
                .await
                .map_err(|e| VectorStoreError::Query(e.to_string()))?;
            let rows: Vec<(String, String, String, Vec<u8>)> = sqlx::query_as(
                "SELECT id, document, metadata, embedding FROM records WHERE collection = ?",
            )
            .bind(&collection)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VectorStoreError::Query(e.to_string()))?;

            let mut scored = Vec::with_capacity(rows.len());
            for (id, document, metadata, embedding) in rows {
                scored.push(ScoredRecord {
                    score: cosine_similarity(&vector, &decode_vector(&embedding)),
                    id,
                    document,
                    payload: decode_payload(&metadata)?,
                });
            }
            Ok(rank(scored, k))
        })
    }

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<usize, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.require(&collection).await?;
            let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records WHERE collection = ?")
                .bind(&collection)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
    }

    fn ids(&self, collection: &str) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.require(&collection).await?;
            let rows: Vec<(String,)> =
                sqlx::query_as("SELECT id FROM records WHERE collection = ? ORDER BY id")
                    .bind(&collection)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(rows.into_iter().map(|(id,)| id).collect())
        })
    }

    fn delete_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            for id in &ids {
                sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
                    .bind(&collection)
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            }
            Ok(())
        })
    }

    fn peek(
        &self,
        collection: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<StoredRecord>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.require(&collection).await?;
            let rows: Vec<(String, String, String)> = sqlx::query_as(
                "SELECT id, document, metadata FROM records WHERE collection = ? ORDER BY id LIMIT ?",
            )
            .bind(&collection)
            .bind(to_i64(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            rows.into_iter()
                .map(|(id, document, metadata)| {
                    Ok(StoredRecord {
                        id,
                        document,
                        payload: decode_payload(&metadata)?,
                    })
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.into(),
            document: format!("fn {id}() {{}}"),
            vector,
            payload: Payload::from([
                ("file_path".to_owned(), serde_json::json!("src/lib.rs")),
                ("start_line".to_owned(), serde_json::json!(3)),
            ]),
        }
    }

    #[test]
    fn vector_blob_roundtrip() {
        let v = vec![0.25f32, -1.5, 3.0e-7];
        assert_eq!(decode_vector(&encode_vector(&v)), v);
    }

    #[tokio::test]
    async fn create_upsert_query_in_memory() {
        let store = SqliteVectorStore::open(":memory:").await.unwrap();
        let meta = Payload::from([("project_root".to_owned(), serde_json::json!("/srv/app"))]);
        store.get_or_create_collection("app", meta).await.unwrap();
        store
            .upsert(
                "app",
                vec![record("a", vec![1.0, 0.0]), record("b", vec![0.6, 0.8])],
            )
            .await
            .unwrap();

        let hits = store.query("app", vec![0.0, 1.0], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "b");
        assert_eq!(hits[0].payload["start_line"], 3);
        assert_eq!(hits[1].document, "fn a() {}");
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = SqliteVectorStore::open(":memory:").await.unwrap();
        store
            .get_or_create_collection("app", Payload::new())
            .await
            .unwrap();
        for _ in 0..3 {
            store
                .upsert("app", vec![record("a", vec![1.0]), record("b", vec![1.0])])
                .await
                .unwrap();
        }
        assert_eq!(store.count("app").await.unwrap(), 2);
        assert_eq!(store.ids("app").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn metadata_kept_on_second_create() {
        let store = SqliteVectorStore::open(":memory:").await.unwrap();
        let first = Payload::from([("project_root".to_owned(), serde_json::json!("/one"))]);
        let second = Payload::from([("project_root".to_owned(), serde_json::json!("/two"))]);
        store.get_or_create_collection("p", first).await.unwrap();
        let stored = store.get_or_create_collection("p", second).await.unwrap();
        assert_eq!(stored["project_root"], "/one");
    }

    #[tokio::test]
    async fn metadata_update_merges_into_stored_json() {
        let store = SqliteVectorStore::open(":memory:").await.unwrap();
        let meta = Payload::from([("project_root".to_owned(), serde_json::json!("/srv/app"))]);
        store.get_or_create_collection("app", meta).await.unwrap();
        for done in [false, true] {
            let entries = Payload::from([("index_complete".to_owned(), serde_json::json!(done))]);
            assert!(store.update_collection_metadata("app", entries).await.unwrap());
        }
        let stored = store.collection_metadata("app").await.unwrap().unwrap();
        assert_eq!(stored["project_root"], "/srv/app");
        assert_eq!(stored["index_complete"], true);
        assert!(!store
            .update_collection_metadata("ghost", Payload::new())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn missing_collection_errors() {
        let store = SqliteVectorStore::open(":memory:").await.unwrap();
        assert!(store.collection_metadata("ghost").await.unwrap().is_none());
        assert!(matches!(
            store.query("ghost", vec![1.0], 1).await,
            Err(VectorStoreError::Query(_))
        ));
        assert!(matches!(
            store.upsert("ghost", vec![record("a", vec![1.0])]).await,
            Err(VectorStoreError::Upsert(_))
        ));
    }

    #[tokio::test]
    async fn delete_collection_cascades_records() {
        let store = SqliteVectorStore::open(":memory:").await.unwrap();
        store.get_or_create_collection("p", Payload::new()).await.unwrap();
        store.upsert("p", vec![record("a", vec![1.0])]).await.unwrap();
        assert!(store.delete_collection("p").await.unwrap());
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert!(store.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("kiln.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteVectorStore::open(path).await.unwrap();
            store.get_or_create_collection("p", Payload::new()).await.unwrap();
            store.upsert("p", vec![record("a", vec![1.0, 2.0])]).await.unwrap();
            store.pool().close().await;
        }
        let store = SqliteVectorStore::open(path).await.unwrap();
        assert_eq!(store.list_collections().await.unwrap(), vec!["p"]);
        let peeked = store.peek("p", 10).await.unwrap();
        assert_eq!(peeked.len(), 1);
        assert_eq!(peeked[0].id, "a");
    }
}
