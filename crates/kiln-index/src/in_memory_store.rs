use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::vector_store::{
    BoxFuture, Payload, ScoredRecord, StoredRecord, VectorRecord, VectorStore, VectorStoreError,
    cosine_similarity, rank,
};

struct StoredPoint {
    document: String,
    vector: Vec<f32>,
    payload: Payload,
}

struct InMemoryCollection {
    metadata: Payload,
    points: BTreeMap<String, StoredPoint>,
}

/// Process-local store, used in tests and for throwaway runs.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore")
            .finish_non_exhaustive()
    }
}

fn missing(collection: &str) -> String {
    format!("collection {collection} not found")
}

impl VectorStore for InMemoryVectorStore {
    fn get_or_create_collection(
        &self,
        collection: &str,
        metadata: Payload,
    ) -> BoxFuture<'_, Result<Payload, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let col = cols
                .entry(collection)
                .or_insert_with(|| InMemoryCollection {
                    metadata,
                    points: BTreeMap::new(),
                });
            Ok(col.metadata.clone())
        })
    }

    fn collection_metadata(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<Option<Payload>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(cols.get(&collection).map(|c| c.metadata.clone()))
        })
    }

    fn update_collection_metadata(
        &self,
        collection: &str,
        entries: Payload,
    ) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let Some(col) = cols.get_mut(&collection) else {
                return Ok(false);
            };
            col.metadata.extend(entries);
            Ok(true)
        })
    }

    fn list_collections(&self) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>> {
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let mut names: Vec<String> = cols.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }

    fn delete_collection(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            Ok(cols.remove(&collection).is_some())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            let col = cols
                .get_mut(&collection)
                .ok_or_else(|| VectorStoreError::Upsert(missing(&collection)))?;
            for r in records {
                col.points.insert(
                    r.id,
                    StoredPoint {
                        document: r.document,
                        vector: r.vector,
                        payload: r.payload,
                    },
                );
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
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Query(e.to_string()))?;
            let col = cols
                .get(&collection)
                .ok_or_else(|| VectorStoreError::Query(missing(&collection)))?;

            let scored: Vec<ScoredRecord> = col
                .points
                .iter()
                .map(|(id, sp)| ScoredRecord {
                    id: id.clone(),
                    document: sp.document.clone(),
                    score: cosine_similarity(&vector, &sp.vector),
                    payload: sp.payload.clone(),
                })
                .collect();
            Ok(rank(scored, k))
        })
    }

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<usize, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            cols.get(&collection)
                .map(|c| c.points.len())
                .ok_or_else(|| VectorStoreError::Collection(missing(&collection)))
        })
    }

    fn ids(&self, collection: &str) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            cols.get(&collection)
                .map(|c| c.points.keys().cloned().collect())
                .ok_or_else(|| VectorStoreError::Collection(missing(&collection)))
        })
    }

    fn delete_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            let col = cols
                .get_mut(&collection)
                .ok_or_else(|| VectorStoreError::Delete(missing(&collection)))?;
            for id in &ids {
                col.points.remove(id);
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
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let col = cols
                .get(&collection)
                .ok_or_else(|| VectorStoreError::Collection(missing(&collection)))?;
            Ok(col
                .points
                .iter()
                .take(limit)
                .map(|(id, sp)| StoredRecord {
                    id: id.clone(),
                    document: sp.document.clone(),
                    payload: sp.payload.clone(),
                })
                .collect())
        })
    }
}
