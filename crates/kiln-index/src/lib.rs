//! Code indexing and budgeted retrieval.
//!
//! Source files are selected, split into overlapping chunks with recovered
//! line ranges, embedded, and stored in one collection per project. Queries
//! are embedded once, matched against project collections, and packed into a
//! bounded evidence string for prompt construction.

pub mod chunker;
pub mod context;
pub mod error;
pub mod in_memory_store;
pub mod indexer;
pub mod languages;
pub mod retriever;
pub mod sources;
pub mod sqlite_store;
pub mod store;
pub mod vector_store;

pub use chunker::{Chunk, Chunker, ChunkerConfig, LineRange};
pub use context::{build_context, format_block};
pub use error::{IndexError, Result};
pub use in_memory_store::InMemoryVectorStore;
pub use indexer::{DEFAULT_MIN_CHUNK_CHARS, IndexReport, Indexer, project_name};
pub use retriever::{RetrievalHit, Retriever};
pub use sources::{ExcludeSet, SourceFile, SourceSelector};
pub use sqlite_store::SqliteVectorStore;
pub use store::{ChunkMetadata, IndexStore, IndexedRecord, ProjectMetadata, StoredChunk};
pub use vector_store::{VectorStore, VectorStoreError};
