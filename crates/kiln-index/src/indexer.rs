//! Build-time pipeline: select → chunk → embed → store.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use kiln_llm::LlmProvider;

use crate::chunker::Chunker;
use crate::error::Result;
use crate::sources::{SourceFile, SourceSelector};
use crate::store::{ChunkMetadata, IndexStore, IndexedRecord};

/// Chunks whose trimmed text is shorter than this are not indexed.
pub const DEFAULT_MIN_CHUNK_CHARS: usize = 10;

/// Summary of an indexing run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub project: String,
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub chunks_created: usize,
    pub chunks_skipped: usize,
    pub records_removed: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Derive a project name from its root directory.
#[must_use]
pub fn project_name(root: &Path) -> String {
    root.file_name().map_or_else(
        || root.to_string_lossy().into_owned(),
        |n| n.to_string_lossy().into_owned(),
    )
}

/// Indexes a project tree into its collection.
pub struct Indexer<P: LlmProvider> {
    store: IndexStore,
    provider: Arc<P>,
    selector: SourceSelector,
    chunker: Chunker,
    min_chunk_chars: usize,
}

impl<P: LlmProvider> Indexer<P> {
    #[must_use]
    pub fn new(
        store: IndexStore,
        provider: Arc<P>,
        selector: SourceSelector,
        chunker: Chunker,
    ) -> Self {
        Self {
            store,
            provider,
            selector,
            chunker,
            min_chunk_chars: DEFAULT_MIN_CHUNK_CHARS,
        }
    }

    #[must_use]
    pub fn with_min_chunk_chars(mut self, min_chunk_chars: usize) -> Self {
        self.min_chunk_chars = min_chunk_chars;
        self
    }

    /// Index every selected file under `root` into the project collection.
    ///
    /// The project is named `name`, or after the root directory. Records of
    /// a file are upserted together once all of its chunks are embedded.
    /// Records left over from earlier runs whose ids were not produced again
    /// are removed after a complete run. The project is marked complete
    /// only once every file has been stored and stale records pruned.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` cannot be resolved, or as soon as an
    /// embedding or store call fails. Files upserted before the failure keep
    /// their records.
    pub async fn index_project(&self, root: &Path, name: Option<&str>) -> Result<IndexReport> {
        let start = std::time::Instant::now();
        let root = tokio::fs::canonicalize(root).await?;
        let project = name.map_or_else(|| project_name(&root), str::to_owned);
        let mut report = IndexReport {
            project: project.clone(),
            ..IndexReport::default()
        };

        self.store.get_or_create(&project, Some(&root)).await?;
        self.store.set_index_complete(&project, false).await?;

        let selector = self.selector.clone();
        let walk_root = root.clone();
        let files = tokio::task::spawn_blocking(move || selector.select(&walk_root))
            .await
            .map_err(std::io::Error::other)?;
        let total = files.len();
        tracing::info!(project = %project, root = %root.display(), total, "indexing started");

        let mut produced: BTreeSet<String> = BTreeSet::new();
        for (i, file) in files.iter().enumerate() {
            report.files_scanned += 1;
            let Some(text) = read_text(file, &mut report).await else {
                continue;
            };

            let records = match self.embed_file(&project, file, &text, &mut report).await {
                Ok(records) => records,
                Err(e) => {
                    tracing::error!(project = %project, file = %file.rel_path, "indexing aborted: {e}");
                    return Err(e);
                }
            };
            if records.is_empty() {
                continue;
            }

            let created = records.len();
            produced.extend(records.iter().map(|r| r.id.clone()));
            self.store.upsert(&project, records).await?;
            report.files_indexed += 1;
            report.chunks_created += created;
            tracing::info!(
                file = %file.rel_path,
                progress = format!("{}/{total}", i + 1),
                chunks = created,
                "indexed"
            );
        }

        let stale: Vec<String> = self
            .store
            .record_ids(&project)
            .await?
            .into_iter()
            .filter(|id| !produced.contains(id))
            .collect();
        if !stale.is_empty() {
            report.records_removed = stale.len();
            self.store.delete_records(&project, stale).await?;
        }
        self.store.set_index_complete(&project, true).await?;

        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            project = %project,
            files = report.files_indexed,
            chunks = report.chunks_created,
            skipped = report.chunks_skipped,
            removed = report.records_removed,
            ms = report.duration_ms,
            "indexing complete"
        );
        Ok(report)
    }

    async fn embed_file(
        &self,
        project: &str,
        file: &SourceFile,
        text: &str,
        report: &mut IndexReport,
    ) -> Result<Vec<IndexedRecord>> {
        let mut records = Vec::new();
        for chunk in self.chunker.chunk(&file.rel_path, text) {
            if chunk.text.trim().chars().count() < self.min_chunk_chars {
                report.chunks_skipped += 1;
                continue;
            }
            let embedding = self.provider.embed(&chunk.text).await?;
            records.push(IndexedRecord {
                id: IndexedRecord::record_id(project, &file.rel_path, chunk.index),
                metadata: ChunkMetadata {
                    file_path: file.rel_path.clone(),
                    language: file.language.clone(),
                    project: project.to_owned(),
                    chunk_index: chunk.index,
                    start_line: chunk.start_line(),
                    end_line: chunk.end_line(),
                    content_hash: blake3::hash(chunk.text.as_bytes()).to_hex().to_string(),
                },
                document: chunk.text,
                embedding,
            });
        }
        Ok(records)
    }
}

async fn read_text(file: &SourceFile, report: &mut IndexReport) -> Option<String> {
    let bytes = match tokio::fs::read(&file.abs_path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(file = %file.rel_path, "failed to read: {e}");
            report.errors.push(format!("{}: {e}", file.rel_path));
            return None;
        }
    };
    match String::from_utf8(bytes) {
        Ok(text) if text.trim().is_empty() => None,
        Ok(text) => Some(text),
        Err(_) => {
            tracing::warn!(file = %file.rel_path, "skipping non-UTF-8 file");
            report
                .errors
                .push(format!("{}: not valid UTF-8", file.rel_path));
            None
        }
    }
}
