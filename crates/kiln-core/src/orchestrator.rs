//! End-to-end pipeline: index, ingest, detect, generate, write.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use kiln_index::{
    Chunker, IndexError, IndexReport, IndexStore, Indexer, Retriever, SourceSelector,
    build_context, project_name,
};
use kiln_llm::{ChatParams, LlmProvider};

use crate::artifact::{Artifact, ArtifactWriter, service_artifact_path};
use crate::config::{Config, GenerationConfig};
use crate::error::{GenerationError, PipelineError};
use crate::generation::{ArtifactNames, Generator};
use crate::ingest::{LocalIngest, RepoIngest, RepoSnapshot};
use crate::services::{ServiceDescriptor, ServiceDetector};

const REPO_QUERY: &str =
    "top-level configuration, docker-compose examples, inter-service communication";

fn service_query(service: &ServiceDescriptor) -> String {
    format!(
        "code snippets for {} {} service entrypoint, server setup, and dependencies",
        service.name, service.language
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NotIndexed,
    Indexed,
    ServicesDetected,
    PerServiceGenerated,
    AggregateGenerated,
    Written,
    Done,
    /// Failed while in the given stage.
    Error(&'static str),
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotIndexed => f.write_str("not_indexed"),
            Self::Indexed => f.write_str("indexed"),
            Self::ServicesDetected => f.write_str("services_detected"),
            Self::PerServiceGenerated => f.write_str("per_service_generated"),
            Self::AggregateGenerated => f.write_str("aggregate_generated"),
            Self::Written => f.write_str("written"),
            Self::Done => f.write_str("done"),
            Self::Error(stage) => write!(f, "error({stage})"),
        }
    }
}

impl PipelineState {
    fn stage(self) -> &'static str {
        match self {
            Self::NotIndexed => "indexing",
            Self::Indexed => "service detection",
            Self::ServicesDetected => "per-service generation",
            Self::PerServiceGenerated => "aggregate generation",
            Self::AggregateGenerated | Self::Written => "write",
            Self::Done => "done",
            Self::Error(stage) => stage,
        }
    }
}

/// A service whose per-service artifact could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFailure {
    pub service: String,
    /// Directory of the service relative to the repository root.
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub project: String,
    pub services: Vec<String>,
    pub written: Vec<PathBuf>,
    pub failures: Vec<ServiceFailure>,
    /// Present when the run had to index the project first.
    pub index: Option<IndexReport>,
}

impl PipelineReport {
    /// No service failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Run<'a> {
    project: &'a str,
    state: PipelineState,
}

impl Run<'_> {
    fn advance(&mut self, next: PipelineState) {
        tracing::info!(
            project = self.project,
            from = %self.state,
            state = %next,
            "pipeline transition"
        );
        self.state = next;
    }

    fn fail(&mut self, err: PipelineError) -> PipelineError {
        let next = PipelineState::Error(self.state.stage());
        tracing::error!(project = self.project, state = %next, "pipeline failed: {err}");
        self.state = next;
        err
    }
}

/// Drives the generation pipeline over one shared store and model client.
pub struct Orchestrator<P: LlmProvider> {
    store: IndexStore,
    indexer: Indexer<P>,
    retriever: Retriever<P>,
    generator: Generator<P>,
    ingest: Arc<dyn RepoIngest>,
    detector: ServiceDetector,
    settings: GenerationConfig,
}

impl<P: LlmProvider> Orchestrator<P> {
    /// # Errors
    ///
    /// Returns an error if an exclude pattern in `config` is invalid.
    pub fn new(
        store: IndexStore,
        provider: Arc<P>,
        config: &Config,
    ) -> Result<Self, PipelineError> {
        let selector =
            SourceSelector::new(&config.index.extensions, &config.index.exclude_patterns)?;
        let indexer = Indexer::new(
            store.clone(),
            Arc::clone(&provider),
            selector.clone(),
            Chunker::new(config.index.chunking.into()),
        )
        .with_min_chunk_chars(config.index.min_chunk_chars);
        let retriever = Retriever::new(store.clone(), Arc::clone(&provider));
        let generator = Generator::new(
            provider,
            ChatParams::with_temperature(config.llm.temperature),
            ArtifactNames {
                service: config.generation.service_artifact.clone(),
                aggregate: config.generation.aggregate_artifact.clone(),
            },
        );
        Ok(Self {
            store,
            indexer,
            retriever,
            generator,
            ingest: Arc::new(LocalIngest::new(selector.excludes().clone())),
            detector: ServiceDetector::default(),
            settings: config.generation.clone(),
        })
    }

    #[must_use]
    pub fn with_ingest(mut self, ingest: Arc<dyn RepoIngest>) -> Self {
        self.ingest = ingest;
        self
    }

    #[must_use]
    pub fn with_detector(mut self, detector: ServiceDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Index `root` as `project` unless a previous run already indexed it
    /// completely. A project left behind by an interrupted run is indexed
    /// again.
    ///
    /// # Errors
    ///
    /// Returns an error if indexing fails.
    pub async fn ensure_indexed(
        &self,
        root: &Path,
        project: &str,
    ) -> Result<Option<IndexReport>, PipelineError> {
        match self.store.get_metadata(project).await {
            Ok(meta) if meta.index_complete => {
                tracing::info!(project, "project already indexed");
                return Ok(None);
            }
            Ok(_) => tracing::warn!(project, "previous indexing run did not finish, re-indexing"),
            Err(IndexError::ProjectNotIndexed(_)) => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(project, root = %root.display(), "project not indexed, indexing now");
        Ok(Some(self.indexer.index_project(root, Some(project)).await?))
    }

    /// Full pipeline for a source directory. Output goes to
    /// `<source>/<output_folder>`, defaulting to the configured folder.
    ///
    /// Per-service failures do not stop the run; they are listed in the
    /// report and their services are left out of the aggregate.
    ///
    /// # Errors
    ///
    /// Returns an error if indexing, ingestion, detection, aggregate
    /// generation, or a write fails.
    pub async fn run(
        &self,
        source: &Path,
        output_folder: Option<&str>,
    ) -> Result<PipelineReport, PipelineError> {
        let root = tokio::fs::canonicalize(source)
            .await
            .map_err(|e| PipelineError::Ingest(format!("{}: {e}", source.display())))?;
        let project = project_name(&root);
        let mut run = Run {
            project: &project,
            state: PipelineState::NotIndexed,
        };
        tracing::info!(project = %project, state = %run.state, "pipeline started");

        let index = self
            .ensure_indexed(&root, &project)
            .await
            .map_err(|e| run.fail(e))?;
        run.advance(PipelineState::Indexed);

        let (snapshot, services) = self.discover(&root).await.map_err(|e| run.fail(e))?;
        run.advance(PipelineState::ServicesDetected);

        let mut report = PipelineReport {
            project: project.clone(),
            services: services.iter().map(|s| s.name.clone()).collect(),
            index,
            ..PipelineReport::default()
        };
        let writer = self.writer(&root, output_folder);

        let mut artifacts = Vec::new();
        self.generate_services(&project, &services, &snapshot, &mut artifacts, &mut report)
            .await;
        run.advance(PipelineState::PerServiceGenerated);

        match self
            .aggregate(&project, &services, &snapshot, &writer, &mut artifacts, &mut report)
            .await
        {
            Ok(aggregate) => artifacts.push(aggregate),
            Err(e) => return Err(run.fail(e)),
        }
        run.advance(PipelineState::AggregateGenerated);

        write_all(&writer, &artifacts, &mut report)
            .await
            .map_err(|e| run.fail(e))?;
        run.advance(PipelineState::Written);
        run.advance(PipelineState::Done);
        Ok(report)
    }

    /// Generate and write per-service artifacts for an indexed project.
    ///
    /// # Errors
    ///
    /// Returns an error if the project is unknown, has no recorded root,
    /// has no services, or a write fails.
    pub async fn generate_service_artifacts(
        &self,
        project: &str,
        output_folder: Option<&str>,
    ) -> Result<PipelineReport, PipelineError> {
        let root = self.project_root(project).await?;
        let (snapshot, services) = self.discover(&root).await?;
        let writer = self.writer(&root, output_folder);
        let mut report = PipelineReport {
            project: project.to_owned(),
            services: services.iter().map(|s| s.name.clone()).collect(),
            ..PipelineReport::default()
        };
        let mut artifacts = Vec::new();
        self.generate_services(project, &services, &snapshot, &mut artifacts, &mut report)
            .await;
        write_all(&writer, &artifacts, &mut report).await?;
        Ok(report)
    }

    /// Generate and write the aggregate artifact for an indexed project,
    /// first generating any per-service artifact missing on disk. Nothing is
    /// written when the aggregate cannot be produced.
    ///
    /// # Errors
    ///
    /// Returns an error if the project is unknown, has no recorded root,
    /// has no services, generation of the aggregate fails, or a write fails.
    pub async fn generate_aggregate_artifact(
        &self,
        project: &str,
        output_folder: Option<&str>,
    ) -> Result<PipelineReport, PipelineError> {
        let root = self.project_root(project).await?;
        let (snapshot, services) = self.discover(&root).await?;
        let writer = self.writer(&root, output_folder);
        let mut report = PipelineReport {
            project: project.to_owned(),
            services: services.iter().map(|s| s.name.clone()).collect(),
            ..PipelineReport::default()
        };
        let mut artifacts = Vec::new();
        let aggregate = self
            .aggregate(project, &services, &snapshot, &writer, &mut artifacts, &mut report)
            .await?;
        artifacts.push(aggregate);
        write_all(&writer, &artifacts, &mut report).await?;
        Ok(report)
    }

    async fn project_root(&self, project: &str) -> Result<PathBuf, PipelineError> {
        self.store
            .get_metadata(project)
            .await?
            .project_root
            .ok_or_else(|| PipelineError::ProjectRootUnknown(project.to_owned()))
    }

    fn writer(&self, root: &Path, output_folder: Option<&str>) -> ArtifactWriter {
        ArtifactWriter::new(root.join(output_folder.unwrap_or(&self.settings.output_folder)))
    }

    async fn discover(
        &self,
        root: &Path,
    ) -> Result<(RepoSnapshot, Vec<ServiceDescriptor>), PipelineError> {
        let ingest = Arc::clone(&self.ingest);
        let dir = root.to_path_buf();
        let snapshot = tokio::task::spawn_blocking(move || ingest.ingest(&dir))
            .await
            .map_err(|e| PipelineError::Ingest(e.to_string()))??;
        tracing::info!(files = snapshot.tree.len(), "repository ingested");

        let services = self.detector.detect(&snapshot);
        if services.is_empty() {
            return Err(PipelineError::NoServicesDetected(root.to_path_buf()));
        }
        tracing::info!(
            count = services.len(),
            services = ?services.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "services detected"
        );
        Ok((snapshot, services))
    }

    async fn generate_one(
        &self,
        project: &str,
        service: &ServiceDescriptor,
        snapshot: &RepoSnapshot,
    ) -> Result<Artifact, PipelineError> {
        let start = std::time::Instant::now();
        let hits = self
            .retriever
            .retrieve_ranked(&service_query(service), self.settings.rag_k, Some(project))
            .await?;
        let context = build_context(&hits, self.settings.max_code_context_chars);
        let artifact = self
            .generator
            .service_artifact(service, snapshot, &context)
            .await
            .map_err(|source| PipelineError::Generation {
                target: service.name.clone(),
                source,
            })?;
        tracing::info!(
            service = %service.name,
            hits = hits.len(),
            context_chars = context.chars().count(),
            ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "per-service artifact generated"
        );
        Ok(artifact)
    }

    /// Generate artifacts for `services` through the bounded pool, appending
    /// successes to `artifacts` and failures to the report, in service order.
    async fn generate_services(
        &self,
        project: &str,
        services: &[ServiceDescriptor],
        snapshot: &RepoSnapshot,
        artifacts: &mut Vec<Artifact>,
        report: &mut PipelineReport,
    ) {
        let max_parallel = self.settings.max_parallel_services.max(1);
        let results: Vec<Result<Artifact, PipelineError>> = futures::stream::iter(
            services
                .iter()
                .map(|svc| self.generate_one(project, svc, snapshot)),
        )
        .buffered(max_parallel)
        .collect()
        .await;

        for (svc, result) in services.iter().zip(results) {
            match result {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => {
                    tracing::warn!(
                        service = %svc.name,
                        path = %svc.path,
                        "per-service generation failed: {e}"
                    );
                    report.failures.push(ServiceFailure {
                        service: svc.name.clone(),
                        path: svc.path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    /// Produce the aggregate artifact. Services with neither an artifact in
    /// this run, a recorded failure, nor a file on disk are generated first.
    async fn aggregate(
        &self,
        project: &str,
        services: &[ServiceDescriptor],
        snapshot: &RepoSnapshot,
        writer: &ArtifactWriter,
        artifacts: &mut Vec<Artifact>,
        report: &mut PipelineReport,
    ) -> Result<Artifact, PipelineError> {
        let target = self.generator.names().aggregate.clone();

        let mut missing = Vec::new();
        for svc in services {
            let generated = artifacts
                .iter()
                .any(|a| a.service_path.as_deref() == Some(svc.path.as_str()));
            let failed = report.failures.iter().any(|f| f.path == svc.path);
            if generated || failed {
                continue;
            }
            let path = service_artifact_path(&svc.path, &self.generator.names().service);
            if !writer.exists(&path).await {
                missing.push(svc.clone());
            }
        }
        if !missing.is_empty() {
            tracing::warn!(
                missing = ?missing.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
                "per-service artifacts missing, generating them before the aggregate"
            );
            self.generate_services(project, &missing, snapshot, artifacts, report)
                .await;
        }

        let failed: BTreeSet<&str> = report.failures.iter().map(|f| f.path.as_str()).collect();
        let included: Vec<&ServiceDescriptor> = services
            .iter()
            .filter(|s| !failed.contains(s.path.as_str()))
            .collect();
        if !failed.is_empty() {
            tracing::warn!(excluded = ?failed, "failed services left out of the aggregate");
        }
        if included.is_empty() {
            return Err(PipelineError::Generation {
                target,
                source: GenerationError::NoServiceArtifacts,
            });
        }

        let hits = self
            .retriever
            .retrieve_ranked(REPO_QUERY, self.settings.rag_k, Some(project))
            .await?;
        let context = build_context(&hits, self.settings.max_code_context_chars);
        let artifact = self
            .generator
            .aggregate_artifact(project, &included, snapshot, &context)
            .await
            .map_err(|source| PipelineError::Generation {
                target: target.clone(),
                source,
            })?;
        tracing::info!(services = included.len(), "aggregate artifact generated");
        Ok(artifact)
    }
}

async fn write_all(
    writer: &ArtifactWriter,
    artifacts: &[Artifact],
    report: &mut PipelineReport,
) -> Result<(), PipelineError> {
    for artifact in artifacts {
        let dest = writer.write(artifact).await?;
        report.written.push(dest);
    }
    Ok(())
}
