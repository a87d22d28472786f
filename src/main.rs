use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kiln_core::config::Config;
use kiln_core::{Assistant, Orchestrator, PipelineReport};
use kiln_index::{
    Chunker, IndexReport, IndexStore, Indexer, SourceSelector, SqliteVectorStore, StoredChunk,
};
use kiln_llm::ollama::OllamaProvider;

/// Index repositories and synthesize container build files from them.
#[derive(Debug, Parser)]
#[command(name = "kiln", version, about)]
struct Cli {
    /// Configuration file (TOML). Falls back to `KILN_CONFIG`, then
    /// `config/default.toml`, then built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index a project directory.
    Embed {
        project_dir: PathBuf,
        /// Project name; defaults to the directory name.
        #[arg(long)]
        name: Option<String>,
    },
    /// Answer a question from indexed code.
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
        /// Restrict retrieval to one project.
        #[arg(long)]
        project: Option<String>,
    },
    /// List indexed projects.
    List,
    /// Drop a project's index.
    Delete { name: String },
    /// Print the first records of a project's index.
    Preview {
        name: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Generate a Dockerfile for every service of an indexed project.
    GenerateDocker {
        #[arg(long)]
        project: String,
        /// Output folder under the project root.
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Generate docker-compose.yml for an indexed project.
    GenerateCompose {
        #[arg(long)]
        project: String,
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Index a source tree if needed, then generate every artifact.
    GenerateInfra {
        source: PathBuf,
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_subscriber();

    let config_path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    tracing::debug!(path = %config_path.display(), "config loaded");

    let backend = SqliteVectorStore::open(&config.store.path)
        .await
        .with_context(|| format!("failed to open index store at {}", config.store.path))?;
    let store = IndexStore::new(Arc::new(backend));

    match cli.command {
        Command::List => list(&store).await,
        Command::Delete { name } => {
            store
                .delete(&name)
                .await
                .with_context(|| format!("failed to delete project '{name}'"))?;
            println!("Deleted project '{name}'");
            Ok(ExitCode::SUCCESS)
        }
        Command::Preview { name, limit } => {
            let chunks = store.peek(&name, limit).await?;
            for chunk in &chunks {
                println!("{}", format_preview(chunk));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Embed { project_dir, name } => {
            let provider = create_provider(&config).await;
            embed(&store, provider, &config, &project_dir, name.as_deref()).await
        }
        Command::Ask { question, project } => {
            let provider = create_provider(&config).await;
            let assistant = Assistant::new(store, provider, &config);
            let answer = assistant
                .ask(&question.join(" "), project.as_deref())
                .await?;
            println!("{answer}");
            Ok(ExitCode::SUCCESS)
        }
        Command::GenerateDocker { project, output } => {
            let provider = create_provider(&config).await;
            let orchestrator = Orchestrator::new(store, provider, &config)?;
            let report = orchestrator
                .generate_service_artifacts(&project, output.as_deref())
                .await?;
            Ok(print_report(&report))
        }
        Command::GenerateCompose { project, output } => {
            let provider = create_provider(&config).await;
            let orchestrator = Orchestrator::new(store, provider, &config)?;
            let report = orchestrator
                .generate_aggregate_artifact(&project, output.as_deref())
                .await?;
            Ok(print_report(&report))
        }
        Command::GenerateInfra { source, output } => {
            let provider = create_provider(&config).await;
            let orchestrator = Orchestrator::new(store, provider, &config)?;
            let report = orchestrator.run(&source, output.as_deref()).await?;
            Ok(print_report(&report))
        }
    }
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn create_provider(config: &Config) -> Arc<OllamaProvider> {
    let mut provider = OllamaProvider::new(
        &config.llm.base_url,
        config.llm.model.clone(),
        config.llm.embedding_model.clone(),
    );
    if let Some(secs) = config.llm.timeout_secs {
        provider = provider.with_timeout(Duration::from_secs(secs));
    }
    match provider.health_check().await {
        Ok(()) => tracing::info!(base_url = %config.llm.base_url, "ollama health check passed"),
        Err(e) => tracing::warn!("ollama health check failed: {e:#}"),
    }
    Arc::new(provider)
}

async fn list(store: &IndexStore) -> anyhow::Result<ExitCode> {
    let projects = store.list_projects().await?;
    if projects.is_empty() {
        println!("No indexed projects");
        return Ok(ExitCode::SUCCESS);
    }
    for project in &projects {
        let count = store.record_count(project).await?;
        let meta = store.get_metadata(project).await?;
        let status = if meta.index_complete { "" } else { " (incomplete)" };
        println!("{project}\t{count} records{status}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn embed(
    store: &IndexStore,
    provider: Arc<OllamaProvider>,
    config: &Config,
    project_dir: &Path,
    name: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let root = tokio::fs::canonicalize(project_dir)
        .await
        .with_context(|| format!("project directory {} not found", project_dir.display()))?;
    let selector = SourceSelector::new(&config.index.extensions, &config.index.exclude_patterns)?;
    let indexer = Indexer::new(
        store.clone(),
        provider,
        selector,
        Chunker::new(config.index.chunking.into()),
    )
    .with_min_chunk_chars(config.index.min_chunk_chars);
    let report = indexer.index_project(&root, name).await?;
    println!("{}", format_index_report(&report));
    for error in &report.errors {
        println!("  skipped: {error}");
    }
    Ok(ExitCode::SUCCESS)
}

fn format_index_report(report: &IndexReport) -> String {
    format!(
        "Indexed '{}': {} of {} files, {} chunks ({} skipped, {} stale removed) in {} ms",
        report.project,
        report.files_indexed,
        report.files_scanned,
        report.chunks_created,
        report.chunks_skipped,
        report.records_removed,
        report.duration_ms,
    )
}

fn format_preview(chunk: &StoredChunk) -> String {
    let meta = &chunk.metadata;
    let snippet: String = chunk.document.chars().take(200).collect();
    format!(
        "{} [{}:{}] ({})\n{snippet}\n",
        meta.file_path, meta.start_line, meta.end_line, meta.language
    )
}

fn print_report(report: &PipelineReport) -> ExitCode {
    for line in report_lines(report) {
        println!("{line}");
    }
    if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn report_lines(report: &PipelineReport) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(index) = &report.index {
        lines.push(format_index_report(index));
    }
    lines.push(format!(
        "Project '{}': {} service(s) detected",
        report.project,
        report.services.len()
    ));
    lines.extend(
        report
            .written
            .iter()
            .map(|path| format!("  wrote {}", path.display())),
    );
    lines.extend(report.failures.iter().map(|f| {
        let path = if f.path.is_empty() { "." } else { &f.path };
        format!("  failed {} ({path}): {}", f.service, f.error)
    }));
    lines
}
