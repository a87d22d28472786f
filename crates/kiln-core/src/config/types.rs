use std::collections::BTreeMap;

use kiln_index::ChunkerConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub index: IndexConfig,
    pub generation: GenerationConfig,
    pub ask: AskConfig,
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "qwen2.5-coder:7b".into()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}

fn default_temperature() -> f32 {
    0.05
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Request timeout for model calls. Unset means no timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            temperature: default_temperature(),
            timeout_secs: None,
        }
    }
}

fn default_store_path() -> String {
    "./data/kiln.db".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoreConfig {
    /// `SQLite` database file, or `:memory:`.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_extensions() -> BTreeMap<String, Vec<String>> {
    [
        ("c", &[".c", ".h"][..]),
        ("cpp", &[".cc", ".cpp", ".hpp"]),
        ("go", &[".go"]),
        ("java", &[".java", ".kt"]),
        ("javascript", &[".js", ".jsx", ".mjs", ".cjs"]),
        ("markdown", &[".md"]),
        ("php", &[".php"]),
        ("python", &[".py"]),
        ("ruby", &[".rb"]),
        ("rust", &[".rs"]),
        ("toml", &[".toml"]),
        ("typescript", &[".ts", ".tsx"]),
        ("yaml", &[".yml", ".yaml"]),
    ]
    .into_iter()
    .map(|(lang, exts)| {
        (
            lang.to_owned(),
            exts.iter().map(|e| (*e).to_owned()).collect(),
        )
    })
    .collect()
}

fn default_exclude_patterns() -> Vec<String> {
    [
        "node_modules/",
        "target/",
        "dist/",
        "build/",
        "__pycache__/",
        ".venv/",
        "venv/",
        ".git/",
        "*.min.js",
        "*.lock",
        "package-lock.json",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

fn default_min_chunk_chars() -> usize {
    kiln_index::DEFAULT_MIN_CHUNK_CHARS
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Language tag → file extensions selected for indexing.
    #[serde(default = "default_extensions")]
    pub extensions: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            exclude_patterns: default_exclude_patterns(),
            min_chunk_chars: default_min_chunk_chars(),
            chunking: ChunkingConfig::default(),
        }
    }
}

/// Chunk sizes in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub code_chunk_size: usize,
    pub code_overlap: usize,
    pub text_chunk_size: usize,
    pub text_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let c = ChunkerConfig::default();
        Self {
            code_chunk_size: c.code_chunk_size,
            code_overlap: c.code_overlap,
            text_chunk_size: c.text_chunk_size,
            text_overlap: c.text_overlap,
        }
    }
}

impl From<ChunkingConfig> for ChunkerConfig {
    fn from(c: ChunkingConfig) -> Self {
        Self {
            code_chunk_size: c.code_chunk_size,
            code_overlap: c.code_overlap,
            text_chunk_size: c.text_chunk_size,
            text_overlap: c.text_overlap,
        }
    }
}

fn default_rag_k() -> usize {
    5
}

fn default_max_code_context_chars() -> usize {
    2000
}

fn default_max_parallel_services() -> usize {
    4
}

fn default_output_folder() -> String {
    "infra".into()
}

fn default_service_artifact() -> String {
    "Dockerfile".into()
}

fn default_aggregate_artifact() -> String {
    "docker-compose.yml".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default = "default_rag_k")]
    pub rag_k: usize,
    #[serde(default = "default_max_code_context_chars")]
    pub max_code_context_chars: usize,
    #[serde(default = "default_max_parallel_services")]
    pub max_parallel_services: usize,
    #[serde(default = "default_output_folder")]
    pub output_folder: String,
    /// File name of the per-service artifact.
    #[serde(default = "default_service_artifact")]
    pub service_artifact: String,
    /// File name of the aggregate artifact.
    #[serde(default = "default_aggregate_artifact")]
    pub aggregate_artifact: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            rag_k: default_rag_k(),
            max_code_context_chars: default_max_code_context_chars(),
            max_parallel_services: default_max_parallel_services(),
            output_folder: default_output_folder(),
            service_artifact: default_service_artifact(),
            aggregate_artifact: default_aggregate_artifact(),
        }
    }
}

fn default_ask_max_context_chars() -> usize {
    3000
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AskConfig {
    #[serde(default = "default_rag_k")]
    pub k: usize,
    #[serde(default = "default_ask_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            k: default_rag_k(),
            max_context_chars: default_ask_max_context_chars(),
        }
    }
}
