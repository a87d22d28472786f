use std::str::FromStr;

use super::Config;

/// Parse a numeric override, logging and discarding values that do not parse.
pub(crate) fn parse_override<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("ignoring invalid {key} value: {raw}");
            None
        }
    }
}

fn env_override<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    parse_override(key, &raw)
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KILN_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("KILN_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("KILN_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Some(t) = env_override("KILN_LLM_TEMPERATURE") {
            self.llm.temperature = t;
        }
        if let Some(secs) = env_override("KILN_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = Some(secs);
        }
        if let Ok(v) = std::env::var("KILN_STORE_PATH") {
            self.store.path = v;
        }
        if let Ok(v) = std::env::var("KILN_INDEX_EXCLUDE_PATTERNS") {
            self.index.exclude_patterns = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(n) = env_override("KILN_INDEX_MIN_CHUNK_CHARS") {
            self.index.min_chunk_chars = n;
        }
        if let Some(k) = env_override("KILN_GENERATION_RAG_K") {
            self.generation.rag_k = k;
        }
        if let Some(n) = env_override("KILN_GENERATION_MAX_CODE_CONTEXT_CHARS") {
            self.generation.max_code_context_chars = n;
        }
        if let Some(n) = env_override("KILN_GENERATION_MAX_PARALLEL_SERVICES") {
            self.generation.max_parallel_services = n;
        }
        if let Ok(v) = std::env::var("KILN_GENERATION_OUTPUT_FOLDER") {
            self.generation.output_folder = v;
        }
        if let Some(k) = env_override("KILN_ASK_K") {
            self.ask.k = k;
        }
        if let Some(n) = env_override("KILN_ASK_MAX_CONTEXT_CHARS") {
            self.ask.max_context_chars = n;
        }
    }
}
