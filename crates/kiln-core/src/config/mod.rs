mod env;
mod types;


pub use types::*;

use std::path::{Path, PathBuf};

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting values are invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str::<Self>(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file path: explicit flag, then `KILN_CONFIG`, then
    /// [`DEFAULT_CONFIG_PATH`].
    #[must_use]
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        std::env::var_os("KILN_CONFIG")
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_owned()));
        if self.llm.base_url.trim().is_empty() {
            return invalid("llm.base_url must not be empty");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return invalid("llm.temperature must be within 0.0..=2.0");
        }
        if self.index.extensions.values().all(Vec::is_empty) {
            return invalid("index.extensions must list at least one extension");
        }
        let chunking = &self.index.chunking;
        if chunking.code_chunk_size == 0 || chunking.text_chunk_size == 0 {
            return invalid("index.chunking sizes must be greater than zero");
        }
        if chunking.code_overlap >= chunking.code_chunk_size
            || chunking.text_overlap >= chunking.text_chunk_size
        {
            return invalid("index.chunking overlap must be smaller than the chunk size");
        }
        if self.generation.rag_k == 0 || self.ask.k == 0 {
            return invalid("retrieval k must be greater than zero");
        }
        if self.generation.max_parallel_services == 0 {
            return invalid("generation.max_parallel_services must be greater than zero");
        }
        if self.generation.service_artifact.trim().is_empty()
            || self.generation.aggregate_artifact.trim().is_empty()
        {
            return invalid("generation artifact names must not be empty");
        }
        Ok(())
    }
}
