//! Embedding and chat provider abstraction used by indexing, retrieval and generation.

pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod provider;

pub use error::LlmError;
pub use provider::{ChatParams, LlmProvider, Message, Role};
