use serde::{Deserialize, Serialize};

use crate::error::LlmError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Per-request generation parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatParams {
    /// Overrides the provider's configured generation model.
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

impl ChatParams {
    #[must_use]
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            model: None,
            temperature: Some(temperature),
        }
    }
}

pub trait LlmProvider: Send + Sync {
    /// Send a chat conversation and return the assistant's text.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to communicate or the response is invalid.
    fn chat(
        &self,
        messages: &[Message],
        params: &ChatParams,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;

    /// Turn text into a fixed-dimension embedding vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedding service is unreachable or returns no vector.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::system("be terse")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"be terse"}"#);
    }

    #[test]
    fn chat_params_default_has_no_overrides() {
        let params = ChatParams::default();
        assert!(params.model.is_none());
        assert!(params.temperature.is_none());
        assert_eq!(ChatParams::with_temperature(0.05).temperature, Some(0.05));
    }
}
