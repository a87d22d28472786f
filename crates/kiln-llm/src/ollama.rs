use std::time::Duration;

use ollama_rs::Ollama;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::models::ModelOptions;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{ChatParams, LlmProvider, Message, Role};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Ollama,
    http: reqwest::Client,
    base_url: String,
    model: String,
    embedding_model: String,
    timeout: Option<Duration>,
}

impl OllamaProvider {
    #[must_use]
    pub fn new(base_url: &str, model: String, embedding_model: String) -> Self {
        let (host, port) = parse_host_port(base_url);
        Self {
            client: Ollama::new(host, port),
            http: crate::http::default_client(None),
            base_url: base_url.trim_end_matches('/').to_owned(),
            model,
            embedding_model,
            timeout: None,
        }
    }

    /// Bound every chat and embedding call by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = crate::http::default_client(Some(timeout));
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Check if Ollama is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection to Ollama fails.
    pub async fn health_check(&self) -> Result<(), LlmError> {
        self.client.list_local_models().await.map_err(|e| {
            LlmError::Other(format!("failed to connect to Ollama at {}: {e}", self.base_url))
        })?;
        Ok(())
    }
}

impl LlmProvider for OllamaProvider {
    async fn chat(&self, messages: &[Message], params: &ChatParams) -> Result<String, LlmError> {
        let model = params.model.as_deref().unwrap_or(&self.model);
        let ollama_messages: Vec<ChatMessage> = messages.iter().map(convert_message).collect();

        let mut request = ChatMessageRequest::new(model.to_owned(), ollama_messages);
        if let Some(temperature) = params.temperature {
            request = request.options(ModelOptions::default().temperature(temperature));
        }

        let pending = self.client.send_chat_messages(request);
        let sent = match self.timeout {
            Some(after) => tokio::time::timeout(after, pending).await.map_err(|_| {
                tracing::warn!(model, ?after, "chat request timed out");
                LlmError::Timeout {
                    provider: "ollama",
                    after,
                }
            })?,
            None => pending.await,
        };
        let response =
            sent.map_err(|e| LlmError::Other(format!("Ollama chat request failed: {e}")))?;

        tracing::debug!(
            model,
            chars = response.message.content.len(),
            "chat response received"
        );
        Ok(response.message.content)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let body = EmbeddingRequest {
            model: &self.embedding_model,
            prompt: text,
        };

        let response = self
            .http
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            tracing::error!("Ollama embedding API error {status}: {text}");
            return Err(LlmError::Status {
                provider: "ollama",
                status: status.as_u16(),
                body: text,
            });
        }

        let resp: EmbeddingResponse = serde_json::from_str(&text)?;
        if resp.embedding.is_empty() {
            return Err(LlmError::EmptyResponse { provider: "ollama" });
        }
        Ok(resp.embedding)
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

fn convert_message(msg: &Message) -> ChatMessage {
    match msg.role {
        Role::System => ChatMessage::system(msg.content.clone()),
        Role::Assistant => ChatMessage::assistant(msg.content.clone()),
        Role::User => ChatMessage::user(msg.content.clone()),
    }
}

fn parse_host_port(url: &str) -> (String, u16) {
    let url = url.trim_end_matches('/');
    if let Some(colon_pos) = url.rfind(':') {
        let port_str = &url[colon_pos + 1..];
        if let Ok(port) = port_str.parse::<u16>() {
            let host = url[..colon_pos].to_string();
            return (host, port);
        }
    }
    (url.to_string(), 11434)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn provider_for(server: &MockServer) -> OllamaProvider {
        OllamaProvider::new(&server.uri(), "llama3.1".into(), "nomic-embed-text".into())
    }

    #[test]
    fn parse_host_port_with_port() {
        let (host, port) = parse_host_port("http://localhost:11434");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn parse_host_port_without_port_uses_default() {
        let (host, port) = parse_host_port("http://ollama.internal/");
        assert_eq!(host, "http://ollama.internal");
        assert_eq!(port, 11434);
    }

    #[test]
    fn parse_host_port_invalid_port_falls_back() {
        let (host, port) = parse_host_port("http://localhost:99999");
        assert_eq!(host, "http://localhost:99999");
        assert_eq!(port, 11434);
    }

    #[test]
    fn convert_message_keeps_role_and_content() {
        let cm = convert_message(&Message::system("only answer from context"));
        assert_eq!(cm.content, "only answer from context");
        let cm = convert_message(&Message::user("multi\nline"));
        assert_eq!(cm.content, "multi\nline");
    }

    #[tokio::test]
    async fn embed_posts_model_and_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .and(body_json(json!({"model": "nomic-embed-text", "prompt": "fn main() {}"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"embedding": [0.5, -0.25, 1.0]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let vector = provider_for(&server).embed("fn main() {}").await.unwrap();
        assert_eq!(vector, vec![0.5, -0.25, 1.0]);
    }

    #[tokio::test]
    async fn embed_server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not found"))
            .mount(&server)
            .await;

        let err = provider_for(&server).embed("x").await.unwrap_err();
        match err {
            LlmError::Status { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "model not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn embed_empty_vector_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embedding": []})))
            .mount(&server)
            .await;

        let err = provider_for(&server).embed("x").await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse { provider: "ollama" }));
    }

    #[tokio::test]
    async fn embed_unreachable_endpoint_errors() {
        let provider = OllamaProvider::new("http://127.0.0.1:1", "m".into(), "e".into());
        assert!(matches!(
            provider.embed("x").await.unwrap_err(),
            LlmError::Http(_)
        ));
    }

    #[tokio::test]
    async fn chat_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"model": "llama3.1", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3.1",
                "created_at": "2024-07-01T00:00:00Z",
                "message": {"role": "assistant", "content": "FROM python:3.11-slim"},
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = provider_for(&server)
            .chat(
                &[Message::system("s"), Message::user("u")],
                &ChatParams::with_temperature(0.05),
            )
            .await
            .unwrap();
        assert_eq!(reply, "FROM python:3.11-slim");
    }

    #[tokio::test]
    async fn chat_honours_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "model": "llama3.1",
                        "created_at": "2024-07-01T00:00:00Z",
                        "message": {"role": "assistant", "content": "too late"},
                        "done": true
                    }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server).with_timeout(Duration::from_millis(100));
        let err = provider
            .chat(&[Message::user("u")], &ChatParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout { provider: "ollama", .. }));
    }

    #[tokio::test]
    async fn chat_model_override_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"model": "qwen2.5-coder"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "qwen2.5-coder",
                "created_at": "2024-07-01T00:00:00Z",
                "message": {"role": "assistant", "content": "ok"},
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let params = ChatParams {
            model: Some("qwen2.5-coder".into()),
            temperature: None,
        };
        let reply = provider_for(&server)
            .chat(&[Message::user("u")], &params)
            .await
            .unwrap();
        assert_eq!(reply, "ok");
    }
}
