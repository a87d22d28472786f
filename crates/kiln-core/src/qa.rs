//! Retrieval-augmented question answering over indexed projects.

use std::collections::BTreeMap;
use std::sync::Arc;

use kiln_index::{IndexStore, Retriever, build_context};
use kiln_llm::{ChatParams, LlmProvider, Message};

use crate::config::Config;
use crate::error::{GenerationError, PipelineError};
use crate::prompts::{ASK_TEMPLATE, render};

pub struct Assistant<P: LlmProvider> {
    retriever: Retriever<P>,
    provider: Arc<P>,
    params: ChatParams,
    k: usize,
    max_context_chars: usize,
}

impl<P: LlmProvider> Assistant<P> {
    #[must_use]
    pub fn new(store: IndexStore, provider: Arc<P>, config: &Config) -> Self {
        Self {
            retriever: Retriever::new(store, Arc::clone(&provider)),
            provider,
            params: ChatParams::with_temperature(config.llm.temperature),
            k: config.ask.k,
            max_context_chars: config.ask.max_context_chars,
        }
    }

    /// Answer `question` from code retrieved in `project`, or in every
    /// indexed project when `project` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the project is unknown, retrieval fails, or the
    /// model call fails.
    pub async fn ask(
        &self,
        question: &str,
        project: Option<&str>,
    ) -> Result<String, PipelineError> {
        let hits = self
            .retriever
            .retrieve_ranked(question, self.k, project)
            .await?;
        if hits.is_empty() {
            tracing::warn!(project = ?project, "no indexed code matched the question");
        }
        let context = build_context(&hits, self.max_context_chars);
        tracing::debug!(
            hits = hits.len(),
            context_chars = context.chars().count(),
            "context assembled"
        );

        let values = BTreeMap::from([("context", context), ("question", question.to_owned())]);
        let generation_err = |source| PipelineError::Generation {
            target: "answer".into(),
            source,
        };
        let prompt = render(ASK_TEMPLATE, &values).map_err(generation_err)?;
        let answer = self
            .provider
            .chat(&[Message::user(prompt)], &self.params)
            .await
            .map_err(|e| generation_err(GenerationError::Llm(e)))?;
        Ok(answer.trim().to_owned())
    }
}
