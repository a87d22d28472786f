//! Prompt assembly, the model call, and output cleanup for one artifact.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use kiln_llm::{ChatParams, LlmProvider, Message};

use crate::artifact::{Artifact, Stage, service_artifact_path};
use crate::error::GenerationError;
use crate::ingest::RepoSnapshot;
use crate::prompts::{
    AGGREGATE_SYSTEM_TEMPLATE, AGGREGATE_USER_TEMPLATE, SERVICE_SYSTEM_TEMPLATE,
    SERVICE_USER_TEMPLATE, render,
};
use crate::services::{ServiceDescriptor, supporting_image_tag};

/// Strip one wrapping markdown fence and surrounding blank lines.
///
/// At most one opening fence line (with an optional info string) and one
/// closing fence line are removed; everything between them is kept as is,
/// line endings included. Only the terminator of the last kept line is
/// dropped.
#[must_use]
pub fn normalize_fenced_output(text: &str) -> String {
    let mut lines: Vec<&str> = text.split_inclusive('\n').collect();
    trim_blank_lines(&mut lines);
    if lines
        .first()
        .is_some_and(|l| l.trim_start().starts_with("```"))
    {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| l.trim() == "```") {
        lines.pop();
    }
    trim_blank_lines(&mut lines);
    if let Some(last) = lines.last_mut() {
        let line: &str = *last;
        let line = line.strip_suffix('\n').unwrap_or(line);
        *last = line.strip_suffix('\r').unwrap_or(line);
    }
    lines.concat()
}

fn trim_blank_lines(lines: &mut Vec<&str>) {
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let leading = lines.iter().take_while(|l| l.trim().is_empty()).count();
    lines.drain(..leading);
}

/// Artifact file names used for generated output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNames {
    pub service: String,
    pub aggregate: String,
}

impl Default for ArtifactNames {
    fn default() -> Self {
        Self {
            service: "Dockerfile".into(),
            aggregate: "docker-compose.yml".into(),
        }
    }
}

pub struct Generator<P: LlmProvider> {
    provider: Arc<P>,
    params: ChatParams,
    names: ArtifactNames,
}

impl<P: LlmProvider> Generator<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, params: ChatParams, names: ArtifactNames) -> Self {
        Self {
            provider,
            params,
            names,
        }
    }

    #[must_use]
    pub fn names(&self) -> &ArtifactNames {
        &self.names
    }

    /// Render both templates, call the model, and normalize its reply.
    ///
    /// # Errors
    ///
    /// Returns a template, model, or empty-output error.
    pub async fn complete(
        &self,
        system_template: &str,
        user_template: &str,
        values: &BTreeMap<&str, String>,
    ) -> Result<String, GenerationError> {
        let messages = [
            Message::system(render(system_template, values)?),
            Message::user(render(user_template, values)?),
        ];
        let start = std::time::Instant::now();
        let raw = self.provider.chat(&messages, &self.params).await?;
        tracing::debug!(
            provider = self.provider.name(),
            ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "model call complete"
        );
        let content = normalize_fenced_output(&raw);
        if content.is_empty() {
            return Err(GenerationError::EmptyOutput);
        }
        Ok(content)
    }

    /// Generate the per-service artifact for `service`.
    ///
    /// # Errors
    ///
    /// See [`Self::complete`].
    pub async fn service_artifact(
        &self,
        service: &ServiceDescriptor,
        snapshot: &RepoSnapshot,
        code_context: &str,
    ) -> Result<Artifact, GenerationError> {
        let manifest = if service.manifest_content.trim().is_empty() {
            "(manifest content unavailable)".to_owned()
        } else {
            service.manifest_content.clone()
        };
        let values = BTreeMap::from([
            ("service_name", service.name.clone()),
            ("service_descriptor", service.describe()),
            ("summary", snapshot.summary.clone()),
            ("tree", snapshot.tree.join("\n")),
            ("manifest_path", service.manifest_path.clone()),
            ("manifest_content", manifest),
            ("code_context", non_empty_context(code_context)),
            ("base_image", service.base_image()),
        ]);
        let content = self
            .complete(SERVICE_SYSTEM_TEMPLATE, SERVICE_USER_TEMPLATE, &values)
            .await?;
        Ok(Artifact {
            path: service_artifact_path(&service.path, &self.names.service),
            content,
            stage: Stage::PerService,
            service_path: Some(service.path.clone()),
        })
    }

    /// Generate the aggregate artifact covering `services`.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::NoServiceArtifacts`] when `services` is
    /// empty, otherwise see [`Self::complete`].
    pub async fn aggregate_artifact(
        &self,
        project: &str,
        services: &[&ServiceDescriptor],
        snapshot: &RepoSnapshot,
        code_context: &str,
    ) -> Result<Artifact, GenerationError> {
        if services.is_empty() {
            return Err(GenerationError::NoServiceArtifacts);
        }
        let mut listing = String::new();
        for svc in services {
            let path = if svc.path.is_empty() { "." } else { &svc.path };
            let _ = writeln!(
                listing,
                "- {} ({}) at `{path}`, base image {}",
                svc.name,
                svc.language,
                svc.base_image()
            );
        }
        let values = BTreeMap::from([
            ("project_name", project.to_owned()),
            ("service_artifact", self.names.service.clone()),
            ("services", listing.trim_end().to_owned()),
            ("summary", snapshot.summary.clone()),
            ("tree", snapshot.tree.join("\n")),
            ("code_context", non_empty_context(code_context)),
            (
                "postgres_image_tag",
                supporting_image_tag("postgres").unwrap_or("16-alpine").to_owned(),
            ),
            (
                "redis_image_tag",
                supporting_image_tag("redis").unwrap_or("7-alpine").to_owned(),
            ),
        ]);
        let content = self
            .complete(AGGREGATE_SYSTEM_TEMPLATE, AGGREGATE_USER_TEMPLATE, &values)
            .await?;
        Ok(Artifact {
            path: self.names.aggregate.clone().into(),
            content,
            stage: Stage::Aggregate,
            service_path: None,
        })
    }
}

fn non_empty_context(context: &str) -> String {
    if context.is_empty() {
        "(no matching code was retrieved)".to_owned()
    } else {
        context.to_owned()
    }
}
