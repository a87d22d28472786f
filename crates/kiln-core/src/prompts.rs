//! Prompt templates and placeholder rendering.
//!
//! Placeholders are `{name}`; `{{` and `}}` render as literal braces.

use std::collections::BTreeMap;

use crate::error::GenerationError;

pub const SERVICE_SYSTEM_TEMPLATE: &str = "\
You are a DevSecOps engineer who writes production-ready Dockerfiles.

Rules:
- Run the final image as a non-root user and never bake secrets into layers.
- Use a multi-stage build so the final image carries only what the service needs at runtime.
- Pin base images to the version-locked tag you are given. Never use `latest`.
- Output only the Dockerfile itself: no prose, no markdown fences, no commentary lines.";

pub const SERVICE_USER_TEMPLATE: &str = "\
Write a Dockerfile for the service `{service_name}`.

Derive the build tool and dependency manager from the files actually present in the tree \
(for example Poetry when `poetry.lock` exists, npm or yarn for `package.json`). Do not reference \
files that are not in the tree.

## Service
{service_descriptor}

## Repository summary
{summary}

## File tree
{tree}

## Manifest ({manifest_path})
{manifest_content}

## Retrieved code
{code_context}

Fields marked \"not detected\" are unknown: infer them from the code above or choose a \
conventional default, and never leave them blank.

Base image to use: `{base_image}`.";

pub const AGGREGATE_SYSTEM_TEMPLATE: &str = "\
You are a cloud architect who writes production-ready docker-compose files.

Rules:
- Never hardcode secrets; load them with `env_file: .env`.
- Give stateful services named volumes.
- Connect services through a dedicated bridge network.
- Pin every image to a specific tag.
- Output only the docker-compose.yml content: no prose, no markdown fences, no commentary lines.";

pub const AGGREGATE_USER_TEMPLATE: &str = "\
Write a docker-compose.yml for the project `{project_name}`.

Each service below already has a Dockerfile at `<path>/{service_artifact}` relative to the \
compose file; build each service from its own directory.

## Services
{services}

## Repository summary
{summary}

## File tree
{tree}

## Retrieved code
{code_context}

Add a database or cache only when the code uses one. When PostgreSQL is used \
(`psycopg2`, `sqlalchemy`, `pg`, ...), add a `db` service on `postgres:{postgres_image_tag}` \
with a health check such as `pg_isready -U $${{POSTGRES_USER:-postgres}}`. When Redis is used, \
add a `cache` service on `redis:{redis_image_tag}`.";

pub const ASK_TEMPLATE: &str = "\
You are a codebase assistant. Answer using only the code context below. \
If the answer is not in the context, reply exactly: Not found in context.

## Code context
{context}

Question: {question}
Answer:";

/// Fill `template` from `values`.
///
/// # Errors
///
/// Returns [`GenerationError::Template`] for a placeholder missing from
/// `values` or an unbalanced brace.
pub fn render(template: &str, values: &BTreeMap<&str, String>) -> Result<String, GenerationError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
        } else if let Some(after) = tail.strip_prefix('{') {
            let end = after.find('}').ok_or_else(|| {
                GenerationError::Template(format!("unclosed placeholder at byte {pos}"))
            })?;
            let key = &after[..end];
            let value = values
                .get(key)
                .ok_or_else(|| GenerationError::Template(format!("unknown placeholder '{key}'")))?;
            out.push_str(value);
            rest = &after[end + 1..];
        } else {
            return Err(GenerationError::Template(format!(
                "unmatched '}}' at byte {pos}"
            )));
        }
    }
    out.push_str(rest);
    Ok(out)
}
