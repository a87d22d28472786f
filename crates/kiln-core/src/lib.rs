//! Configuration, service detection, and the Dockerfile / compose generation
//! pipeline built on top of `kiln-index`.

pub mod artifact;
pub mod config;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod orchestrator;
pub mod prompts;
pub mod qa;
pub mod services;

pub use artifact::{Artifact, ArtifactWriter, Stage};
pub use config::Config;
pub use error::{GenerationError, PipelineError};
pub use generation::{Generator, normalize_fenced_output};
pub use ingest::{LocalIngest, RepoIngest, RepoSnapshot};
pub use orchestrator::{Orchestrator, PipelineReport, PipelineState, ServiceFailure};
pub use qa::Assistant;
pub use services::{ManifestRule, ServiceDescriptor, ServiceDetector};
