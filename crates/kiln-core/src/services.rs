//! Manifest-based service detection.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::ingest::RepoSnapshot;

/// Rendered in place of a field detection could not fill.
pub const NOT_DETECTED: &str = "not detected";

/// A deployable unit rooted at a directory containing a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    pub name: String,
    /// Directory relative to the repository root; empty for the root itself.
    pub path: String,
    pub language: String,
    pub manifest_path: String,
    pub manifest_content: String,
    /// Runtime version requested by the manifest, if it states one.
    pub version: Option<String>,
    pub entrypoint: Option<String>,
    pub port: Option<u16>,
    pub env: Vec<String>,
    pub depends_on: Vec<String>,
}

impl ServiceDescriptor {
    /// Names of optional fields detection left empty.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.version.is_none() {
            missing.push("version");
        }
        if self.entrypoint.is_none() {
            missing.push("entrypoint");
        }
        if self.port.is_none() {
            missing.push("port");
        }
        if self.env.is_empty() {
            missing.push("env");
        }
        if self.depends_on.is_empty() {
            missing.push("depends_on");
        }
        missing
    }

    /// One `key: value` line per descriptor field, with absent optional
    /// fields spelled out as [`NOT_DETECTED`].
    #[must_use]
    pub fn describe(&self) -> String {
        let opt = |v: Option<String>| v.unwrap_or_else(|| NOT_DETECTED.to_owned());
        let list = |v: &[String]| {
            if v.is_empty() {
                NOT_DETECTED.to_owned()
            } else {
                v.join(", ")
            }
        };
        let path = if self.path.is_empty() { "." } else { &self.path };
        format!(
            "name: {}\npath: {path}\nlanguage: {}\nmanifest: {}\nruntime version: {}\nentrypoint: {}\nport: {}\nenvironment: {}\ndepends on: {}",
            self.name,
            self.language,
            self.manifest_path,
            opt(self.version.clone()),
            opt(self.entrypoint.clone()),
            opt(self.port.map(|p| p.to_string())),
            list(&self.env),
            list(&self.depends_on),
        )
    }

    /// Suggested version-pinned base image for this service.
    #[must_use]
    pub fn base_image(&self) -> String {
        base_image(&self.language, self.version.as_deref())
    }
}

type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Maps a manifest file name to a service language.
#[derive(Clone)]
pub struct ManifestRule {
    label: String,
    predicate: Predicate,
    language: String,
}

impl fmt::Debug for ManifestRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestRule")
            .field("label", &self.label)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

impl ManifestRule {
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        language: impl Into<String>,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            predicate: Arc::new(predicate),
            language: language.into(),
        }
    }

    /// Matches a file with exactly this name.
    #[must_use]
    pub fn file(name: &'static str, language: impl Into<String>) -> Self {
        Self::new(name, language, move |file| file == name)
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    #[must_use]
    pub fn matches(&self, file_name: &str) -> bool {
        (self.predicate)(file_name)
    }
}

/// Finds services by scanning the tree for manifest files.
///
/// Rules are checked in priority order; within one directory the earliest
/// matching rule decides the language.
#[derive(Debug, Clone)]
pub struct ServiceDetector {
    rules: Vec<ManifestRule>,
}

impl Default for ServiceDetector {
    fn default() -> Self {
        Self {
            rules: vec![
                ManifestRule::file("requirements.txt", "python"),
                ManifestRule::file("pyproject.toml", "python"),
                ManifestRule::file("Pipfile", "python"),
                ManifestRule::file("setup.py", "python"),
                ManifestRule::file("package.json", "javascript"),
                ManifestRule::file("go.mod", "go"),
                ManifestRule::file("Cargo.toml", "rust"),
                ManifestRule::file("pom.xml", "java"),
                ManifestRule::file("build.gradle", "java"),
                ManifestRule::file("build.gradle.kts", "java"),
                ManifestRule::file("Gemfile", "ruby"),
                ManifestRule::file("composer.json", "php"),
            ],
        }
    }
}

impl ServiceDetector {
    #[must_use]
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule with the lowest priority so far.
    #[must_use]
    pub fn with_rule(mut self, rule: ManifestRule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub fn rules(&self) -> &[ManifestRule] {
        &self.rules
    }

    /// Services found in `snapshot`, ordered by directory path.
    #[must_use]
    pub fn detect(&self, snapshot: &RepoSnapshot) -> Vec<ServiceDescriptor> {
        // directory -> (rule priority, manifest path)
        let mut best: BTreeMap<&str, (usize, &str)> = BTreeMap::new();
        for rel in &snapshot.tree {
            let (dir, file) = rel.rsplit_once('/').unwrap_or(("", rel.as_str()));
            let Some(priority) = self.rules.iter().position(|r| r.matches(file)) else {
                continue;
            };
            best.entry(dir)
                .and_modify(|cur| {
                    if priority < cur.0 {
                        *cur = (priority, rel.as_str());
                    }
                })
                .or_insert((priority, rel.as_str()));
        }

        let services: Vec<ServiceDescriptor> = best
            .into_iter()
            .map(|(dir, (priority, manifest_path))| {
                describe_service(snapshot, dir, manifest_path, &self.rules[priority])
            })
            .collect();

        for svc in &services {
            tracing::debug!(
                service = %svc.name,
                path = %svc.path,
                language = %svc.language,
                missing = ?svc.missing_fields(),
                "service detected"
            );
        }
        services
    }
}

fn describe_service(
    snapshot: &RepoSnapshot,
    dir: &str,
    manifest_path: &str,
    rule: &ManifestRule,
) -> ServiceDescriptor {
    let name = if dir.is_empty() {
        snapshot.name.clone()
    } else {
        dir.rsplit('/').next().unwrap_or(dir).to_owned()
    };
    let manifest_content = snapshot.content(manifest_path).unwrap_or_else(|| {
        tracing::warn!(manifest = manifest_path, "manifest content unavailable");
        ""
    });
    let file = manifest_path.rsplit('/').next().unwrap_or(manifest_path);
    ServiceDescriptor {
        name,
        path: dir.to_owned(),
        language: rule.language().to_owned(),
        manifest_path: manifest_path.to_owned(),
        manifest_content: manifest_content.to_owned(),
        version: manifest_version(file, manifest_content),
        entrypoint: None,
        port: None,
        env: Vec::new(),
        depends_on: Vec::new(),
    }
}

/// Runtime version stated by a manifest, for the formats that declare one.
#[must_use]
pub fn manifest_version(file_name: &str, content: &str) -> Option<String> {
    let raw = match file_name {
        "package.json" => serde_json::from_str::<serde_json::Value>(content)
            .ok()?
            .pointer("/engines/node")?
            .as_str()?
            .to_owned(),
        "pyproject.toml" => toml::from_str::<toml::Table>(content)
            .ok()?
            .get("project")?
            .get("requires-python")?
            .as_str()?
            .to_owned(),
        "Cargo.toml" => toml::from_str::<toml::Table>(content)
            .ok()?
            .get("package")?
            .get("rust-version")?
            .as_str()?
            .to_owned(),
        "go.mod" => content
            .lines()
            .find_map(|l| l.trim().strip_prefix("go "))?
            .trim()
            .to_owned(),
        _ => return None,
    };
    numeric_version(&raw)
}

/// First dotted numeric run in a version requirement: `">=3.11,<4"` → `3.11`.
fn numeric_version(raw: &str) -> Option<String> {
    let start = raw.find(|c: char| c.is_ascii_digit())?;
    let rest = &raw[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let version = rest[..end].trim_end_matches('.');
    (!version.is_empty()).then(|| version.to_owned())
}

/// Version-pinned base image for a language, honouring a detected version.
#[must_use]
pub fn base_image(language: &str, version: Option<&str>) -> String {
    match (language, version) {
        ("python", Some(v)) => format!("python:{v}-slim"),
        ("python", None) => "python:3.11-slim".into(),
        ("javascript" | "typescript", Some(v)) => {
            let major = v.split('.').next().unwrap_or(v);
            format!("node:{major}-alpine")
        }
        ("javascript" | "typescript", None) => "node:20-alpine".into(),
        ("go", Some(v)) => format!("golang:{v}-alpine"),
        ("go", None) => "golang:1.22-alpine".into(),
        ("rust", Some(v)) => format!("rust:{v}-slim"),
        ("rust", None) => "rust:1.78-slim".into(),
        ("java", _) => "eclipse-temurin:21-jre".into(),
        ("ruby", _) => "ruby:3.3-slim".into(),
        ("php", _) => "php:8.3-fpm-alpine".into(),
        _ => "debian:bookworm-slim".into(),
    }
}

/// Pinned tag for a common supporting service image.
#[must_use]
pub fn supporting_image_tag(image: &str) -> Option<&'static str> {
    match image {
        "postgres" => Some("16-alpine"),
        "redis" => Some("7-alpine"),
        "mysql" => Some("8.0"),
        "mongo" => Some("7.0"),
        _ => None,
    }
}
