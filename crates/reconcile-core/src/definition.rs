use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::RunnerTemplate;
use crate::error::LoadError;
use crate::tags::{detect_scheduler, TagCapture, TagSet, TagValidator};

/// Keys the reconciler writes into each runner section itself.
const MANAGED_KEYS: &[&str] = &["id", "token", "description"];

/// Host-wide substitution keys; an executor of the same name would shadow them.
pub const RESERVED_NAMES: &[&str] = &["hostname", "name"];

/// Identity of a desired executor: which target, which kind, which name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutorKey {
    pub target_url: String,
    pub kind: String,
    pub name: String,
}

impl fmt::Display for ExecutorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} on {})", self.name, self.kind, self.target_url)
    }
}

#[derive(Debug, Deserialize)]
struct Declaration {
    url: String,
    executor: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(flatten)]
    properties: toml::Table,
}

/// One locally declared executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorDefinition {
    pub name: String,
    pub target_url: String,
    pub kind: String,
    /// Remote name, `<hostname>-<name>`, used for ownership attribution.
    pub description: String,
    /// Full tag set sent on registration.
    pub tags: TagSet,
    /// Passed through into the rendered runner section.
    pub properties: toml::Table,
    pub source: PathBuf,
}

impl ExecutorDefinition {
    pub fn key(&self) -> ExecutorKey {
        ExecutorKey {
            target_url: self.target_url.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
        }
    }
}

/// Reads the executor declaration directory.
pub struct DefinitionLoader<'a> {
    hostname: &'a str,
    capture: &'a dyn TagCapture,
    validator: Option<&'a dyn TagValidator>,
    scheduler: Option<String>,
}

impl<'a> DefinitionLoader<'a> {
    pub fn new(hostname: &'a str, capture: &'a dyn TagCapture) -> Self {
        Self {
            hostname,
            capture,
            validator: None,
            scheduler: detect_scheduler().map(str::to_string),
        }
    }

    pub fn with_validator(mut self, validator: &'a dyn TagValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Override scheduler detection for batch executors.
    pub fn with_scheduler(mut self, scheduler: Option<&str>) -> Self {
        self.scheduler = scheduler.map(str::to_string);
        self
    }

    /// Load every `*.toml` declaration in `dir` (non-recursive), sorted by
    /// name. A missing directory means no executors are desired.
    pub fn load_dir(
        &self,
        dir: &Path,
        template: &RunnerTemplate,
    ) -> Result<Vec<ExecutorDefinition>, LoadError> {
        if !dir.exists() {
            debug!("No executor directory at {}", dir.display());
            return Ok(Vec::new());
        }

        let io_err = |source: std::io::Error| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }
        paths.sort();

        let host_tags = self.capture.capture_tags();
        let mut by_name: BTreeMap<String, ExecutorDefinition> = BTreeMap::new();
        for path in paths {
            let definition = self.load_file(&path, template, &host_tags)?;
            if let Some(existing) = by_name.get(&definition.name) {
                return Err(LoadError::Invalid {
                    path,
                    reason: format!(
                        "executor name '{}' already declared in {}",
                        definition.name,
                        existing.source.display()
                    ),
                });
            }
            by_name.insert(definition.name.clone(), definition);
        }

        debug!("Loaded {} executor declaration(s)", by_name.len());
        Ok(by_name.into_values().collect())
    }

    fn load_file(
        &self,
        path: &Path,
        template: &RunnerTemplate,
        host_tags: &TagSet,
    ) -> Result<ExecutorDefinition, LoadError> {
        let contents = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let decl: Declaration = toml::from_str(&contents).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let invalid = |reason: String| LoadError::Invalid {
            path: path.to_path_buf(),
            reason,
        };

        let name = match decl.name {
            Some(name) => name,
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        if name.is_empty() || name.contains(['{', '}', '.']) {
            return Err(invalid(format!("invalid executor name '{}'", name)));
        }
        if RESERVED_NAMES.contains(&name.as_str()) {
            return Err(invalid(format!(
                "executor name '{}' is reserved for the template",
                name
            )));
        }
        if decl.executor.is_empty() {
            return Err(invalid("executor kind must not be empty".into()));
        }
        if template.find_target(&decl.url).is_none() {
            return Err(invalid(format!(
                "url {} matches no client config in the template",
                decl.url
            )));
        }
        if let Some(key) = MANAGED_KEYS.iter().find(|k| decl.properties.contains_key(**k)) {
            return Err(invalid(format!("'{}' is managed by the reconciler", key)));
        }

        let mut tags: TagSet = decl.tags.into_iter().collect();
        tags.extend(host_tags.iter().cloned());
        tags.insert(decl.executor.clone());
        if decl.executor == "batch" {
            if let Some(scheduler) = &self.scheduler {
                tags.insert(scheduler.clone());
            }
        }

        if let Some(validator) = self.validator {
            validator
                .validate(&tags)
                .map_err(|reason| LoadError::TagSchema {
                    name: name.clone(),
                    reason,
                })?;
        }

        Ok(ExecutorDefinition {
            description: format!("{}-{}", self.hostname, name),
            name,
            target_url: decl.url,
            kind: decl.executor,
            tags,
            properties: decl.properties,
            source: path.to_path_buf(),
        })
    }
}
