use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::LoadError;

pub type TagSet = BTreeSet<String>;

/// Host-wide tag capture, injected at startup.
pub trait TagCapture {
    fn capture_tags(&self) -> TagSet;
}

impl<F> TagCapture for F
where
    F: Fn() -> TagSet,
{
    fn capture_tags(&self) -> TagSet {
        self()
    }
}

/// Validates the full registration tag set of one executor.
pub trait TagValidator {
    fn validate(&self, tags: &TagSet) -> Result<(), String>;
}

impl<F> TagValidator for F
where
    F: Fn(&TagSet) -> Result<(), String>,
{
    fn validate(&self, tags: &TagSet) -> Result<(), String> {
        self(tags)
    }
}

/// Default capture: the hostname and its cluster name (digits removed).
#[derive(Debug, Clone)]
pub struct SystemTags {
    hostname: String,
}

impl SystemTags {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
        }
    }
}

impl TagCapture for SystemTags {
    fn capture_tags(&self) -> TagSet {
        let mut tags = TagSet::new();
        tags.insert(self.hostname.clone());
        let cluster = cluster_name(&self.hostname);
        if !cluster.is_empty() {
            tags.insert(cluster);
        }
        tags
    }
}

pub fn cluster_name(hostname: &str) -> String {
    hostname.chars().filter(|c| !c.is_ascii_digit()).collect()
}

/// Resolve this host's name: `HOSTNAME`, then the kernel's view.
pub fn host_name() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/proc/sys/kernel/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

/// Batch scheduler available on this host, detected from its submit command.
pub fn detect_scheduler() -> Option<&'static str> {
    [("bsub", "lsf"), ("salloc", "slurm"), ("cqsub", "cobalt")]
        .into_iter()
        .find(|(cmd, _)| on_path(cmd))
        .map(|(_, scheduler)| scheduler)
}

fn on_path(cmd: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(cmd)))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[derive(Debug, Default, Deserialize)]
struct SchemaDocument {
    #[serde(default)]
    required: Vec<String>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    max_tags: Option<usize>,
}

/// Tag schema loaded from `tag-schema.json`.
#[derive(Debug)]
pub struct TagSchema {
    required: Vec<String>,
    pattern: Option<Regex>,
    max_tags: Option<usize>,
}

impl TagSchema {
    pub fn load_from(path: &Path) -> Result<Self, LoadError> {
        let data = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&data).map_err(|message| LoadError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Load the schema if the file exists.
    pub fn load_optional(path: &Path) -> Result<Option<Self>, LoadError> {
        if path.exists() {
            Self::load_from(path).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn parse(data: &str) -> Result<Self, String> {
        let doc: SchemaDocument = serde_json::from_str(data).map_err(|e| e.to_string())?;
        let pattern = doc
            .pattern
            .map(|p| Regex::new(&format!("^(?:{})$", p)))
            .transpose()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            required: doc.required,
            pattern,
            max_tags: doc.max_tags,
        })
    }
}

impl TagValidator for TagSchema {
    fn validate(&self, tags: &TagSet) -> Result<(), String> {
        if let Some(missing) = self.required.iter().find(|r| !tags.contains(*r)) {
            return Err(format!("required tag '{}' is missing", missing));
        }
        if let Some(max) = self.max_tags {
            if tags.len() > max {
                return Err(format!("{} tags exceeds the limit of {}", tags.len(), max));
            }
        }
        if let Some(pattern) = &self.pattern {
            if let Some(bad) = tags.iter().find(|t| !pattern.is_match(t)) {
                return Err(format!("tag '{}' does not match {}", bad, pattern));
            }
        }
        Ok(())
    }
}
