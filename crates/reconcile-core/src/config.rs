use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::LoadError;

pub const DEFAULT_PREFIX: &str = "/etc/gitlab-runner";

const TEMPLATE_FILE: &str = "config.template";
const EXECUTORS_DIR: &str = "executors";
const DATA_FILE: &str = "runner-data.json";
const TAG_SCHEMA_FILE: &str = "tag-schema.json";
const OUTPUT_FILE: &str = "config.toml";

/// Fixed file layout under the configuration prefix.
#[derive(Debug, Clone)]
pub struct Layout {
    prefix: PathBuf,
}

impl Layout {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn template_path(&self) -> PathBuf {
        self.prefix.join(TEMPLATE_FILE)
    }

    pub fn executors_dir(&self) -> PathBuf {
        self.prefix.join(EXECUTORS_DIR)
    }

    pub fn data_file(&self) -> PathBuf {
        self.prefix.join(DATA_FILE)
    }

    pub fn tag_schema_path(&self) -> PathBuf {
        self.prefix.join(TAG_SCHEMA_FILE)
    }

    pub fn output_path(&self) -> PathBuf {
        self.prefix.join(OUTPUT_FILE)
    }
}

/// How the known-credential set is obtained. Chosen by the caller, never
/// inferred from what exists on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Persisted,
    Queried,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Persisted => write!(f, "persisted"),
            Mode::Queried => write!(f, "stateless"),
        }
    }
}

/// One coordination service endpoint this host registers against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientTarget {
    pub url: String,
    #[serde(default)]
    pub registration_token: String,
    #[serde(default)]
    pub personal_access_token: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
}

impl ClientTarget {
    /// A target known only by url, used to delete credentials whose target
    /// has been removed from the template.
    pub fn orphan(url: &str) -> Self {
        Self {
            url: url.to_string(),
            registration_token: String::new(),
            personal_access_token: None,
            api_url: None,
        }
    }

    /// Base of the runner REST API, always ending in '/'.
    pub fn api_base(&self) -> String {
        let mut base = match &self.api_url {
            Some(api) => api.clone(),
            None => format!("{}/api/v4", self.url.trim_end_matches('/')),
        };
        if !base.ends_with('/') {
            base.push('/');
        }
        base
    }

    pub fn access_token(&self) -> Option<&str> {
        self.personal_access_token
            .as_deref()
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    client_configs: Vec<ClientTarget>,
}

/// The configuration template: client targets from `[metadata]`, everything
/// else is runner-process settings carried into the rendered config.
#[derive(Debug, Clone)]
pub struct RunnerTemplate {
    pub name: String,
    pub targets: Vec<ClientTarget>,
    pub settings: toml::Table,
}

impl RunnerTemplate {
    pub fn load_from(path: &Path) -> Result<Self, LoadError> {
        let contents = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents).map_err(|reason| match reason {
            TemplateIssue::Syntax(message) => LoadError::Parse {
                path: path.to_path_buf(),
                message,
            },
            TemplateIssue::Invalid(reason) => LoadError::Invalid {
                path: path.to_path_buf(),
                reason,
            },
        })
    }

    fn parse(contents: &str) -> Result<Self, TemplateIssue> {
        let mut settings: toml::Table =
            toml::from_str(contents).map_err(|e| TemplateIssue::Syntax(e.to_string()))?;

        let metadata = match settings.remove("metadata") {
            Some(value) => value
                .try_into::<Metadata>()
                .map_err(|e| TemplateIssue::Invalid(format!("bad [metadata]: {}", e)))?,
            None => return Err(TemplateIssue::Invalid("missing [metadata] table".into())),
        };

        if settings.contains_key("runners") {
            return Err(TemplateIssue::Invalid(
                "[[runners]] sections are generated from executor declarations".into(),
            ));
        }

        let mut seen = std::collections::BTreeSet::new();
        for target in &metadata.client_configs {
            if target.url.is_empty() {
                return Err(TemplateIssue::Invalid("client config without url".into()));
            }
            if !seen.insert(target.url.as_str()) {
                return Err(TemplateIssue::Invalid(format!(
                    "duplicate client config for {}",
                    target.url
                )));
            }
        }

        Ok(Self {
            name: metadata.name,
            targets: metadata.client_configs,
            settings,
        })
    }

    pub fn find_target(&self, url: &str) -> Option<&ClientTarget> {
        self.targets.iter().find(|t| t.url == url)
    }
}

#[derive(Debug)]
enum TemplateIssue {
    Syntax(String),
    Invalid(String),
}

/// The prefix holds tokens; refuse to use it when group or other can get in.
#[cfg(unix)]
pub fn check_owner_only(path: &Path) -> Result<(), LoadError> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mode = meta.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(LoadError::Permissions {
            path: path.to_path_buf(),
            mode,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_owner_only(_path: &Path) -> Result<(), LoadError> {
    Ok(())
}
