use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::client::{CoordinationClient, RegisteredExecutor};
use crate::config::{Mode, RunnerTemplate};
use crate::definition::ExecutorDefinition;
use crate::error::StoreError;
use crate::reconcile::ReconciliationResult;
use crate::retry::RetryPolicy;

/// `runner-data.json`: previously obtained credentials keyed by executor
/// name.
///
/// Only one invocation per host is expected to write this file at a time;
/// there is no locking. Writes go through a temporary file and a rename so
/// a reader never sees a partial file.
#[derive(Debug, Clone)]
pub struct CredentialFile {
    path: PathBuf,
    records: BTreeMap<String, RegisteredExecutor>,
}

impl CredentialFile {
    /// Load the file; a missing file is a first run with nothing known.
    pub fn load(path: &Path, definitions: &[ExecutorDefinition]) -> Result<Self, StoreError> {
        let records = match std::fs::read_to_string(path) {
            Ok(data) => parse_records(&data, definitions).map_err(|message| {
                StoreError::Corrupt {
                    path: path.to_path_buf(),
                    message,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No credential file at {}, starting fresh", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                return Err(StoreError::Corrupt {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &BTreeMap<String, RegisteredExecutor> {
        &self.records
    }

    pub fn known(&self) -> Vec<RegisteredExecutor> {
        self.records.values().cloned().collect()
    }

    /// Replace the records with the run's authoritative set. Returns whether
    /// anything changed.
    pub fn apply(&mut self, result: &ReconciliationResult) -> bool {
        let mut next = BTreeMap::new();
        for (key, runner) in &result.entries {
            next.insert(key.name.clone(), runner.clone());
        }
        for runner in &result.retained {
            let name = self
                .records
                .iter()
                .find(|(_, r)| r.id == runner.id && r.target_url == runner.target_url)
                .map(|(name, _)| name.clone())
                .unwrap_or_else(|| runner.description.clone());
            let name = if next.contains_key(&name) {
                format!("{}.stale-{}", name, runner.id)
            } else {
                name
            };
            next.insert(name, runner.clone());
        }

        let changed = next != self.records;
        self.records = next;
        changed
    }

    /// Atomically rewrite the file with owner-only permissions. Keys are
    /// sorted at every level.
    pub fn save(&self) -> Result<(), StoreError> {
        let write_err = |source: std::io::Error| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        let invalid = |e: serde_json::Error| {
            write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        };
        let value = serde_json::to_value(&self.records).map_err(invalid)?;
        let json = serde_json::to_string_pretty(&value).map_err(invalid)?;
        write_atomic(&self.path, json.as_bytes()).map_err(write_err)?;
        info!("Wrote {} credential(s) to {}", self.records.len(), self.path.display());
        Ok(())
    }
}

fn parse_records(
    data: &str,
    definitions: &[ExecutorDefinition],
) -> Result<BTreeMap<String, RegisteredExecutor>, String> {
    let raw: BTreeMap<String, Option<RegisteredExecutor>> =
        serde_json::from_str(data).map_err(|e| e.to_string())?;

    let mut records = BTreeMap::new();
    for (name, record) in raw {
        let Some(mut record) = record else {
            continue;
        };
        if record.target_url.is_empty() {
            // Older files only carried id and token.
            match definitions.iter().find(|d| d.name == name) {
                Some(definition) => {
                    record.target_url = definition.target_url.clone();
                    record.description = definition.description.clone();
                    record.kind = Some(definition.kind.clone());
                }
                None => {
                    warn!(
                        "Dropping credential '{}' (id {}): no url recorded and no matching declaration",
                        name, record.id
                    );
                    continue;
                }
            }
        }
        records.insert(name, record);
    }
    Ok(records)
}

/// Write through a temporary file in the same directory, then rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Where the known-credential set comes from for this run.
#[derive(Debug)]
pub enum CredentialStore {
    Persisted(CredentialFile),
    Queried,
}

impl CredentialStore {
    pub fn open(
        mode: Mode,
        data_file: &Path,
        definitions: &[ExecutorDefinition],
    ) -> Result<Self, StoreError> {
        match mode {
            Mode::Persisted => Ok(Self::Persisted(CredentialFile::load(data_file, definitions)?)),
            Mode::Queried => Ok(Self::Queried),
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            CredentialStore::Persisted(_) => Mode::Persisted,
            CredentialStore::Queried => Mode::Queried,
        }
    }

    /// Persisted tokens may have been revoked since they were written;
    /// freshly listed ones come straight from the service.
    pub fn needs_validation(&self) -> bool {
        matches!(self, CredentialStore::Persisted(_))
    }

    /// The known set across all targets.
    pub async fn known(
        &self,
        client: &dyn CoordinationClient,
        template: &RunnerTemplate,
        hostname: &str,
        retry: &RetryPolicy,
    ) -> Result<Vec<RegisteredExecutor>, StoreError> {
        match self {
            CredentialStore::Persisted(file) => Ok(file.known()),
            CredentialStore::Queried => {
                let mut known = Vec::new();
                for target in &template.targets {
                    if target.access_token().is_none() {
                        return Err(StoreError::MissingAccessToken(target.url.clone()));
                    }
                    let runners = retry
                        .run_read("list runners", || client.fetch_attributed(target, hostname))
                        .await
                        .map_err(|source| StoreError::Remote {
                            url: target.url.clone(),
                            source,
                        })?;
                    debug!("{} runner(s) attributed to {} on {}", runners.len(), hostname, target.url);
                    known.extend(runners);
                }
                Ok(known)
            }
        }
    }

    /// Record the run's outcome. Persisted mode rewrites the file when the
    /// set changed; queried mode keeps no local state.
    pub fn commit(&mut self, result: &ReconciliationResult) -> Result<bool, StoreError> {
        match self {
            CredentialStore::Persisted(file) => {
                if file.apply(result) {
                    file.save()?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            CredentialStore::Queried => Ok(false),
        }
    }
}
