//! Shared fixtures: an in-memory coordination service and a prefix builder.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use reconcile_core::{
    ClientError, ClientTarget, CoordinationClient, ExecutorDefinition, Layout, Mode,
    RegisteredExecutor, RetryPolicy, Session,
};

pub const GITLAB: &str = "https://gitlab.example.com";
pub const OTHER: &str = "https://other.example.com";
pub const HOST: &str = "host1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Register { url: String, description: String },
    Delete { url: String, id: u64 },
    Verify { url: String },
    Fetch { url: String },
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        matches!(self, Call::Register { .. } | Call::Delete { .. })
    }
}

#[derive(Default)]
struct State {
    next_id: u64,
    runners: Vec<RegisteredExecutor>,
    calls: Vec<Call>,
    register_failures: BTreeMap<String, ClientError>,
    lost_responses: BTreeSet<String>,
    delete_failures: BTreeMap<u64, ClientError>,
    lost_deletes: BTreeSet<u64>,
}

/// Records every call in order; failures are injected per description or id.
pub struct FakeCoordinator {
    state: Mutex<State>,
}

impl FakeCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 100,
                ..Default::default()
            }),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn runners(&self) -> Vec<RegisteredExecutor> {
        self.state.lock().unwrap().runners.clone()
    }

    pub fn seed(&self, runner: RegisteredExecutor) {
        let mut state = self.state.lock().unwrap();
        state.next_id = state.next_id.max(runner.id);
        state.runners.push(runner);
    }

    /// Every registration for `description` fails with `error`.
    pub fn fail_register(&self, description: &str, error: ClientError) {
        self.state
            .lock()
            .unwrap()
            .register_failures
            .insert(description.to_string(), error);
    }

    /// The next registration for `description` succeeds remotely but the
    /// response is lost to a timeout.
    pub fn lose_register_response(&self, description: &str) {
        self.state
            .lock()
            .unwrap()
            .lost_responses
            .insert(description.to_string());
    }

    pub fn fail_delete(&self, id: u64, error: ClientError) {
        self.state.lock().unwrap().delete_failures.insert(id, error);
    }

    /// The next delete of `id` removes the runner but the response is lost
    /// to a timeout.
    pub fn lose_delete_response(&self, id: u64) {
        self.state.lock().unwrap().lost_deletes.insert(id);
    }

    /// Invalidate a runner's token without removing the runner.
    pub fn revoke(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(runner) = state.runners.iter_mut().find(|r| r.id == id) {
            runner.token = Some(format!("revoked-{}", id));
        }
    }
}

pub fn refused() -> ClientError {
    ClientError::Transport {
        message: "connection refused".into(),
        ambiguous: false,
    }
}

pub fn timed_out() -> ClientError {
    ClientError::Transport {
        message: "operation timed out".into(),
        ambiguous: true,
    }
}

#[async_trait::async_trait]
impl CoordinationClient for FakeCoordinator {
    async fn register(
        &self,
        target: &ClientTarget,
        definition: &ExecutorDefinition,
    ) -> Result<RegisteredExecutor, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Register {
            url: target.url.clone(),
            description: definition.description.clone(),
        });
        if let Some(error) = state.register_failures.get(&definition.description) {
            return Err(error.clone());
        }

        state.next_id += 1;
        let id = state.next_id;
        let runner = RegisteredExecutor {
            id,
            token: Some(format!("token-{}", id)),
            target_url: target.url.clone(),
            description: definition.description.clone(),
            kind: Some(definition.kind.clone()),
            tags: definition.tags.clone(),
        };
        state.runners.push(runner.clone());

        if state.lost_responses.remove(&definition.description) {
            return Err(timed_out());
        }
        Ok(runner)
    }

    async fn delete(
        &self,
        target: &ClientTarget,
        runner: &RegisteredExecutor,
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Delete {
            url: target.url.clone(),
            id: runner.id,
        });
        if let Some(error) = state.delete_failures.get(&runner.id) {
            return Err(error.clone());
        }
        state
            .runners
            .retain(|r| !(r.id == runner.id && r.target_url == target.url));
        if state.lost_deletes.remove(&runner.id) {
            return Err(timed_out());
        }
        Ok(())
    }

    async fn verify(&self, target: &ClientTarget, token: &str) -> Result<bool, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Verify {
            url: target.url.clone(),
        });
        Ok(state
            .runners
            .iter()
            .any(|r| r.target_url == target.url && r.token.as_deref() == Some(token)))
    }

    async fn fetch_attributed(
        &self,
        target: &ClientTarget,
        host: &str,
    ) -> Result<Vec<RegisteredExecutor>, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Fetch {
            url: target.url.clone(),
        });
        Ok(state
            .runners
            .iter()
            .filter(|r| r.target_url == target.url && r.tags.contains(host))
            .map(|r| RegisteredExecutor {
                kind: None,
                ..r.clone()
            })
            .collect())
    }
}

/// A temporary configuration prefix.
pub struct Prefix {
    dir: tempfile::TempDir,
}

impl Prefix {
    pub fn new(template: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700)).unwrap();
        }
        std::fs::create_dir(dir.path().join("executors")).unwrap();
        std::fs::write(dir.path().join("config.template"), template).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn declare(&self, file: &str, contents: &str) -> &Self {
        std::fs::write(self.path().join("executors").join(file), contents).unwrap();
        self
    }

    pub fn remove(&self, file: &str) -> &Self {
        std::fs::remove_file(self.path().join("executors").join(file)).unwrap();
        self
    }

    pub fn output_path(&self) -> PathBuf {
        self.path().join("config.toml")
    }

    pub fn output(&self) -> Option<String> {
        std::fs::read_to_string(self.output_path()).ok()
    }

    pub fn credentials(&self) -> Option<serde_json::Value> {
        let data = std::fs::read_to_string(self.path().join("runner-data.json")).ok()?;
        Some(serde_json::from_str(&data).unwrap())
    }

    pub fn session(&self, mode: Mode) -> Session {
        Session::new(Layout::new(self.path()), mode, HOST)
            .with_retry(RetryPolicy::new(3, Duration::ZERO))
            .with_scheduler(None)
    }
}

pub fn template(with_access_token: bool) -> String {
    let pat = if with_access_token {
        "personal_access_token = \"pat\"\n"
    } else {
        ""
    };
    format!(
        r#"concurrent = 2
log_level = "info"

[metadata]
name = "test-group"

[[metadata.client_configs]]
url = "{GITLAB}"
registration_token = "reg-token"
{pat}
[[metadata.client_configs]]
url = "{OTHER}"
registration_token = "other-reg"
{pat}"#
    )
}

pub fn executor(url: &str, kind: &str) -> String {
    format!("url = \"{url}\"\nexecutor = \"{kind}\"\nbuilds_dir = \"/tmp/{{hostname}}\"\n")
}

pub fn description(name: &str) -> String {
    format!("{}-{}", HOST, name)
}
