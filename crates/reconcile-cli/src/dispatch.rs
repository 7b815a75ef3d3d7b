use anyhow::Context;
use reconcile_core::tags::host_name;
use reconcile_core::{Layout, Mode, RetryPolicy, Session};
use reconcile_gitlab::GitLabClient;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Process-wide settings from the command line.
pub struct Options {
    pub prefix: PathBuf,
    pub stateless: bool,
    pub hostname: Option<String>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

impl Options {
    pub fn mode(&self) -> Mode {
        if self.stateless {
            Mode::Queried
        } else {
            Mode::Persisted
        }
    }
}

/// Build the session for this invocation's prefix and mode.
pub fn create_session(options: &Options) -> anyhow::Result<Session> {
    let hostname = match &options.hostname {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => host_name().context("could not determine hostname, pass --hostname")?,
    };
    let retry = RetryPolicy {
        max_attempts: options.max_attempts.max(1),
        ..RetryPolicy::default()
    };
    debug!(
        "Using prefix {} as {} in {} mode",
        options.prefix.display(),
        hostname,
        options.mode()
    );
    Ok(Session::new(Layout::new(&options.prefix), options.mode(), hostname).with_retry(retry))
}

/// Create the service client with the configured request timeout.
pub fn create_client(options: &Options) -> anyhow::Result<GitLabClient> {
    Ok(GitLabClient::new(Duration::from_secs(options.timeout_secs))?)
}
