use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::definition::ExecutorKey;

/// Local declarations or the template could not be turned into a desired state.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid declaration {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("tags for executor '{name}' rejected by tag schema: {reason}")]
    TagSchema { name: String, reason: String },

    #[error("{path} is accessible by group or other (mode {mode:o}); restrict it to the owner")]
    Permissions { path: PathBuf, mode: u32 },
}

/// A call to the coordination service failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The request failed in transit. `ambiguous` is false only when the
    /// request provably never reached the service.
    #[error("transport error: {message}")]
    Transport { message: String, ambiguous: bool },

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),
}

impl ClientError {
    /// Remote state is unknown after this failure.
    pub fn is_ambiguous(&self) -> bool {
        match self {
            ClientError::Transport { ambiguous, .. } => *ambiguous,
            ClientError::Status { status, .. } => *status >= 500,
            ClientError::Decode(_) => true,
            ClientError::MissingCredential(_) => false,
        }
    }

    /// Safe to send again without consulting remote state first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport { ambiguous: false, .. })
    }
}

/// The known-credential set could not be established.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("credential file {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("failed to write credential file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a personal access token is required for stateless mode (target {0})")]
    MissingAccessToken(String),

    #[error("failed to list runners on {url}: {source}")]
    Remote {
        url: String,
        #[source]
        source: ClientError,
    },
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("template references unknown key '{0}'")]
    MissingKey(String),

    #[error("unterminated placeholder in '{0}'")]
    Unterminated(String),

    #[error("executor '{0}' has no reconciled credential")]
    Unreconciled(String),

    #[error("failed to serialize config: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Register,
    Delete,
    Validate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Register => write!(f, "register"),
            Operation::Delete => write!(f, "delete"),
            Operation::Validate => write!(f, "validate"),
        }
    }
}

/// One executor whose remote operation could not be completed.
#[derive(Debug, Clone)]
pub struct ExecutorFailure {
    pub key: ExecutorKey,
    pub operation: Operation,
    pub reason: String,
}

impl ExecutorFailure {
    pub fn new(key: ExecutorKey, operation: Operation, reason: impl fmt::Display) -> Self {
        Self {
            key,
            operation,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ExecutorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed for {}: {}", self.operation, self.key, self.reason)
    }
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("reconciliation incomplete, {} executor(s) failed:{}", .0.len(), list_failures(.0))]
    Incomplete(Vec<ExecutorFailure>),

    #[error("failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn list_failures(failures: &[ExecutorFailure]) -> String {
    failures.iter().map(|f| format!("\n  - {}", f)).collect()
}
