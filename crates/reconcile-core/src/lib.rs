pub mod client;
pub mod config;
pub mod credentials;
pub mod definition;
pub mod diff;
pub mod error;
pub mod merge;
pub mod reconcile;
pub mod render;
pub mod retry;
pub mod session;
pub mod tags;

pub use client::{CoordinationClient, RegisteredExecutor};
pub use config::{ClientTarget, Layout, Mode, RunnerTemplate};
pub use credentials::{CredentialFile, CredentialStore};
pub use definition::{DefinitionLoader, ExecutorDefinition, ExecutorKey};
pub use error::{ClientError, ExecutorFailure, LoadError, Operation, ReconcileError, RenderError, StoreError};
pub use reconcile::{ReconciliationResult, Reconciler};
pub use retry::RetryPolicy;
pub use session::{RunReport, Session};
