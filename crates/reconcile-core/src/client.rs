use serde::{Deserialize, Serialize};

use crate::config::ClientTarget;
use crate::definition::ExecutorDefinition;
use crate::error::ClientError;
use crate::tags::TagSet;

/// An executor as known to the coordination service or persisted locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisteredExecutor {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, rename = "url")]
    pub target_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "executor", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub tags: TagSet,
}

impl RegisteredExecutor {
    /// Whether this credential is the remote counterpart of `definition`.
    pub fn matches(&self, definition: &ExecutorDefinition) -> bool {
        if self.target_url != definition.target_url || self.description != definition.description
        {
            return false;
        }
        match &self.kind {
            Some(kind) => *kind == definition.kind,
            None => self.tags.contains(&definition.kind),
        }
    }

    pub fn has_token(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// The coordination service's runner registration API.
///
/// `delete` treats "already gone" as success. Implementations perform a
/// single attempt; retries and ambiguity handling belong to the reconciler.
#[async_trait::async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Obtain a new id and token for `definition` using the target's
    /// registration token.
    async fn register(
        &self,
        target: &ClientTarget,
        definition: &ExecutorDefinition,
    ) -> Result<RegisteredExecutor, ClientError>;

    /// Remove a runner, by id when an access token is available, otherwise
    /// by its own token.
    async fn delete(
        &self,
        target: &ClientTarget,
        runner: &RegisteredExecutor,
    ) -> Result<(), ClientError>;

    /// Check whether a runner token still authenticates.
    async fn verify(&self, target: &ClientTarget, token: &str) -> Result<bool, ClientError>;

    /// All runners attributed to `host`, with details, via the target's
    /// personal access token.
    async fn fetch_attributed(
        &self,
        target: &ClientTarget,
        host: &str,
    ) -> Result<Vec<RegisteredExecutor>, ClientError>;
}
