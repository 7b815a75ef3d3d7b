use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::ClientError;

/// Bounded attempts per remote call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run a mutating call, retrying only failures that never reached the
    /// service.
    pub async fn run<T, F, Fut>(&self, what: &str, op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        self.run_while(what, ClientError::is_retryable, op).await
    }

    /// Run a read-only call; ambiguous failures are safe to repeat as well.
    pub async fn run_read<T, F, Fut>(&self, what: &str, op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        self.run_while(what, |e| e.is_retryable() || e.is_ambiguous(), op)
            .await
    }

    async fn run_while<T, F, Fut, P>(&self, what: &str, retry: P, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
        P: Fn(&ClientError) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if retry(&e) && attempt < self.max_attempts => {
                    warn!("{} failed (attempt {}/{}): {}", what, attempt, self.max_attempts, e);
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
