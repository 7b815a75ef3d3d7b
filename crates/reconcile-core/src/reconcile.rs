use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::client::{CoordinationClient, RegisteredExecutor};
use crate::config::{ClientTarget, RunnerTemplate};
use crate::definition::{ExecutorDefinition, ExecutorKey};
use crate::diff::{diff, runner_ref, validation_candidates, Plan, RunnerRef};
use crate::error::{ClientError, ExecutorFailure, Operation};
use crate::retry::RetryPolicy;

/// Outcome of one reconciliation pass across all targets.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationResult {
    /// One valid credential per declared executor that converged.
    pub entries: BTreeMap<ExecutorKey, RegisteredExecutor>,
    /// Known credentials that must stay on record: stale ones whose delete
    /// failed, and ones that could not be validated.
    pub retained: Vec<RegisteredExecutor>,
    pub failures: Vec<ExecutorFailure>,
    pub stats: RunStats,
}

impl ReconciliationResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub kept: usize,
    pub registered: usize,
    pub adopted: usize,
    pub deleted: usize,
}

/// The diff for one target together with what could not be validated.
#[derive(Debug, Clone)]
pub struct TargetPlan {
    pub target: ClientTarget,
    pub plan: Plan,
    /// Credentials left untouched because validation failed.
    pub unverified: Vec<RegisteredExecutor>,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    pub targets: Vec<TargetPlan>,
    pub failures: Vec<ExecutorFailure>,
}

impl ReconcilePlan {
    pub fn is_converged(&self) -> bool {
        self.failures.is_empty() && self.targets.iter().all(|t| t.plan.is_converged())
    }
}

/// Converges desired executors with known credentials, target by target.
pub struct Reconciler<'a> {
    client: &'a dyn CoordinationClient,
    hostname: &'a str,
    retry: RetryPolicy,
    validate: bool,
}

impl<'a> Reconciler<'a> {
    pub fn new(client: &'a dyn CoordinationClient, hostname: &'a str) -> Self {
        Self {
            client,
            hostname,
            retry: RetryPolicy::default(),
            validate: true,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Whether to check token liveness of matched credentials.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Validation pass and diff for every target. Issues read-only calls
    /// only.
    pub async fn plan(
        &self,
        template: &RunnerTemplate,
        definitions: &[ExecutorDefinition],
        known: &[RegisteredExecutor],
    ) -> ReconcilePlan {
        let mut result = ReconcilePlan::default();

        for target in targets_for(template, known) {
            let desired: Vec<ExecutorDefinition> = definitions
                .iter()
                .filter(|d| d.target_url == target.url)
                .cloned()
                .collect();
            let mut known_here: Vec<RegisteredExecutor> = known
                .iter()
                .filter(|k| k.target_url == target.url)
                .cloned()
                .collect();

            let mut dead = BTreeSet::new();
            let mut unverifiable = BTreeSet::new();
            if self.validate {
                for runner in validation_candidates(&desired, &known_here) {
                    let token = runner.token.as_deref().unwrap_or_default();
                    match self
                        .retry
                        .run_read("verify token", || self.client.verify(&target, token))
                        .await
                    {
                        Ok(true) => debug!("Runner {} on {} is live", runner.id, target.url),
                        Ok(false) => {
                            info!("Runner {} on {} has a dead token", runner.id, target.url);
                            dead.insert(runner_ref(runner));
                        }
                        Err(e) => {
                            let definition = desired.iter().find(|d| runner.matches(d));
                            if let Some(definition) = definition {
                                warn!("Could not validate {}: {}", definition.key(), e);
                                result.failures.push(ExecutorFailure::new(
                                    definition.key(),
                                    Operation::Validate,
                                    e,
                                ));
                                unverifiable.insert(definition.key());
                            }
                        }
                    }
                }
            }

            // Leave executors we could not validate exactly as they are.
            let (held, desired): (Vec<_>, Vec<_>) = desired
                .into_iter()
                .partition(|d| unverifiable.contains(&d.key()));
            let mut unverified = Vec::new();
            known_here.retain(|k| {
                if held.iter().any(|d| k.matches(d)) {
                    unverified.push(k.clone());
                    false
                } else {
                    true
                }
            });

            let plan = diff(&desired, &known_here, &dead);
            debug!(
                "Plan for {}: keep {}, register {}, delete {}",
                target.url,
                plan.to_keep.len(),
                plan.to_register.len(),
                plan.to_delete.len()
            );
            result.targets.push(TargetPlan {
                target,
                plan,
                unverified,
            });
        }

        result
    }

    /// Full pass: plan, then per target delete stale credentials before
    /// registering missing ones. Per-executor failures are collected and
    /// never stop sibling executors or targets.
    pub async fn reconcile(
        &self,
        template: &RunnerTemplate,
        definitions: &[ExecutorDefinition],
        known: &[RegisteredExecutor],
    ) -> ReconciliationResult {
        let planned = self.plan(template, definitions, known).await;
        let mut result = ReconciliationResult {
            failures: planned.failures,
            ..Default::default()
        };

        for TargetPlan {
            target,
            plan,
            unverified,
        } in planned.targets
        {
            result.retained.extend(unverified);
            let known_ids: BTreeSet<u64> = known
                .iter()
                .filter(|k| k.target_url == target.url)
                .map(|k| k.id)
                .collect();

            let mut failed_deletes: BTreeSet<RunnerRef> = BTreeSet::new();
            for runner in &plan.to_delete {
                match self.delete(&target, runner).await {
                    Ok(()) => {
                        info!("Deleted runner {} ({}) on {}", runner.id, runner.description, target.url);
                        result.stats.deleted += 1;
                    }
                    Err(e) => {
                        warn!("Failed to delete runner {} on {}: {}", runner.id, target.url, e);
                        result.failures.push(ExecutorFailure::new(
                            key_for_runner(runner, self.hostname),
                            Operation::Delete,
                            e,
                        ));
                        failed_deletes.insert(runner_ref(runner));
                        result.retained.push(runner.clone());
                    }
                }
            }

            for definition in &plan.to_register {
                let key = definition.key();
                let blocked = plan
                    .replaces
                    .get(&key)
                    .is_some_and(|refs| refs.iter().any(|r| failed_deletes.contains(r)));
                if blocked {
                    result.failures.push(ExecutorFailure::new(
                        key,
                        Operation::Register,
                        "previous credential could not be deleted",
                    ));
                    continue;
                }

                match self.register(&target, definition, &known_ids).await {
                    Ok(Registration::Created(runner)) => {
                        info!("Registered {} as runner {}", key, runner.id);
                        result.stats.registered += 1;
                        result.entries.insert(key, runner);
                    }
                    Ok(Registration::Adopted(runner)) => {
                        info!("Adopted runner {} for {} after ambiguous registration", runner.id, key);
                        result.stats.adopted += 1;
                        result.entries.insert(key, runner);
                    }
                    Err(e) => {
                        warn!("Failed to register {}: {}", key, e);
                        result
                            .failures
                            .push(ExecutorFailure::new(key, Operation::Register, e));
                    }
                }
            }

            result.stats.kept += plan.to_keep.len();
            result.entries.extend(plan.to_keep);
        }

        result
    }

    /// Register `definition`. An ambiguous failure is resolved by listing
    /// the target's runners: a new runner carrying the definition's identity
    /// is adopted instead of registering a second one.
    async fn register(
        &self,
        target: &ClientTarget,
        definition: &ExecutorDefinition,
        known_ids: &BTreeSet<u64>,
    ) -> Result<Registration, ClientError> {
        let mut attempt = 1;
        loop {
            let err = match self
                .retry
                .run("register", || self.client.register(target, definition))
                .await
            {
                Ok(runner) => return Ok(Registration::Created(runner)),
                Err(e) if e.is_ambiguous() => e,
                Err(e) => return Err(e),
            };

            if target.access_token().is_none() {
                warn!(
                    "Registration of {} is ambiguous and {} has no access token to check",
                    definition.key(),
                    target.url
                );
                return Err(err);
            }

            warn!("Registration of {} is ambiguous ({}), re-fetching", definition.key(), err);
            let listed = self.fetch(target).await?;
            let mut orphans = Vec::new();
            for mut runner in listed {
                if known_ids.contains(&runner.id) || !runner.matches(definition) {
                    continue;
                }
                if runner.has_token() {
                    runner.kind = Some(definition.kind.clone());
                    return Ok(Registration::Adopted(runner));
                }
                orphans.push(runner);
            }
            for orphan in &orphans {
                if let Err(e) = self.delete(target, orphan).await {
                    warn!("Failed to remove unusable runner {}: {}", orphan.id, e);
                }
            }

            if attempt >= self.retry.max_attempts {
                return Err(err);
            }
            attempt += 1;
        }
    }

    /// Delete `runner`. After an ambiguous failure the target is re-listed
    /// when possible; a runner no longer listed counts as deleted.
    async fn delete(
        &self,
        target: &ClientTarget,
        runner: &RegisteredExecutor,
    ) -> Result<(), ClientError> {
        let mut attempt = 1;
        loop {
            let err = match self
                .retry
                .run("delete", || self.client.delete(target, runner))
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_ambiguous() => e,
                Err(e) => return Err(e),
            };

            if target.access_token().is_some() {
                warn!("Delete of runner {} is ambiguous ({}), re-fetching", runner.id, err);
                let listed = self.fetch(target).await?;
                if listed.iter().all(|r| r.id != runner.id) {
                    return Ok(());
                }
            }
            if attempt >= self.retry.max_attempts {
                return Err(err);
            }
            attempt += 1;
        }
    }

    async fn fetch(&self, target: &ClientTarget) -> Result<Vec<RegisteredExecutor>, ClientError> {
        self.retry
            .run_read("list runners", || {
                self.client.fetch_attributed(target, self.hostname)
            })
            .await
    }
}

enum Registration {
    Created(RegisteredExecutor),
    Adopted(RegisteredExecutor),
}

/// Template targets in order, then targets only known from credentials
/// (removed from the template) so their runners get cleaned up.
fn targets_for(template: &RunnerTemplate, known: &[RegisteredExecutor]) -> Vec<ClientTarget> {
    let mut targets = template.targets.clone();
    let orphaned: BTreeSet<&str> = known
        .iter()
        .map(|k| k.target_url.as_str())
        .filter(|url| template.find_target(url).is_none())
        .collect();
    targets.extend(orphaned.into_iter().map(ClientTarget::orphan));
    targets
}

/// Best-effort identity for a credential with no declaration.
fn key_for_runner(runner: &RegisteredExecutor, hostname: &str) -> ExecutorKey {
    let prefix = format!("{}-", hostname);
    let name = runner
        .description
        .strip_prefix(&prefix)
        .unwrap_or(&runner.description);
    ExecutorKey {
        target_url: runner.target_url.clone(),
        kind: runner.kind.clone().unwrap_or_else(|| "unknown".into()),
        name: if name.is_empty() {
            format!("runner-{}", runner.id)
        } else {
            name.to_string()
        },
    }
}
