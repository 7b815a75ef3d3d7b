use std::path::PathBuf;
use tracing::{debug, info};

use crate::client::CoordinationClient;
use crate::config::{check_owner_only, Layout, Mode, RunnerTemplate};
use crate::credentials::{write_atomic, CredentialStore};
use crate::definition::{DefinitionLoader, ExecutorDefinition};
use crate::error::ReconcileError;
use crate::merge::merge;
use crate::reconcile::{ReconcilePlan, Reconciler, RunStats};
use crate::retry::RetryPolicy;
use crate::tags::{SystemTags, TagCapture, TagSchema, TagValidator};

/// Everything read from the prefix before any remote call.
#[derive(Debug)]
pub struct Inputs {
    pub template: RunnerTemplate,
    pub definitions: Vec<ExecutorDefinition>,
    pub store: CredentialStore,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub stats: RunStats,
    pub executors: usize,
    pub output: PathBuf,
    pub credentials_written: bool,
}

/// One invocation against one prefix.
pub struct Session {
    layout: Layout,
    mode: Mode,
    hostname: String,
    retry: RetryPolicy,
    capture: Box<dyn TagCapture>,
    validator: Option<Box<dyn TagValidator>>,
    scheduler: Option<Option<String>>,
}

impl Session {
    pub fn new(layout: Layout, mode: Mode, hostname: impl Into<String>) -> Self {
        let hostname = hostname.into();
        Self {
            layout,
            mode,
            capture: Box::new(SystemTags::new(hostname.clone())),
            hostname,
            retry: RetryPolicy::default(),
            validator: None,
            scheduler: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_tag_capture(mut self, capture: Box<dyn TagCapture>) -> Self {
        self.capture = capture;
        self
    }

    /// Use `validator` instead of the prefix's `tag-schema.json`.
    pub fn with_tag_validator(mut self, validator: Box<dyn TagValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Fix the scheduler tag for batch executors instead of probing PATH.
    pub fn with_scheduler(mut self, scheduler: Option<&str>) -> Self {
        self.scheduler = Some(scheduler.map(str::to_string));
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Read the template, declarations and credential store. Any problem
    /// here is fatal and happens before the service is contacted.
    pub fn load(&self) -> Result<Inputs, ReconcileError> {
        check_owner_only(self.layout.prefix())?;
        let template = RunnerTemplate::load_from(&self.layout.template_path())?;

        let schema = match &self.validator {
            Some(_) => None,
            None => TagSchema::load_optional(&self.layout.tag_schema_path())?,
        };
        let validator: Option<&dyn TagValidator> = match (&self.validator, &schema) {
            (Some(v), _) => Some(v.as_ref()),
            (None, Some(s)) => Some(s),
            (None, None) => None,
        };

        let mut loader = DefinitionLoader::new(&self.hostname, self.capture.as_ref());
        if let Some(validator) = validator {
            loader = loader.with_validator(validator);
        }
        if let Some(scheduler) = &self.scheduler {
            loader = loader.with_scheduler(scheduler.as_deref());
        }
        let definitions = loader.load_dir(&self.layout.executors_dir(), &template)?;

        let store = CredentialStore::open(self.mode, &self.layout.data_file(), &definitions)?;
        debug!(
            "Loaded {} target(s), {} executor(s), {} mode",
            template.targets.len(),
            definitions.len(),
            self.mode
        );
        Ok(Inputs {
            template,
            definitions,
            store,
        })
    }

    fn reconciler<'a>(&'a self, client: &'a dyn CoordinationClient, store: &CredentialStore) -> Reconciler<'a> {
        Reconciler::new(client, &self.hostname)
            .with_retry(self.retry)
            .with_validation(store.needs_validation())
    }

    /// Compute the plan without mutating anything locally or remotely.
    pub async fn plan(
        &self,
        client: &dyn CoordinationClient,
    ) -> Result<(Inputs, ReconcilePlan), ReconcileError> {
        let inputs = self.load()?;
        let known = inputs
            .store
            .known(client, &inputs.template, &self.hostname, &self.retry)
            .await?;
        let plan = self
            .reconciler(client, &inputs.store)
            .plan(&inputs.template, &inputs.definitions, &known)
            .await;
        Ok((inputs, plan))
    }

    /// The full pass: reconcile, record credentials, and write the config
    /// only when every declared executor converged.
    pub async fn configure(&self, client: &dyn CoordinationClient) -> Result<RunReport, ReconcileError> {
        let Inputs {
            template,
            definitions,
            mut store,
        } = self.load()?;

        let known = store
            .known(client, &template, &self.hostname, &self.retry)
            .await?;
        let result = self
            .reconciler(client, &store)
            .reconcile(&template, &definitions, &known)
            .await;

        // Recorded even after partial failure so fresh registrations are
        // not forgotten.
        let credentials_written = store.commit(&result)?;

        if !result.is_complete() {
            return Err(ReconcileError::Incomplete(result.failures));
        }

        let merged = merge(&template, &definitions, &result, &self.hostname)?;
        let text = merged.to_toml()?;
        let output = self.layout.output_path();
        write_atomic(&output, text.as_bytes()).map_err(|source| ReconcileError::Output {
            path: output.clone(),
            source,
        })?;
        info!(
            "Wrote {} with {} executor(s) (kept {}, registered {}, adopted {}, deleted {})",
            output.display(),
            definitions.len(),
            result.stats.kept,
            result.stats.registered,
            result.stats.adopted,
            result.stats.deleted
        );

        Ok(RunReport {
            stats: result.stats,
            executors: definitions.len(),
            output,
            credentials_written,
        })
    }
}
