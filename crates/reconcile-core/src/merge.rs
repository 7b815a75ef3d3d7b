use toml::Value;

use crate::config::RunnerTemplate;
use crate::definition::ExecutorDefinition;
use crate::error::RenderError;
use crate::reconcile::ReconciliationResult;
use crate::render::{self, render_table, Substitutions};

/// The substitution context: host-wide values once, then id, token and tags
/// of every reconciled executor under its name. The loader rejects executor
/// names that would shadow the host-wide keys.
pub fn substitutions(
    template: &RunnerTemplate,
    hostname: &str,
    result: &ReconciliationResult,
) -> Substitutions {
    let mut context = Substitutions::new();
    context.insert("hostname".into(), hostname.to_string());
    context.insert("name".into(), template.name.clone());

    for (key, runner) in &result.entries {
        let token = runner.token.clone().unwrap_or_default();
        let tags = runner.tags.iter().cloned().collect::<Vec<_>>().join(",");
        context.insert(key.name.clone(), token.clone());
        context.insert(format!("{}.token", key.name), token);
        context.insert(format!("{}.id", key.name), runner.id.to_string());
        context.insert(format!("{}.tags", key.name), tags);
    }
    context
}

/// Template settings and runner sections with all placeholders resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedConfig {
    pub settings: toml::Table,
    pub runners: Vec<toml::Table>,
}

impl MergedConfig {
    /// Final config text; no `runners` key when there are no executors.
    pub fn to_toml(&self) -> Result<String, RenderError> {
        let mut document = self.settings.clone();
        if !self.runners.is_empty() {
            document.insert(
                "runners".into(),
                Value::Array(self.runners.iter().cloned().map(Value::Table).collect()),
            );
        }
        render::to_toml(&document)
    }
}

/// Combine the reconciled credentials with the template. Every declared
/// executor must have a credential; a missing one is an error rather than
/// an omitted section.
pub fn merge(
    template: &RunnerTemplate,
    definitions: &[ExecutorDefinition],
    result: &ReconciliationResult,
    hostname: &str,
) -> Result<MergedConfig, RenderError> {
    let context = substitutions(template, hostname, result);
    let settings = render_table(&template.settings, &context)?;

    let mut runners = Vec::with_capacity(definitions.len());
    for definition in definitions {
        let runner = result
            .entries
            .get(&definition.key())
            .ok_or_else(|| RenderError::Unreconciled(definition.name.clone()))?;
        let id = i64::try_from(runner.id)
            .map_err(|_| RenderError::Serialize(format!("runner id {} out of range", runner.id)))?;

        let mut section = render_table(&definition.properties, &context)?;
        section.insert("name".into(), Value::String(definition.description.clone()));
        section.insert("url".into(), Value::String(definition.target_url.clone()));
        section.insert("id".into(), Value::Integer(id));
        section.insert(
            "token".into(),
            Value::String(runner.token.clone().unwrap_or_default()),
        );
        section.insert("executor".into(), Value::String(definition.kind.clone()));
        runners.push(section);
    }

    Ok(MergedConfig { settings, runners })
}
