//! Three-way diff between desired definitions, known credentials and the
//! liveness verdicts gathered for them. No I/O happens here.

use std::collections::{BTreeMap, BTreeSet};

use crate::client::RegisteredExecutor;
use crate::definition::{ExecutorDefinition, ExecutorKey};

/// Identifies a runner across targets: ids are only unique per service.
pub type RunnerRef = (String, u64);

pub fn runner_ref(runner: &RegisteredExecutor) -> RunnerRef {
    (runner.target_url.clone(), runner.id)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub to_register: Vec<ExecutorDefinition>,
    pub to_delete: Vec<RegisteredExecutor>,
    pub to_keep: BTreeMap<ExecutorKey, RegisteredExecutor>,
    /// Definitions whose registration replaces a dead credential; the
    /// replacement only proceeds once those deletes succeed.
    pub replaces: BTreeMap<ExecutorKey, Vec<RunnerRef>>,
}

impl Plan {
    /// Nothing to register or delete.
    pub fn is_converged(&self) -> bool {
        self.to_register.is_empty() && self.to_delete.is_empty()
    }
}

/// Known credentials matched to some desired definition that carry a token;
/// these are the ones worth a liveness check.
pub fn validation_candidates<'a>(
    desired: &[ExecutorDefinition],
    known: &'a [RegisteredExecutor],
) -> Vec<&'a RegisteredExecutor> {
    known
        .iter()
        .filter(|k| k.has_token() && desired.iter().any(|d| k.matches(d)))
        .collect()
}

/// Compute what to register, delete and keep.
///
/// Each definition keeps the first matching credential that has a token and
/// is not in `dead`. Every other known credential is deleted: unmatched
/// ones, dead or tokenless ones, and duplicates of a kept one.
pub fn diff(
    desired: &[ExecutorDefinition],
    known: &[RegisteredExecutor],
    dead: &BTreeSet<RunnerRef>,
) -> Plan {
    let mut plan = Plan::default();
    let mut claimed = vec![false; known.len()];

    for definition in desired {
        let key = definition.key();
        let mut kept = false;
        let mut replaced = Vec::new();

        for (idx, runner) in known.iter().enumerate() {
            if claimed[idx] || !runner.matches(definition) {
                continue;
            }
            claimed[idx] = true;
            let live = runner.has_token() && !dead.contains(&runner_ref(runner));
            if live && !kept {
                plan.to_keep.insert(key.clone(), runner.clone());
                kept = true;
            } else {
                if !live {
                    replaced.push(runner_ref(runner));
                }
                plan.to_delete.push(runner.clone());
            }
        }

        if !kept {
            plan.to_register.push(definition.clone());
            if !replaced.is_empty() {
                plan.replaces.insert(key, replaced);
            }
        }
    }

    for (idx, runner) in known.iter().enumerate() {
        if !claimed[idx] {
            plan.to_delete.push(runner.clone());
        }
    }
    plan.to_delete
        .sort_by(|a, b| runner_ref(a).cmp(&runner_ref(b)));
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::TagSet;

    const URL: &str = "https://gitlab.example.com";

    fn definition(name: &str, kind: &str) -> ExecutorDefinition {
        ExecutorDefinition {
            name: name.into(),
            target_url: URL.into(),
            kind: kind.into(),
            description: format!("host1-{}", name),
            tags: TagSet::new(),
            properties: toml::Table::new(),
            source: format!("{}.toml", name).into(),
        }
    }

    fn runner(id: u64, name: &str, kind: &str) -> RegisteredExecutor {
        RegisteredExecutor {
            id,
            token: Some(format!("tok-{}", id)),
            target_url: URL.into(),
            description: format!("host1-{}", name),
            kind: Some(kind.into()),
            tags: TagSet::new(),
        }
    }

    #[test]
    fn empty_inputs_produce_empty_plan() {
        let plan = diff(&[], &[], &BTreeSet::new());
        assert!(plan.is_converged());
        assert!(plan.to_keep.is_empty());
    }

    #[test]
    fn missing_definitions_are_registered() {
        let desired = [definition("shell", "shell"), definition("batch", "batch")];
        let plan = diff(&desired, &[], &BTreeSet::new());
        assert_eq!(plan.to_register.len(), 2);
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn matched_live_credentials_are_kept() {
        let desired = [definition("shell", "shell")];
        let known = [runner(1, "shell", "shell")];
        let plan = diff(&desired, &known, &BTreeSet::new());
        assert!(plan.is_converged());
        assert_eq!(plan.to_keep[&desired[0].key()].id, 1);
    }

    #[test]
    fn unmatched_credentials_are_deleted() {
        let known = [runner(1, "old", "shell")];
        let plan = diff(&[], &known, &BTreeSet::new());
        assert_eq!(plan.to_delete, known.to_vec());
        assert!(plan.replaces.is_empty());
    }

    #[test]
    fn kind_change_deletes_and_registers() {
        let desired = [definition("ci", "docker")];
        let known = [runner(7, "ci", "shell")];
        let plan = diff(&desired, &known, &BTreeSet::new());
        assert_eq!(plan.to_delete[0].id, 7);
        assert_eq!(plan.to_register[0].kind, "docker");
        assert!(plan.replaces.is_empty());
    }

    #[test]
    fn dead_credentials_are_replaced() {
        let desired = [definition("shell", "shell")];
        let known = [runner(3, "shell", "shell")];
        let dead = BTreeSet::from([(URL.to_string(), 3)]);
        let plan = diff(&desired, &known, &dead);
        assert_eq!(plan.to_delete[0].id, 3);
        assert_eq!(plan.to_register.len(), 1);
        assert_eq!(plan.replaces[&desired[0].key()], vec![(URL.to_string(), 3)]);
    }

    #[test]
    fn duplicates_keep_one_and_delete_the_rest() {
        let desired = [definition("shell", "shell")];
        let known = [runner(4, "shell", "shell"), runner(5, "shell", "shell")];
        let plan = diff(&desired, &known, &BTreeSet::new());
        assert_eq!(plan.to_keep[&desired[0].key()].id, 4);
        assert_eq!(plan.to_delete.len(), 1);
        assert_eq!(plan.to_delete[0].id, 5);
        assert!(plan.to_register.is_empty());
    }

    #[test]
    fn tokenless_listing_is_replaced() {
        let desired = [definition("shell", "shell")];
        let mut listed = runner(9, "shell", "shell");
        listed.token = None;
        let plan = diff(&desired, &[listed], &BTreeSet::new());
        assert_eq!(plan.to_delete[0].id, 9);
        assert_eq!(plan.to_register.len(), 1);
    }

    #[test]
    fn kind_inferred_from_tags_when_not_recorded() {
        let desired = [definition("shell", "shell")];
        let mut listed = runner(2, "shell", "shell");
        listed.kind = None;
        listed.tags = TagSet::from(["shell".to_string()]);
        let plan = diff(&desired, &[listed], &BTreeSet::new());
        assert!(plan.is_converged());
    }

    #[test]
    fn candidates_skip_unmatched_and_tokenless() {
        let desired = [definition("shell", "shell")];
        let mut tokenless = runner(2, "shell", "shell");
        tokenless.token = None;
        let known = [runner(1, "shell", "shell"), tokenless, runner(3, "other", "shell")];
        let ids: Vec<u64> = validation_candidates(&desired, &known)
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![1]);
    }
}
