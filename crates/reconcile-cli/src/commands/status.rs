use crate::dispatch::{self, Options};
use reconcile_core::{CredentialStore, RegisteredExecutor};

pub async fn run(options: &Options, json: bool) -> anyhow::Result<()> {
    let session = dispatch::create_session(options)?;
    let inputs = session.load()?;

    let file = match &inputs.store {
        CredentialStore::Persisted(file) => file,
        CredentialStore::Queried => {
            println!("Stateless mode keeps no local credentials; use `plan --stateless` to query the service.");
            return Ok(());
        }
    };

    // Tokens never leave the credential file.
    if json {
        let entries: Vec<serde_json::Value> = file
            .records()
            .iter()
            .map(|(name, r)| {
                serde_json::json!({
                    "name": name,
                    "id": r.id,
                    "url": r.target_url,
                    "executor": r.kind,
                    "description": r.description,
                    "tags": r.tags,
                    "has_token": r.has_token(),
                    "declared": is_declared(name, &inputs.definitions),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if file.records().is_empty() {
        println!("No credentials recorded in {}.", file.path().display());
        return Ok(());
    }

    println!(
        "{:<15} {:<8} {:<12} {:<30} {:<8} {}",
        "NAME", "ID", "EXECUTOR", "URL", "TOKEN", "DECLARED"
    );
    println!("{}", "-".repeat(85));
    for (name, r) in file.records() {
        print_row(name, r, is_declared(name, &inputs.definitions));
    }

    Ok(())
}

fn is_declared(name: &str, definitions: &[reconcile_core::ExecutorDefinition]) -> bool {
    definitions.iter().any(|d| d.name == name)
}

fn print_row(name: &str, r: &RegisteredExecutor, declared: bool) {
    println!(
        "{:<15} {:<8} {:<12} {:<30} {:<8} {}",
        name,
        r.id,
        r.kind.as_deref().unwrap_or("-"),
        r.target_url,
        if r.has_token() { "yes" } else { "missing" },
        if declared { "yes" } else { "no" },
    );
}
