use crate::dispatch::{self, Options};
use reconcile_core::ExecutorDefinition;

pub async fn run(options: &Options, json: bool) -> anyhow::Result<()> {
    let session = dispatch::create_session(options)?;
    let inputs = session.load()?;

    if inputs.definitions.is_empty() {
        println!(
            "No executors declared in {}.",
            session.layout().executors_dir().display()
        );
        return Ok(());
    }

    if json {
        let entries: Vec<serde_json::Value> = inputs
            .definitions
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "executor": d.kind,
                    "url": d.target_url,
                    "description": d.description,
                    "tags": d.tags,
                    "source": d.source,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        print_table(&inputs.definitions);
    }

    Ok(())
}

fn print_table(definitions: &[ExecutorDefinition]) {
    println!(
        "{:<15} {:<12} {:<25} {:<30} {}",
        "NAME", "EXECUTOR", "DESCRIPTION", "URL", "TAGS"
    );
    println!("{}", "-".repeat(100));
    for d in definitions {
        println!(
            "{:<15} {:<12} {:<25} {:<30} {}",
            d.name,
            d.kind,
            d.description,
            d.target_url,
            d.tags.iter().cloned().collect::<Vec<_>>().join(", "),
        );
    }
}
