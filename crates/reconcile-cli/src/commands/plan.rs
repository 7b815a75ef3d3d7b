use crate::dispatch::{self, Options};
use reconcile_core::reconcile::{ReconcilePlan, TargetPlan};

/// Read-only: token checks and listings happen, nothing is registered,
/// deleted or written.
pub async fn run(options: &Options, json: bool) -> anyhow::Result<()> {
    let session = dispatch::create_session(options)?;
    let client = dispatch::create_client(options)?;

    let (inputs, plan) = session.plan(&client).await?;

    if json {
        let targets: Vec<serde_json::Value> = plan.targets.iter().map(target_json).collect();
        let failures: Vec<String> = plan.failures.iter().map(|f| f.to_string()).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "mode": inputs.store.mode().to_string(),
                "converged": plan.is_converged(),
                "targets": targets,
                "failures": failures,
            }))?
        );
    } else {
        print_plan(&plan);
    }

    Ok(())
}

fn target_json(t: &TargetPlan) -> serde_json::Value {
    serde_json::json!({
        "url": t.target.url,
        "register": t.plan.to_register.iter().map(|d| &d.name).collect::<Vec<_>>(),
        "delete": t.plan.to_delete.iter().map(|r| serde_json::json!({
            "id": r.id,
            "description": r.description,
        })).collect::<Vec<_>>(),
        "keep": t.plan.to_keep.iter().map(|(k, r)| serde_json::json!({
            "name": k.name,
            "id": r.id,
        })).collect::<Vec<_>>(),
        "unverified": t.unverified.iter().map(|r| r.id).collect::<Vec<_>>(),
    })
}

fn print_plan(plan: &ReconcilePlan) {
    if plan.targets.is_empty() {
        println!("No targets configured.");
        return;
    }

    println!("{:<10} {:<30} {:<10} {}", "ACTION", "URL", "ID", "EXECUTOR");
    println!("{}", "-".repeat(70));
    for t in &plan.targets {
        for r in &t.plan.to_delete {
            println!("{:<10} {:<30} {:<10} {}", "delete", t.target.url, r.id, r.description);
        }
        for d in &t.plan.to_register {
            println!("{:<10} {:<30} {:<10} {}", "register", t.target.url, "-", d.description);
        }
        for (k, r) in &t.plan.to_keep {
            println!("{:<10} {:<30} {:<10} {}", "keep", t.target.url, r.id, k.name);
        }
        for r in &t.unverified {
            println!("{:<10} {:<30} {:<10} {}", "unchecked", t.target.url, r.id, r.description);
        }
    }

    for failure in &plan.failures {
        println!("Warning: {}", failure);
    }
    if plan.is_converged() {
        println!("Up to date.");
    }
}
