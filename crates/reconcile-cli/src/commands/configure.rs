use crate::dispatch::{self, Options};

pub async fn run(options: &Options) -> anyhow::Result<()> {
    let session = dispatch::create_session(options)?;
    let client = dispatch::create_client(options)?;

    let report = session.configure(&client).await?;

    println!(
        "Configured {} executor(s): {} kept, {} registered, {} adopted, {} deleted",
        report.executors,
        report.stats.kept,
        report.stats.registered,
        report.stats.adopted,
        report.stats.deleted,
    );
    println!("Wrote {}", report.output.display());
    if report.credentials_written {
        println!("Updated {}", session.layout().data_file().display());
    }

    Ok(())
}
