use dotenv::dotenv;
use migrator::{Dependencies, MigratorError};
use tracing::info;

/// Entry point for the batch data migrator.
///
/// Initializes tracing and dotenv, wires up the application dependencies,
/// and runs one migration end to end.
#[tokio::main]
async fn main() -> Result<(), MigratorError> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .init();
    dotenv().ok();

    info!("Starting batch data migration");
    let dependencies = Dependencies::new().await?;

    let summary = dependencies
        .orchestrator
        .run(
            dependencies.source.as_ref(),
            dependencies.destination.as_ref(),
        )
        .await?;

    info!(
        "Done: {} records migrated across {} entity types ({} skipped)",
        summary.total_records,
        summary.copied.len(),
        summary.skipped.len()
    );
    Ok(())
}
