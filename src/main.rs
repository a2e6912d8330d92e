use std::path::Path;
use std::sync::Arc;

use frontierd::cli::{Cli, Commands};
use frontierd::clock::SystemClock;
use frontierd::registry::RunRegistry;
use frontierd::server::{router, spawn_maintenance_ticker, AppState};
use frontierd::snapshot::SnapshotStore;
use frontierd::stores::{FsBlobStore, SledPageStore};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Serve {
            bind,
            data_dir,
            cron_interval_secs,
        } => {
            let data_path = Path::new(&data_dir);
            frontierd::logging::init_logging(data_path.join("logs"))?;

            let db = sled::open(data_path.join("state"))?;
            let store = Arc::new(SnapshotStore::with_db(db.clone()));
            let clock = Arc::new(SystemClock);
            let registry = Arc::new(RunRegistry::new(store, clock));
            let blobs = Arc::new(FsBlobStore::new(data_path.join("blobs"))?);
            let pages = Arc::new(SledPageStore::new(&db)?);

            let state = AppState {
                registry: registry.clone(),
                blobs,
                pages,
            };

            let _ticker = spawn_maintenance_ticker(registry, cron_interval_secs);

            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!(%bind, data_dir = %data_dir, "coordinator listening");
            axum::serve(listener, router(state)).await?;
        }
    }

    Ok(())
}
