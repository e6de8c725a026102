mod config;
mod database;
mod monitoring;
mod pool;

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::Config;
use crate::database::DatabaseImpl;
use crate::monitoring::{CycleScheduler, ProbeSet, ResultPersister, ServerCheckRunner};

/// Connections kept open to the servers database
const MAX_STORE_CONNECTIONS: usize = 8;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    logger::init();

    // Only store and configuration errors reach this point; all are fatal.
    if let Err(err) = run().await {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    info!("{config}");

    let pool = database::open_store(&config.database_path, MAX_STORE_CONNECTIONS).await?;
    let store = Arc::new(DatabaseImpl::new_from_pool(pool));

    let runner = ServerCheckRunner::new(
        ProbeSet::standard()?,
        ResultPersister::new(store.clone()),
        config.check_timeout,
        config.persist_order,
    );

    info!("Starting check scheduler");
    CycleScheduler::new(&config, store, runner).run().await
}
