use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

use crate::database::{ServerRecord, ServerStore};

/// Writes a server's result fields back to the store.
///
/// Errors are returned to the caller, which treats them as fatal.
#[derive(Clone)]
pub struct ResultPersister {
    store: Arc<dyn ServerStore>,
}

impl ResultPersister {
    pub fn new(store: Arc<dyn ServerStore>) -> Self {
        Self { store }
    }

    pub async fn persist(&self, server: &ServerRecord) -> Result<()> {
        self.store
            .save_results(server)
            .await
            .with_context(|| format!("unable to persist results for server {}", server.id))?;

        debug!(server = %server.hostname, id = server.id, "Results persisted");
        Ok(())
    }
}
