/// Store access layer
///
/// The `servers` table lives in a local LibSQL (SQLite) file that is created
/// and populated by external tooling. This layer only claims rows and writes
/// back check results.

pub mod models;
pub mod repository;
pub mod schema;

pub use models::ServerRecord;
pub use repository::{DatabaseImpl, ServerStore};

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::pool::{LibsqlPool, build_pool};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unable to locate servers database at {0}")]
    Missing(PathBuf),
}

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    schema::ensure_servers_table(conn).await
}

/// Open the store file and return a ready connection pool.
///
/// The file must already exist: the LibSQL builder would otherwise create an
/// empty database silently.
pub async fn open_store(path: &Path, max_connections: usize) -> Result<LibsqlPool> {
    if !path.is_file() {
        return Err(StoreError::Missing(path.to_path_buf()).into());
    }

    let database = libsql::Builder::new_local(path)
        .build()
        .await
        .with_context(|| format!("unable to open servers database at {}", path.display()))?;
    let pool = build_pool(database, max_connections)?;

    let conn = pool.get().await.context("unable to connect to servers database")?;
    initialize_database(&conn).await.context("unable to prepare servers schema")?;

    Ok(pool)
}
