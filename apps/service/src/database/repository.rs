use anyhow::Result;
use async_trait::async_trait;
use libsql::{Row, params};

use super::models::{ProbeSlot, ServerRecord};
use crate::pool::LibsqlPool;

const SERVER_COLUMNS: &str = "id, hostname, ip, enablehttp, httpresult, enablestmp, smtpresult, \
                              smtpport, enablepop3, pop3result, enablehttps, httpsresult, \
                              enableping, pingresult, lastupdate";

/// Store operations the scheduler and check runners depend on
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Set `lastupdate = token` on up to `limit` rows whose `lastupdate` is
    /// older than `cutoff` (NULL counts as older), lowest `id` first.
    /// Returns the number of rows claimed.
    async fn claim_batch(&self, token: i64, cutoff: i64, limit: usize) -> Result<u64>;

    /// Rows whose `lastupdate` equals `token`, in `id` order
    async fn fetch_claimed(&self, token: i64) -> Result<Vec<ServerRecord>>;

    /// Write all five result columns of `server` in one statement
    async fn save_results(&self, server: &ServerRecord) -> Result<()>;
}

/// LibSQL store implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new store from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl ServerStore for DatabaseImpl {
    async fn claim_batch(&self, token: i64, cutoff: i64, limit: usize) -> Result<u64> {
        let conn = self.get_conn().await?;

        // SQLite has no LIMIT on UPDATE without a compile flag, so select ids first.
        let claimed = conn
            .execute(
                "UPDATE servers SET lastupdate = ?1
                 WHERE id IN (
                     SELECT id FROM servers
                     WHERE COALESCE(lastupdate, 0) < ?2
                     ORDER BY id
                     LIMIT ?3
                 )",
                params![token, cutoff, limit as i64],
            )
            .await?;

        Ok(claimed)
    }

    async fn fetch_claimed(&self, token: i64) -> Result<Vec<ServerRecord>> {
        let conn = self.get_conn().await?;
        let stmt = conn
            .prepare(&format!(
                "SELECT {SERVER_COLUMNS} FROM servers WHERE lastupdate = ? ORDER BY id"
            ))
            .await?;

        let mut rows = stmt.query(params![token]).await?;
        let mut servers = Vec::new();

        while let Some(row) = rows.next().await? {
            servers.push(server_from_row(&row)?);
        }

        Ok(servers)
    }

    async fn save_results(&self, server: &ServerRecord) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute(
            "UPDATE servers
             SET httpresult = ?,
                 smtpresult = ?,
                 pop3result = ?,
                 httpsresult = ?,
                 pingresult = ?
             WHERE id = ?",
            params![
                server.http.result.clone(),
                server.smtp.result.clone(),
                server.pop3.result.clone(),
                server.https.result.clone(),
                server.ping.result.clone(),
                server.id
            ],
        )
        .await?;

        Ok(())
    }
}

fn flag(row: &Row, index: i32) -> Result<bool> {
    Ok(row.get::<Option<i64>>(index)?.unwrap_or(0) != 0)
}

fn slot(row: &Row, enabled: i32, result: i32) -> Result<ProbeSlot> {
    Ok(ProbeSlot { enabled: flag(row, enabled)?, result: row.get(result)? })
}

fn server_from_row(row: &Row) -> Result<ServerRecord> {
    Ok(ServerRecord {
        id: row.get(0)?,
        hostname: row.get::<Option<String>>(1)?.unwrap_or_default(),
        address: row.get::<Option<String>>(2)?.unwrap_or_default(),
        http: slot(row, 3, 4)?,
        smtp: slot(row, 5, 6)?,
        smtp_port: ServerRecord::port_from_column(row.get(7)?),
        pop3: slot(row, 8, 9)?,
        https: slot(row, 10, 11)?,
        ping: slot(row, 12, 13)?,
        last_update: row.get(14)?,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::monitoring::types::Protocol;

    fn stale_server(name: &str) -> ServerRecord {
        let mut record = ServerRecord::new(0, name, "192.0.2.1");
        record.last_update = Some(0);
        record
    }

    #[tokio::test]
    async fn test_claim_respects_limit_and_id_order() -> Result<()> {
        let store = create_test_store().await?;
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(insert_server(&store, &stale_server(&format!("s{i}"))).await?);
        }

        let claimed = store.claim_batch(1_000, 940, 2).await?;
        assert_eq!(claimed, 2);

        let batch = store.fetch_claimed(1_000).await?;
        let batch_ids: Vec<i64> = batch.iter().map(|s| s.id).collect();
        assert_eq!(batch_ids, ids[..2].to_vec());

        for id in &ids[2..] {
            let server = store.get_server(*id).await?.expect("server exists");
            assert_eq!(server.last_update, Some(0));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_claim_skips_recently_claimed_rows() -> Result<()> {
        let store = create_test_store().await?;

        let mut fresh = stale_server("fresh");
        fresh.last_update = Some(990);
        let fresh_id = insert_server(&store, &fresh).await?;
        let stale_id = insert_server(&store, &stale_server("stale")).await?;

        // cutoff = 1_000 - 60
        let claimed = store.claim_batch(1_000, 940, 10).await?;
        assert_eq!(claimed, 1);

        let batch = store.fetch_claimed(1_000).await?;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, stale_id);

        let untouched = store.get_server(fresh_id).await?.expect("server exists");
        assert_eq!(untouched.last_update, Some(990));
        Ok(())
    }

    #[tokio::test]
    async fn test_never_claimed_rows_are_eligible() -> Result<()> {
        let store = create_test_store().await?;
        let mut record = stale_server("new");
        record.last_update = None;
        insert_server(&store, &record).await?;

        assert_eq!(store.claim_batch(1_000, 940, 10).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_claim_with_no_eligible_rows() -> Result<()> {
        let store = create_test_store().await?;
        assert_eq!(store.claim_batch(1_000, 940, 10).await?, 0);
        assert!(store.fetch_claimed(1_000).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_row_mapping() -> Result<()> {
        let store = create_test_store().await?;
        let mut record = ServerRecord::new(0, "mail.example.com", "192.0.2.25")
            .with_enabled(Protocol::Smtp)
            .with_enabled(Protocol::Https);
        record.smtp_port = 2525;
        record.ping.result = Some("old ping".into());
        record.last_update = Some(0);
        let id = insert_server(&store, &record).await?;

        let loaded = store.get_server(id).await?.expect("server exists");
        assert_eq!(loaded.hostname, "mail.example.com");
        assert_eq!(loaded.address, "192.0.2.25");
        assert_eq!(loaded.smtp_port, 2525);
        assert!(loaded.smtp.enabled);
        assert!(loaded.https.enabled);
        assert!(!loaded.http.enabled);
        assert!(!loaded.ping.enabled);
        assert_eq!(loaded.ping.result.as_deref(), Some("old ping"));
        assert!(loaded.http.result.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_save_results_writes_all_columns_by_id() -> Result<()> {
        let store = create_test_store().await?;
        let id = insert_server(&store, &stale_server("a")).await?;
        let other = insert_server(&store, &stale_server("b")).await?;

        let mut record = store.get_server(id).await?.expect("server exists");
        record.http.result = Some("HTTP/1.1 200 OK".into());
        record.smtp.result = Some("220 mail ready".into());
        record.pop3.result = Some("+OK".into());
        record.https.result = Some("HTTP/1.1 301 Moved Permanently".into());
        record.ping.result = Some("Ping requires root".into());
        store.save_results(&record).await?;

        let saved = store.get_server(id).await?.expect("server exists");
        assert_eq!(saved.http.result.as_deref(), Some("HTTP/1.1 200 OK"));
        assert_eq!(saved.smtp.result.as_deref(), Some("220 mail ready"));
        assert_eq!(saved.pop3.result.as_deref(), Some("+OK"));
        assert_eq!(saved.https.result.as_deref(), Some("HTTP/1.1 301 Moved Permanently"));
        assert_eq!(saved.ping.result.as_deref(), Some("Ping requires root"));

        let untouched = store.get_server(other).await?.expect("server exists");
        assert!(untouched.http.result.is_none());
        Ok(())
    }
}
