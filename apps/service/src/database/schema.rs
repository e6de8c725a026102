use anyhow::Result;
use libsql::Connection;

/// Make sure the `servers` table exists.
///
/// The store is owned by external tooling: an existing table is left as it is
/// and nothing else is created. Column names (including `enablestmp`) are
/// shared with that tooling.
pub async fn ensure_servers_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS servers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hostname TEXT,
            ip TEXT,
            enablehttp INT DEFAULT 0,
            httpresult TEXT,
            enablestmp INT DEFAULT 0,
            smtpresult TEXT,
            smtpport INT DEFAULT 25,
            enablepop3 INT DEFAULT 0,
            pop3result TEXT,
            enablehttps INT DEFAULT 0,
            httpsresult TEXT,
            enableping INT DEFAULT 0,
            pingresult TEXT,
            lastupdate INT
        )",
        (),
    )
    .await?;

    tracing::debug!("Servers table ready");
    Ok(())
}
