use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::info;

use crate::database::ServerStore;

/// Seconds a server must go unclaimed before it can be claimed again
pub const STALENESS_WINDOW_SECS: i64 = 60;

/// Outcome of one claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    /// Value written to `lastupdate` on every claimed row
    pub token: i64,
    /// Number of rows that now carry `token`
    pub claimed: u64,
}

/// Marks bounded batches of stale servers as claimed
pub struct BatchClaimer {
    store: Arc<dyn ServerStore>,
    batch_size: usize,
    last_token: AtomicI64,
}

impl BatchClaimer {
    pub fn new(store: Arc<dyn ServerStore>, batch_size: usize) -> Self {
        Self { store, batch_size, last_token: AtomicI64::new(i64::MIN) }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Claim up to `min(batch_size, capacity)` servers at the current time
    pub async fn claim(&self, capacity: usize) -> Result<Claim> {
        self.claim_at(chrono::Utc::now().timestamp(), capacity).await
    }

    /// Claim up to `min(batch_size, capacity)` servers last claimed before
    /// `now - 60`.
    ///
    /// The token is returned even when nothing was eligible.
    pub async fn claim_at(&self, now: i64, capacity: usize) -> Result<Claim> {
        let token = self.next_token(now);
        let cutoff = now - STALENESS_WINDOW_SECS;

        let claimed = self
            .store
            .claim_batch(token, cutoff, self.batch_size.min(capacity))
            .await
            .context("unable to claim a batch of servers")?;

        info!("Batch of {} servers queued for updates", claimed);
        Ok(Claim { token, claimed })
    }

    /// `now`, or one past the previous token when claims share a second, so a
    /// token never matches rows from an earlier batch.
    fn next_token(&self, now: i64) -> i64 {
        let previous = self
            .last_token
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or_else(|last| last);
        now.max(previous.saturating_add(1))
    }
}
