use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use super::claimer::BatchClaimer;
use super::executor::ServerCheckRunner;
use crate::config::Config;
use crate::database::{ServerRecord, ServerStore};

/// Where the scheduler is within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    RunningBatch,
}

/// Drives claim → fetch → dispatch every `update_tick`, starting immediately.
///
/// Runners are fire-and-forget: a batch is done once its runners are spawned,
/// so checks from consecutive cycles may overlap. Claimed rows never do.
///
/// A row is only claimed once a runner slot is reserved for it, so at most
/// `max_concurrent_checks` runners exist at any time and none of them waits.
pub struct CycleScheduler {
    update_tick: Duration,
    claimer: BatchClaimer,
    store: Arc<dyn ServerStore>,
    runner: Arc<ServerCheckRunner>,
    limiter: Arc<Semaphore>,
    runners: JoinSet<()>,
    state: SchedulerState,
    fatal_tx: mpsc::Sender<anyhow::Error>,
    fatal_rx: mpsc::Receiver<anyhow::Error>,
}

impl CycleScheduler {
    pub fn new(config: &Config, store: Arc<dyn ServerStore>, runner: ServerCheckRunner) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::channel(1);

        Self {
            update_tick: config.update_tick,
            claimer: BatchClaimer::new(Arc::clone(&store), config.batch_size),
            store,
            runner: Arc::new(runner),
            limiter: Arc::new(Semaphore::new(config.max_concurrent_checks)),
            runners: JoinSet::new(),
            state: SchedulerState::Idle,
            fatal_tx,
            fatal_rx,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Run batches until a store error occurs. Never returns `Ok`.
    ///
    /// Dropping the scheduler aborts every runner still in flight.
    pub async fn run(mut self) -> Result<()> {
        let mut timer = interval(self.update_tick);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                Some(err) = self.fatal_rx.recv() => return Err(err),
                _ = timer.tick() => {}
            }

            self.run_batch().await?;
        }
    }

    /// Reserve free runner slots, claim that many rows, fetch them and
    /// dispatch one runner per row.
    ///
    /// Returns the number of runners dispatched.
    pub async fn run_batch(&mut self) -> Result<usize> {
        self.state = SchedulerState::RunningBatch;
        self.reap_finished();

        let permits = self.reserve_permits();
        let claim = self.claimer.claim(permits.len()).await?;
        let servers = self
            .store
            .fetch_claimed(claim.token)
            .await
            .context("unable to select claimed servers")?;

        if servers.len() as u64 != claim.claimed {
            warn!(
                token = claim.token,
                claimed = claim.claimed,
                fetched = servers.len(),
                "Claimed and fetched row counts differ"
            );
        }

        let mut dispatched = 0;
        for (server, permit) in servers.into_iter().zip(permits) {
            self.dispatch(server, permit);
            dispatched += 1;
        }

        debug!(token = claim.token, dispatched, in_flight = self.runners.len(), "Batch dispatched");
        self.state = SchedulerState::Idle;
        Ok(dispatched)
    }

    /// Every free runner slot, up to one batch
    fn reserve_permits(&self) -> Vec<OwnedSemaphorePermit> {
        std::iter::from_fn(|| Arc::clone(&self.limiter).try_acquire_owned().ok())
            .take(self.claimer.batch_size())
            .collect()
    }

    fn dispatch(&mut self, server: ServerRecord, permit: OwnedSemaphorePermit) {
        let runner = Arc::clone(&self.runner);
        let fatal_tx = self.fatal_tx.clone();

        self.runners.spawn(async move {
            let _permit = permit;

            let id = server.id;
            if let Err(err) = runner.run(server).await {
                error!(id, "{err:#}");
                let _ = fatal_tx.try_send(err);
            }
        });
    }

    fn reap_finished(&mut self) {
        while let Some(joined) = self.runners.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Check runner task failed");
            }
        }
    }

    #[cfg(test)]
    async fn wait_for_runners(&mut self) {
        while self.runners.join_next().await.is_some() {}
    }
}

impl Drop for CycleScheduler {
    fn drop(&mut self) {
        if self.state == SchedulerState::RunningBatch {
            info!("Scheduler stopped during a batch");
        }
        if !self.runners.is_empty() {
            info!(in_flight = self.runners.len(), "Aborting in-flight check runners");
        }
    }
}
