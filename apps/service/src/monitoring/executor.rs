use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error};

use super::checker::ProbeSet;
use super::persister::ResultPersister;
use super::types::{Protocol, failure};
use crate::config::PersistOrder;
use crate::database::ServerRecord;

/// Runs every probe for one server and hands the merged record to the persister
pub struct ServerCheckRunner {
    probes: ProbeSet,
    persister: ResultPersister,
    check_timeout: Duration,
    persist_order: PersistOrder,
}

impl ServerCheckRunner {
    pub fn new(
        probes: ProbeSet,
        persister: ResultPersister,
        check_timeout: Duration,
        persist_order: PersistOrder,
    ) -> Self {
        Self { probes, persister, check_timeout, persist_order }
    }

    /// Check one claimed server.
    ///
    /// Probe failures end up as result text; only a persist failure is
    /// returned.
    pub async fn run(&self, mut server: ServerRecord) -> Result<()> {
        let mut checks = self.spawn_checks(&server);

        if self.persist_order == PersistOrder::BeforeProbes {
            // Writes the results loaded with the claim, not this cycle's.
            self.persister.persist(&server).await?;
            while checks.join_next().await.is_some() {}
            return Ok(());
        }

        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok((protocol, Some(result))) => server.slot_mut(protocol).result = Some(result),
                Ok((_, None)) => {}
                Err(e) => {
                    error!(server = %server.hostname, error = %e, "Check task failed");
                }
            }
        }

        self.persister.persist(&server).await
    }

    /// One task per protocol. Disabled protocols, and protocols without a
    /// probe, complete at once with no result, so the set always holds five.
    fn spawn_checks(&self, server: &ServerRecord) -> JoinSet<(Protocol, Option<String>)> {
        let target = Arc::new(server.clone());
        let mut checks = JoinSet::new();

        for protocol in Protocol::ALL {
            let probe = self.probes.get(protocol).cloned();
            let target = Arc::clone(&target);
            let check_timeout = self.check_timeout;

            checks.spawn(async move {
                let Some(probe) = probe.filter(|_| target.is_enabled(protocol)) else {
                    return (protocol, None);
                };

                let result = match timeout(check_timeout, probe.check(&target)).await {
                    Ok(result) => result,
                    Err(_) => {
                        error!(server = %target.hostname, service = %protocol, "Check timed out");
                        failure::timed_out(check_timeout)
                    }
                };
                debug!(server = %target.hostname, service = %protocol, "Check finished");
                (protocol, Some(result))
            });
        }

        checks
    }
}
