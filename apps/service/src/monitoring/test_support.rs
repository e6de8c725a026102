//! In-memory store and scripted probes shared by the monitoring tests.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::checker::{Probe, ProbeSet};
use super::types::Protocol;
use crate::database::{ServerRecord, ServerStore};

#[derive(Default)]
pub struct MemoryStore {
    servers: Mutex<BTreeMap<i64, ServerRecord>>,
    saves: Mutex<Vec<ServerRecord>>,
    claims: AtomicUsize,
    fail_claims: bool,
    fail_saves: bool,
}

impl MemoryStore {
    pub fn failing_claims() -> Self {
        Self { fail_claims: true, ..Self::default() }
    }

    pub fn failing_saves() -> Self {
        Self { fail_saves: true, ..Self::default() }
    }

    pub fn insert(&self, record: ServerRecord) {
        self.servers.lock().unwrap().insert(record.id, record);
    }

    pub fn server(&self, id: i64) -> Option<ServerRecord> {
        self.servers.lock().unwrap().get(&id).cloned()
    }

    /// The record passed to the most recent save for `id`
    pub fn last_saved(&self, id: i64) -> Option<ServerRecord> {
        self.saves.lock().unwrap().iter().rev().find(|s| s.id == id).cloned()
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }

    /// Claims that marked at least one row
    pub fn claims_made(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    /// Move every claim back past the staleness window
    pub fn expire_claims(&self) {
        for server in self.servers.lock().unwrap().values_mut() {
            server.last_update = Some(0);
        }
    }
}

#[async_trait]
impl ServerStore for MemoryStore {
    async fn claim_batch(&self, token: i64, cutoff: i64, limit: usize) -> Result<u64> {
        if self.fail_claims {
            bail!("database is locked");
        }

        let mut servers = self.servers.lock().unwrap();
        let mut claimed = 0;
        for server in servers.values_mut() {
            if claimed as usize == limit {
                break;
            }
            if server.last_update.unwrap_or(0) < cutoff {
                server.last_update = Some(token);
                claimed += 1;
            }
        }
        if claimed > 0 {
            self.claims.fetch_add(1, Ordering::SeqCst);
        }
        Ok(claimed)
    }

    async fn fetch_claimed(&self, token: i64) -> Result<Vec<ServerRecord>> {
        let servers = self.servers.lock().unwrap();
        Ok(servers.values().filter(|s| s.last_update == Some(token)).cloned().collect())
    }

    async fn save_results(&self, server: &ServerRecord) -> Result<()> {
        if self.fail_saves {
            bail!("disk I/O error");
        }

        self.saves.lock().unwrap().push(server.clone());
        if let Some(stored) = self.servers.lock().unwrap().get_mut(&server.id) {
            for protocol in Protocol::ALL {
                stored.slot_mut(protocol).result = server.slot(protocol).result.clone();
            }
        }
        Ok(())
    }
}

enum Behaviour {
    Reply(String),
    Panic,
    Stall,
}

/// Probe with a scripted outcome that counts its invocations
pub struct StaticProbe {
    protocol: Protocol,
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl StaticProbe {
    pub fn new(protocol: Protocol, reply: impl Into<String>) -> Self {
        Self { protocol, behaviour: Behaviour::Reply(reply.into()), calls: AtomicUsize::new(0) }
    }

    pub fn panicking(protocol: Protocol) -> Self {
        Self { protocol, behaviour: Behaviour::Panic, calls: AtomicUsize::new(0) }
    }

    /// Never completes
    pub fn stalled(protocol: Protocol) -> Self {
        Self { protocol, behaviour: Behaviour::Stall, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for StaticProbe {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn check(&self, _server: &ServerRecord) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Reply(reply) => reply.clone(),
            Behaviour::Panic => panic!("probe exploded"),
            Behaviour::Stall => std::future::pending().await,
        }
    }
}

/// One probe per protocol replying `"<PROTOCOL> ok"`
pub fn static_probes() -> ProbeSet {
    ProbeSet::from_probes(
        Protocol::ALL
            .iter()
            .map(|p| Arc::new(StaticProbe::new(*p, format!("{p} ok"))) as Arc<dyn Probe>)
            .collect(),
    )
}
