/// Monitoring engine module - claims servers and runs their checks
///
/// This module is responsible for:
/// - Probing HTTP/HTTPS/SMTP/POP3/ICMP endpoints
/// - Claiming bounded batches of stale servers
/// - Running every probe of a server concurrently and persisting the results
/// - Driving the claim/dispatch cycle on a fixed tick
pub mod checker;
pub mod claimer;
pub mod executor;
pub mod persister;
pub mod scheduler;
pub mod types;

#[cfg(test)]
mod test_support;

pub use checker::ProbeSet;
pub use executor::ServerCheckRunner;
pub use persister::ResultPersister;
pub use scheduler::CycleScheduler;
