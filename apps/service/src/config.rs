use std::{env, fmt, path, time::Duration};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("{name} must be a valid {expected}, got {value:?}")]
    ParseFailed { name: &'static str, expected: &'static str, value: String },
    #[error("{name} must be at least {min}, got {value}")]
    OutOfRange { name: &'static str, min: u64, value: u64 },
}

/// Whether results are written before or after a server's probes complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOrder {
    /// Write once every probe for the server has finished.
    AfterProbes,
    /// Write the record as received, then wait for probes. Persisted values lag
    /// the in-memory results by one cycle.
    BeforeProbes,
}

/// Process configuration, built once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub update_tick: Duration,
    pub batch_size: usize,
    pub database_path: path::PathBuf,
    pub max_concurrent_checks: usize,
    pub check_timeout: Duration,
    pub persist_order: PersistOrder,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_tick: Duration::from_secs(5),
            batch_size: 10,
            database_path: path::PathBuf::from("./servers.db"),
            max_concurrent_checks: 64,
            check_timeout: Duration::from_secs(30),
            persist_order: PersistOrder::AfterProbes,
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Update Tick (s)", &self.update_tick.as_secs())?;
        write_1(f, "Batch Size", &self.batch_size)?;
        write_1(f, "Max Concurrent Checks", &self.max_concurrent_checks)?;
        write_title_1(f, "Checks")?;
        write_1(f, "Timeout (s)", &self.check_timeout.as_secs())?;
        write_1(f, "Early Persist", &(self.persist_order == PersistOrder::BeforeProbes))?;
        write_title_1(f, "Store")?;
        write_1(f, "Database", &self.database_path.display())?;

        Ok(())
    }
}

impl Config {
    /// Build the configuration from the process environment.
    ///
    /// Unset variables fall back to defaults; set but invalid ones are errors.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let defaults = Self::default();

        let update_tick = read_u64(&lookup, "UPDATE_TICK", defaults.update_tick.as_secs(), 1)?;
        let batch_size = read_u64(&lookup, "BATCH_SIZE", defaults.batch_size as u64, 1)?;
        let max_concurrent_checks =
            read_u64(&lookup, "MAX_CONCURRENT_CHECKS", defaults.max_concurrent_checks as u64, 1)?;
        let check_timeout =
            read_u64(&lookup, "CHECK_TIMEOUT", defaults.check_timeout.as_secs(), 1)?;

        let database_path = lookup("SERVERS_DB")
            .filter(|value| !value.trim().is_empty())
            .map(path::PathBuf::from)
            .unwrap_or(defaults.database_path);

        let legacy_early_persist = match lookup("LEGACY_EARLY_PERSIST") {
            Some(value) => parse_bool("LEGACY_EARLY_PERSIST", &value)?,
            None => false,
        };
        let persist_order = if legacy_early_persist {
            PersistOrder::BeforeProbes
        } else {
            PersistOrder::AfterProbes
        };

        Ok(Self {
            update_tick: Duration::from_secs(update_tick),
            batch_size: batch_size as usize,
            database_path,
            max_concurrent_checks: max_concurrent_checks as usize,
            check_timeout: Duration::from_secs(check_timeout),
            persist_order,
        })
    }
}

fn read_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
    min: u64,
) -> Result<u64, Error> {
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };

    let value = raw.trim().parse::<u64>().map_err(|_err| Error::ParseFailed {
        name,
        expected: "unsigned integer",
        value: raw.clone(),
    })?;

    if value < min {
        return Err(Error::OutOfRange { name, min, value });
    }

    Ok(value)
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, Error> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::ParseFailed { name, expected: "boolean", value: raw.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.update_tick, Duration::from_secs(5));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.database_path, path::PathBuf::from("./servers.db"));
        assert_eq!(config.max_concurrent_checks, 64);
        assert_eq!(config.check_timeout, Duration::from_secs(30));
        assert_eq!(config.persist_order, PersistOrder::AfterProbes);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("UPDATE_TICK", "12"),
            ("BATCH_SIZE", " 3 "),
            ("SERVERS_DB", "/tmp/other.db"),
            ("MAX_CONCURRENT_CHECKS", "7"),
            ("CHECK_TIMEOUT", "4"),
            ("LEGACY_EARLY_PERSIST", "true"),
        ]))
        .unwrap();

        assert_eq!(config.update_tick, Duration::from_secs(12));
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.database_path, path::PathBuf::from("/tmp/other.db"));
        assert_eq!(config.max_concurrent_checks, 7);
        assert_eq!(config.check_timeout, Duration::from_secs(4));
        assert_eq!(config.persist_order, PersistOrder::BeforeProbes);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("BATCH_SIZE", "ten")])).unwrap_err();
        assert!(matches!(err, Error::ParseFailed { name: "BATCH_SIZE", .. }));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("BATCH_SIZE", "0")])).unwrap_err();
        assert_eq!(err, Error::OutOfRange { name: "BATCH_SIZE", min: 1, value: 0 });
    }

    #[test]
    fn test_invalid_bool_is_rejected() {
        let err =
            Config::from_lookup(lookup_from(&[("LEGACY_EARLY_PERSIST", "maybe")])).unwrap_err();
        assert!(matches!(err, Error::ParseFailed { name: "LEGACY_EARLY_PERSIST", .. }));
    }

    #[test]
    fn test_display_lists_settings() {
        let rendered = Config::default().to_string();
        assert!(rendered.contains("Batch Size: 10"));
        assert!(rendered.contains("Update Tick (s): 5"));
        assert!(rendered.contains("servers.db"));
    }
}
