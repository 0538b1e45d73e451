//! Protocol configuration: timeouts, retention and directory layout.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, SuccusError};

/// Tunables shared by every protocol component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Shared bound for a directory lookup across both address variants.
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,

    /// Bound for a directory presence check.
    #[serde(default = "default_has_timeout_ms")]
    pub has_timeout_ms: u64,

    /// Bound for each store write attempt.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Bound for a one-shot backlog enumeration.
    #[serde(default = "default_history_timeout_ms")]
    pub history_timeout_ms: u64,

    /// Bound for the store probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Deduplication retention, counted from first sighting.
    #[serde(default = "default_dedup_retention_secs")]
    pub dedup_retention_secs: u64,

    /// Maximum identities tracked by the deduplicator.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    /// Minimum plausible length of an encryption public key.
    #[serde(default = "default_min_epub_len")]
    pub min_epub_len: usize,

    /// Node enumerating every registered address.
    #[serde(default = "default_directory_index")]
    pub directory_index: String,
}

fn default_lookup_timeout_ms() -> u64 {
    10_000
}

fn default_has_timeout_ms() -> u64 {
    5_000
}

fn default_write_timeout_ms() -> u64 {
    10_000
}

fn default_history_timeout_ms() -> u64 {
    3_000
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_dedup_retention_secs() -> u64 {
    60
}

fn default_dedup_capacity() -> usize {
    10_000
}

fn default_min_epub_len() -> usize {
    20
}

fn default_directory_index() -> String {
    "skeypair".to_string()
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: default_lookup_timeout_ms(),
            has_timeout_ms: default_has_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            history_timeout_ms: default_history_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            dedup_retention_secs: default_dedup_retention_secs(),
            dedup_capacity: default_dedup_capacity(),
            min_epub_len: default_min_epub_len(),
            directory_index: default_directory_index(),
        }
    }
}

impl ProtocolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shared directory lookup bound.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the presence check bound.
    pub fn with_has_timeout(mut self, timeout: Duration) -> Self {
        self.has_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the per-attempt write bound.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_history_timeout(mut self, timeout: Duration) -> Self {
        self.history_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set deduplication retention and capacity.
    pub fn with_dedup(mut self, retention: Duration, capacity: usize) -> Self {
        self.dedup_retention_secs = retention.as_secs().max(1);
        self.dedup_capacity = capacity.max(1);
        self
    }

    pub fn with_min_epub_len(mut self, len: usize) -> Self {
        self.min_epub_len = len;
        self
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn has_timeout(&self) -> Duration {
        Duration::from_millis(self.has_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_millis(self.history_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn dedup_retention(&self) -> Duration {
        Duration::from_secs(self.dedup_retention_secs)
    }

    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SuccusError::invalid_input("config", format!("{}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Apply `SUCCUS_*` environment overrides. Unparseable values are ignored.
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read_u64 = |name: &str, default: u64| {
            lookup(name)
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        let read_usize = |name: &str, default: usize| {
            lookup(name)
                .and_then(|raw| raw.trim().parse::<usize>().ok())
                .unwrap_or(default)
        };

        self.lookup_timeout_ms = read_u64("SUCCUS_LOOKUP_TIMEOUT_MS", self.lookup_timeout_ms);
        self.has_timeout_ms = read_u64("SUCCUS_HAS_TIMEOUT_MS", self.has_timeout_ms);
        self.write_timeout_ms = read_u64("SUCCUS_WRITE_TIMEOUT_MS", self.write_timeout_ms);
        self.dedup_retention_secs =
            read_u64("SUCCUS_DEDUP_RETENTION_SECS", self.dedup_retention_secs).max(1);
        self.dedup_capacity = read_usize("SUCCUS_DEDUP_CAPACITY", self.dedup_capacity).max(1);
        self.min_epub_len = read_usize("SUCCUS_MIN_EPUB_LEN", self.min_epub_len);
        self
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ProtocolConfig::default();
        assert_eq!(config.lookup_timeout(), Duration::from_secs(10));
        assert_eq!(config.has_timeout(), Duration::from_secs(5));
        assert_eq!(config.dedup_retention(), Duration::from_secs(60));
        assert_eq!(config.directory_index, "skeypair");
    }

    #[test]
    fn test_builder() {
        let config = ProtocolConfig::new()
            .with_lookup_timeout(Duration::from_millis(250))
            .with_dedup(Duration::from_secs(5), 0)
            .with_min_epub_len(8);

        assert_eq!(config.lookup_timeout_ms, 250);
        assert_eq!(config.dedup_retention_secs, 5);
        assert_eq!(config.dedup_capacity, 1);
        assert_eq!(config.min_epub_len, 8);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ProtocolConfig =
            serde_json::from_str(r#"{"lookup_timeout_ms": 1500}"#).unwrap();
        assert_eq!(config.lookup_timeout_ms, 1500);
        assert_eq!(config.write_timeout_ms, 10_000);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"dedup_capacity": 42}}"#).unwrap();

        let config = ProtocolConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.dedup_capacity, 42);

        let missing = ProtocolConfig::from_json_file("/nonexistent/succus.json");
        assert!(missing.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SUCCUS_LOOKUP_TIMEOUT_MS", "2000"),
            ("SUCCUS_DEDUP_CAPACITY", "not-a-number"),
            ("SUCCUS_DEDUP_RETENTION_SECS", "0"),
        ]
        .into_iter()
        .collect();

        let config = ProtocolConfig::default()
            .apply_env_from(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.lookup_timeout_ms, 2000);
        assert_eq!(config.dedup_capacity, 10_000);
        assert_eq!(config.dedup_retention_secs, 1);
    }
}
