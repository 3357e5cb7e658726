use std::path::PathBuf;
use std::time::Duration;

use crate::pricing::HotelPolicy;

/// Host settings, read once at start-up from `INNKEEP_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// Journal appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
    pub policy: HotelPolicy,
}

#[derive(Debug)]
pub struct ConfigError(String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable numbers fall back to the default; only the hotel policy is strict.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parsed<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            get(key).and_then(|s| s.trim().parse().ok())
        }

        let check_in_hour: u32 = parsed(&get, "INNKEEP_CHECKIN_HOUR").unwrap_or(14);
        let check_out_hour: u32 = parsed(&get, "INNKEEP_CHECKOUT_HOUR").unwrap_or(12);
        let late_checkout_percent: u32 = parsed(&get, "INNKEEP_LATE_CHECKOUT_PERCENT").unwrap_or(50);
        let policy = HotelPolicy::new(check_in_hour, check_out_hour, late_checkout_percent).ok_or_else(|| {
            ConfigError(format!(
                "check-in/check-out hours must be 0-23 (got {check_in_hour}/{check_out_hour})"
            ))
        })?;

        let sweep_secs: u64 = parsed(&get, "INNKEEP_SWEEP_INTERVAL_SECS").unwrap_or(3600);
        if sweep_secs == 0 {
            return Err(ConfigError("INNKEEP_SWEEP_INTERVAL_SECS must be positive".into()));
        }

        Ok(Self {
            port: parsed(&get, "INNKEEP_PORT").unwrap_or(5480),
            bind: get("INNKEEP_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(get("INNKEEP_DATA_DIR").unwrap_or_else(|| "./data".into())),
            max_connections: parsed(&get, "INNKEEP_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&get, "INNKEEP_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: parsed(&get, "INNKEEP_METRICS_PORT"),
            sweep_interval: Duration::from_secs(sweep_secs),
            policy,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("innkeep.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.port, 5480);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.sweep_interval, Duration::from_secs(3600));
        assert_eq!(config.policy, HotelPolicy::default());
        assert_eq!(config.wal_path(), PathBuf::from("./data/innkeep.wal"));
    }

    #[test]
    fn overrides() {
        let config = from_pairs(&[
            ("INNKEEP_PORT", "6000"),
            ("INNKEEP_METRICS_PORT", "9100"),
            ("INNKEEP_CHECKIN_HOUR", "15"),
            ("INNKEEP_LATE_CHECKOUT_PERCENT", "100"),
            ("INNKEEP_MAX_CONNECTIONS", "not-a-number"),
        ])
        .unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.policy, HotelPolicy::new(15, 12, 100).unwrap());
        assert_eq!(config.max_connections, 256);
    }

    #[test]
    fn rejects_bad_hours_and_zero_interval() {
        assert!(from_pairs(&[("INNKEEP_CHECKOUT_HOUR", "24")]).is_err());
        assert!(from_pairs(&[("INNKEEP_SWEEP_INTERVAL_SECS", "0")]).is_err());
    }
}
