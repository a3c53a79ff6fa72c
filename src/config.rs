use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineConfig;
use crate::limits::{DEFAULT_HOLD_TTL_MINUTES, MAX_HOLD_TTL_MINUTES};

/// Process configuration, read from `RENTLINE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub hold_ttl_minutes: i64,
    pub reaper_interval: Duration,
    pub sweep_before_read: bool,
    pub item_cache_ttl: Duration,
    pub data_dir: PathBuf,
    /// Rewrite the log once this many records were appended since the last compaction.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hold_ttl_minutes: DEFAULT_HOLD_TTL_MINUTES,
            reaper_interval: Duration::from_secs(60),
            sweep_before_read: false,
            item_cache_ttl: Duration::from_secs(300),
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable values fall back to the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let raw_ttl: i64 = parse_or(&lookup, "RENTLINE_HOLD_TTL_MINUTES", d.hold_ttl_minutes);
        let hold_ttl_minutes = raw_ttl.clamp(1, MAX_HOLD_TTL_MINUTES);
        if hold_ttl_minutes != raw_ttl {
            tracing::warn!("RENTLINE_HOLD_TTL_MINUTES={raw_ttl} out of range, using {hold_ttl_minutes}");
        }
        let reaper_secs: u64 = parse_or(&lookup, "RENTLINE_REAPER_INTERVAL_SECS", d.reaper_interval.as_secs());
        let cache_secs: u64 = parse_or(&lookup, "RENTLINE_ITEM_CACHE_TTL_SECS", d.item_cache_ttl.as_secs());
        Self {
            hold_ttl_minutes,
            reaper_interval: Duration::from_secs(reaper_secs.max(1)),
            sweep_before_read: parse_or(&lookup, "RENTLINE_SWEEP_BEFORE_READ", d.sweep_before_read),
            item_cache_ttl: Duration::from_secs(cache_secs),
            data_dir: lookup("RENTLINE_DATA_DIR").map_or(d.data_dir, PathBuf::from),
            compact_threshold: parse_or(&lookup, "RENTLINE_COMPACT_THRESHOLD", d.compact_threshold),
            metrics_port: lookup("RENTLINE_METRICS_PORT").and_then(|s| s.parse().ok()),
        }
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            hold_ttl: chrono::Duration::minutes(self.hold_ttl_minutes.clamp(1, MAX_HOLD_TTL_MINUTES)),
            sweep_before_read: self.sweep_before_read,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("rentline.wal")
    }
}

fn parse_or<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring {key}={raw:?}: not a valid value");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let c = from(&[]);
        assert_eq!(c.hold_ttl_minutes, 45);
        assert_eq!(c.reaper_interval, Duration::from_secs(60));
        assert!(!c.sweep_before_read);
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.wal_path(), PathBuf::from("./data/rentline.wal"));
        assert_eq!(c.engine().hold_ttl, chrono::Duration::minutes(45));
    }

    #[test]
    fn reads_overrides() {
        let c = from(&[
            ("RENTLINE_HOLD_TTL_MINUTES", "15"),
            ("RENTLINE_REAPER_INTERVAL_SECS", "5"),
            ("RENTLINE_SWEEP_BEFORE_READ", "true"),
            ("RENTLINE_DATA_DIR", "/var/lib/rentline"),
            ("RENTLINE_METRICS_PORT", "9100"),
        ]);
        assert_eq!(c.hold_ttl_minutes, 15);
        assert_eq!(c.reaper_interval, Duration::from_secs(5));
        assert!(c.engine().sweep_before_read);
        assert_eq!(c.wal_path(), PathBuf::from("/var/lib/rentline/rentline.wal"));
        assert_eq!(c.metrics_port, Some(9100));
    }

    #[test]
    fn garbage_falls_back() {
        let c = from(&[
            ("RENTLINE_HOLD_TTL_MINUTES", "soon"),
            ("RENTLINE_REAPER_INTERVAL_SECS", "0"),
            ("RENTLINE_SWEEP_BEFORE_READ", "yes"),
        ]);
        assert_eq!(c.hold_ttl_minutes, 45);
        assert_eq!(c.reaper_interval, Duration::from_secs(1));
        assert!(!c.sweep_before_read);
    }

    #[test]
    fn hold_ttl_is_clamped() {
        let c = from(&[("RENTLINE_HOLD_TTL_MINUTES", "999999999999999")]);
        assert_eq!(c.hold_ttl_minutes, MAX_HOLD_TTL_MINUTES);
        assert_eq!(c.engine().hold_ttl, chrono::Duration::minutes(MAX_HOLD_TTL_MINUTES));

        let c = from(&[("RENTLINE_HOLD_TTL_MINUTES", "-5")]);
        assert_eq!(c.engine().hold_ttl, chrono::Duration::minutes(1));

        let tampered = Config {
            hold_ttl_minutes: i64::MAX,
            ..Config::default()
        };
        assert_eq!(tampered.engine().hold_ttl, chrono::Duration::minutes(MAX_HOLD_TTL_MINUTES));
    }
}
