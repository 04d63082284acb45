//! Dispatcher configuration.
//!
//! Loaded from environment variables with defaults; a value that fails to parse
//! falls back to its default.

use crate::fare::FarePolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Directory of the sled ride store
    pub db_path: PathBuf,
    pub fare: FarePolicy,
    /// How often a non-claim update re-reads after losing a conditional write
    pub max_update_retries: u32,
    /// Fallback `tracing` filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./dispatch.db"),
            fare: FarePolicy::default(),
            max_update_retries: 3,
            log_filter: "ride_dispatch=info".to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            db_path: env::var("DISPATCH_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            fare: FarePolicy {
                base: parsed("DISPATCH_FARE_BASE").unwrap_or(defaults.fare.base),
                per_km: parsed("DISPATCH_FARE_PER_KM").unwrap_or(defaults.fare.per_km),
                per_minute: parsed("DISPATCH_FARE_PER_MINUTE").unwrap_or(defaults.fare.per_minute),
            },
            max_update_retries: parsed("DISPATCH_MAX_UPDATE_RETRIES")
                .unwrap_or(defaults.max_update_retries),
            log_filter: env::var("DISPATCH_LOG").unwrap_or(defaults.log_filter),
        }
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_published_policy() {
        let config = DispatchConfig::default();

        assert_eq!(config.fare.base, 2.50);
        assert_eq!(config.fare.per_km, 1.50);
        assert_eq!(config.fare.per_minute, 0.30);
        assert_eq!(config.max_update_retries, 3);
    }

    #[test]
    fn db_path_override() {
        let config = DispatchConfig::default().with_db_path("/tmp/rides");
        assert_eq!(config.db_path, PathBuf::from("/tmp/rides"));
    }
}
