//! Runtime configuration loaded from the environment.
//!
//! | Variable                  | Default                         |
//! |---------------------------|---------------------------------|
//! | `CHATSTATS_PORT`          | `3000`                          |
//! | `CHATSTATS_DATABASE_URL`  | `sqlite:chatstats.db?mode=rwc`  |
//! | `CHATSTATS_REFRESH_SECS`  | `60` (`0` disables the refresh) |
//! | `CHATSTATS_CACHE_PREFIX`  | `stats`                         |

use std::env;
use std::time::Duration;

use crate::cache::key::DEFAULT_PREFIX;

/// Default port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
pub const DEFAULT_DB_PATH: &str = "sqlite:chatstats.db?mode=rwc";

/// Default interval between cache refresh passes, in seconds.
pub const DEFAULT_REFRESH_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// `None` when periodic refresh is disabled.
    pub refresh_interval: Option<Duration>,
    pub cache_prefix: String,
}

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`. Unparseable values fall back to
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = lookup("CHATSTATS_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let database_url =
            lookup("CHATSTATS_DATABASE_URL").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let refresh_secs = lookup("CHATSTATS_REFRESH_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_REFRESH_SECS);
        let refresh_interval = (refresh_secs > 0).then(|| Duration::from_secs(refresh_secs));

        let cache_prefix = lookup("CHATSTATS_CACHE_PREFIX")
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());

        Self {
            port,
            database_url,
            refresh_interval,
            cache_prefix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.database_url, DEFAULT_DB_PATH);
        assert_eq!(config.refresh_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.cache_prefix, "stats");
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("CHATSTATS_PORT", "8080"),
            ("CHATSTATS_DATABASE_URL", "sqlite::memory:"),
            ("CHATSTATS_REFRESH_SECS", "0"),
            ("CHATSTATS_CACHE_PREFIX", "board"),
        ]);

        assert_eq!(config.port, 8080);
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.refresh_interval, None);
        assert_eq!(config.cache_prefix, "board");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config(&[("CHATSTATS_PORT", "http"), ("CHATSTATS_REFRESH_SECS", "-5")]);

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.refresh_interval, Some(Duration::from_secs(60)));
    }
}
