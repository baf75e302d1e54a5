use std::time::Duration;

use exec_reconcile::BackoffPolicy;

/// Runtime configuration, loaded from the environment at startup (§C of the
/// expanded spec). Defaults match §4.2's literal numbers so a deployment
/// with no overrides behaves exactly as the spec describes.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub reconcile_backoff: BackoffPolicy,
    pub reconcile_check_interval: Duration,
    /// How long a handler's own tool call may run before the wrapper marks
    /// its mutation `needs_reconcile`/`indeterminate` instead of waiting
    /// further (§5, "Cancellation & timeouts"). Not consumed by this crate
    /// directly — the handler-execution wrapper that calls probes/tools
    /// lives outside it — but configured here so one env var governs both.
    pub immediate_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for environment variable {0}: {1}")]
    Invalid(&'static str, String),
}

impl Config {
    /// Loads `.env` (if present) then reads environment variables,
    /// matching the reference crate's `dotenvy`-at-startup convention.
    /// Every field beyond `DATABASE_URL` has a spec-mandated default, so a
    /// deployment only needs to set the one value it can't default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let base = parse_secs("RECONCILE_BASE_SECS", 10)?;
        let max = parse_secs("RECONCILE_MAX_SECS", 600)?;
        let max_attempts = parse_u32("RECONCILE_MAX_ATTEMPTS", 5)?;
        let check_interval = parse_secs("RECONCILE_CHECK_INTERVAL_SECS", 10)?;
        let immediate_timeout = parse_secs("IMMEDIATE_TIMEOUT_SECS", 10)?;

        Ok(Self {
            database_url,
            reconcile_backoff: BackoffPolicy { base, max, max_attempts },
            reconcile_check_interval: check_interval,
            immediate_timeout,
        })
    }
}

fn parse_secs(var: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid(var, raw)),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

fn parse_u32(var: &'static str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.parse::<u32>().map_err(|_| ConfigError::Invalid(var, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_section_4_2() {
        // SAFETY: test-only env mutation, single-threaded within this test.
        std::env::remove_var("RECONCILE_BASE_SECS");
        std::env::remove_var("RECONCILE_MAX_SECS");
        std::env::remove_var("RECONCILE_MAX_ATTEMPTS");
        std::env::remove_var("RECONCILE_CHECK_INTERVAL_SECS");
        std::env::remove_var("IMMEDIATE_TIMEOUT_SECS");
        std::env::set_var("DATABASE_URL", "postgres://localhost/test");

        let config = Config::from_env().unwrap();
        assert_eq!(config.reconcile_backoff.base, Duration::from_secs(10));
        assert_eq!(config.reconcile_backoff.max, Duration::from_secs(600));
        assert_eq!(config.reconcile_backoff.max_attempts, 5);
        assert_eq!(config.reconcile_check_interval, Duration::from_secs(10));
        assert_eq!(config.immediate_timeout, Duration::from_secs(10));

        std::env::remove_var("DATABASE_URL");
    }

    #[test]
    fn missing_database_url_is_an_error() {
        std::env::remove_var("DATABASE_URL");
        assert!(matches!(Config::from_env(), Err(ConfigError::Missing("DATABASE_URL"))));
    }
}
