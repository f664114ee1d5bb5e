//! Runtime configuration, read from the environment with defaults.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_UPSTREAM_URL: &str = "http://deadlock-live-events:3000";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3001";

/// Timing and upstream settings shared by every tracker in a registry.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub upstream_url: String,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub retry_multiplier: f64,
    pub connect_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            upstream_url: DEFAULT_UPSTREAM_URL.into(),
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            retry_multiplier: 1.5,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TrackerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let config = Self {
            upstream_url: std::env::var("UPSTREAM_URL").unwrap_or(defaults.upstream_url),
            initial_retry_delay: env_nonzero(env_millis, "RETRY_INITIAL_MS")?
                .unwrap_or(defaults.initial_retry_delay),
            max_retry_delay: env_nonzero(env_millis, "RETRY_MAX_MS")?
                .unwrap_or(defaults.max_retry_delay),
            retry_multiplier: defaults.retry_multiplier,
            connect_timeout: env_nonzero(env_secs, "CONNECT_TIMEOUT_SECS")?
                .unwrap_or(defaults.connect_timeout),
        };
        config.validate()?;
        Ok(config)
    }

    /// Retry delays must be non-zero and must not shrink between failures.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.initial_retry_delay.is_zero(),
            "initial retry delay must be greater than zero"
        );
        anyhow::ensure!(
            self.max_retry_delay >= self.initial_retry_delay,
            "max retry delay {:?} is below initial retry delay {:?}",
            self.max_retry_delay,
            self.initial_retry_delay
        );
        anyhow::ensure!(
            self.retry_multiplier >= 1.0,
            "retry multiplier {} must be at least 1",
            self.retry_multiplier
        );
        anyhow::ensure!(
            !self.connect_timeout.is_zero(),
            "connect timeout must be greater than zero"
        );
        Ok(())
    }
}

/// Settings for the binary's HTTP surface and diagnostics.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// `None` disables the periodic state printer.
    pub print_interval: Option<Duration>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let raw_addr =
            std::env::var("LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.into());
        let listen_addr: SocketAddr = raw_addr
            .parse()
            .with_context(|| format!("invalid LISTEN_ADDR {:?}", raw_addr))?;
        let print_interval = match env_secs("STATE_PRINT_INTERVAL_SECS")? {
            Some(d) if d.is_zero() => None,
            Some(d) => Some(d),
            None => Some(Duration::from_secs(5)),
        };
        Ok(Self {
            listen_addr,
            print_interval,
        })
    }
}

fn env_u64(name: &str) -> anyhow::Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {} {:?}", name, raw)),
        Err(_) => Ok(None),
    }
}

fn env_millis(name: &str) -> anyhow::Result<Option<Duration>> {
    Ok(env_u64(name)?.map(Duration::from_millis))
}

fn env_secs(name: &str) -> anyhow::Result<Option<Duration>> {
    Ok(env_u64(name)?.map(Duration::from_secs))
}

fn env_nonzero(
    read: fn(&str) -> anyhow::Result<Option<Duration>>,
    name: &str,
) -> anyhow::Result<Option<Duration>> {
    let value = read(name)?;
    if let Some(d) = value {
        anyhow::ensure!(!d.is_zero(), "{} must be greater than zero", name);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_constants() {
        let config = TrackerConfig::default();
        assert_eq!(config.initial_retry_delay, Duration::from_secs(1));
        assert_eq!(config.max_retry_delay, Duration::from_secs(30));
        assert_eq!(config.retry_multiplier, 1.5);
    }

    #[test]
    fn test_default_config_is_valid() {
        TrackerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_retry_delay_rejected() {
        std::env::set_var("LIVE_MATCH_TRACKER_TEST_ZERO_MS", "0");
        let err = env_nonzero(env_millis, "LIVE_MATCH_TRACKER_TEST_ZERO_MS").unwrap_err();
        assert!(err.to_string().contains("must be greater than zero"));

        std::env::set_var("LIVE_MATCH_TRACKER_TEST_NONZERO_MS", "250");
        assert_eq!(
            env_nonzero(env_millis, "LIVE_MATCH_TRACKER_TEST_NONZERO_MS").unwrap(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_validate_rejects_degenerate_backoff() {
        let zero_initial = TrackerConfig {
            initial_retry_delay: Duration::ZERO,
            ..TrackerConfig::default()
        };
        assert!(zero_initial.validate().is_err());

        let zero_max = TrackerConfig {
            max_retry_delay: Duration::ZERO,
            ..TrackerConfig::default()
        };
        assert!(zero_max.validate().is_err());

        let shrinking = TrackerConfig {
            retry_multiplier: 0.5,
            ..TrackerConfig::default()
        };
        assert!(shrinking.validate().is_err());
    }

    #[test]
    fn test_unset_variable_is_none() {
        assert!(env_u64("LIVE_MATCH_TRACKER_TEST_UNSET_VAR").unwrap().is_none());
    }
}
