//! Session Configuration Settings
//!
//! Configuration types for the session bridge, loaded from environment
//! variables. Unparsable values fall back to their defaults.

use std::time::Duration;

use rand::Rng;

/// Broker gateway connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Gateway host.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// Client id; random when not configured.
    pub client_id: i32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7497,
            client_id: random_client_id(),
        }
    }
}

/// Deadlines for blocking calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutSettings {
    /// Instrument resolution.
    pub request: Duration,
    /// First-subscription handshake.
    pub subscribe: Duration,
    /// Open-orders snapshot during reconciliation.
    pub open_orders: Duration,
    /// Initial connection.
    pub connect: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(5),
            subscribe: Duration::from_secs(5),
            open_orders: Duration::from_secs(5),
            connect: Duration::from_secs(5),
        }
    }
}

/// Complete session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Gateway connection.
    pub connection: ConnectionSettings,
    /// Blocking call deadlines.
    pub timeouts: TimeoutSettings,
    /// How long `flatten` waits for cancels before trading to flat.
    pub flatten_settle: Duration,
    /// Delay before a bar task's first bar.
    pub bar_initial_delay: Duration,
    /// Run reconciliation right after connecting.
    pub reconcile_on_connect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionSettings::default(),
            timeouts: TimeoutSettings::default(),
            flatten_settle: Duration::from_secs(1),
            bar_initial_delay: Duration::from_secs(1),
            reconcile_on_connect: true,
        }
    }
}

impl SessionConfig {
    /// Load configuration from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `BROKER_HOST`: Gateway host (default: localhost)
    /// - `BROKER_PORT`: Gateway port (default: 7497)
    /// - `BROKER_CLIENT_ID`: Client id (default: random)
    /// - `SESSION_REQUEST_TIMEOUT_SECS`: Resolution deadline (default: 5)
    /// - `SESSION_SUBSCRIBE_TIMEOUT_SECS`: Subscription handshake deadline (default: 5)
    /// - `SESSION_OPEN_ORDERS_TIMEOUT_SECS`: Open-orders snapshot deadline (default: 5)
    /// - `SESSION_CONNECT_TIMEOUT_SECS`: Connection deadline (default: 5)
    /// - `SESSION_FLATTEN_SETTLE_MS`: Flatten cancel wait (default: 1000)
    /// - `SESSION_BAR_INITIAL_DELAY_MS`: First bar delay (default: 1000)
    /// - `SESSION_RECONCILE_ON_CONNECT`: Reconcile at connect (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Lookup(&lookup);

        let host = match lookup("BROKER_HOST") {
            Some(host) if host.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("BROKER_HOST".to_string()));
            }
            Some(host) => host,
            None => defaults.connection.host,
        };

        let client_id = match lookup("BROKER_CLIENT_ID") {
            Some(raw) => match raw.trim().parse::<i32>() {
                Ok(id) if id > 0 => id,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "BROKER_CLIENT_ID".to_string(),
                        value: raw,
                    });
                }
            },
            None => defaults.connection.client_id,
        };

        let connection = ConnectionSettings {
            host,
            port: env.u16("BROKER_PORT", defaults.connection.port),
            client_id,
        };

        let timeouts = TimeoutSettings {
            request: env.duration_secs("SESSION_REQUEST_TIMEOUT_SECS", defaults.timeouts.request),
            subscribe: env.duration_secs(
                "SESSION_SUBSCRIBE_TIMEOUT_SECS",
                defaults.timeouts.subscribe,
            ),
            open_orders: env.duration_secs(
                "SESSION_OPEN_ORDERS_TIMEOUT_SECS",
                defaults.timeouts.open_orders,
            ),
            connect: env.duration_secs("SESSION_CONNECT_TIMEOUT_SECS", defaults.timeouts.connect),
        };

        Ok(Self {
            connection,
            timeouts,
            flatten_settle: env.duration_millis("SESSION_FLATTEN_SETTLE_MS", defaults.flatten_settle),
            bar_initial_delay: env.duration_millis(
                "SESSION_BAR_INITIAL_DELAY_MS",
                defaults.bar_initial_delay,
            ),
            reconcile_on_connect: env.bool(
                "SESSION_RECONCILE_ON_CONNECT",
                defaults.reconcile_on_connect,
            ),
        })
    }

    /// Use a fixed client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: i32) -> Self {
        self.connection.client_id = client_id;
        self
    }

    /// Use the same deadline for every blocking call.
    #[must_use]
    pub fn with_timeouts(mut self, timeout: Duration) -> Self {
        self.timeouts = TimeoutSettings {
            request: timeout,
            subscribe: timeout,
            open_orders: timeout,
            connect: timeout,
        };
        self
    }
}

/// Random client id in `1..2^31-1`.
#[must_use]
pub fn random_client_id() -> i32 {
    rand::rng().random_range(1..i32::MAX)
}

struct Lookup<'a, F>(&'a F);

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn u16(&self, key: &str, default: u16) -> u16 {
        (self.0)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        (self.0)(key).map_or(default, |v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        })
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        (self.0)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        (self.0)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value that cannot be used.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.connection.host, "localhost");
        assert_eq!(config.connection.port, 7497);
        assert!(config.connection.client_id >= 1);
        assert_eq!(config.timeouts.request, Duration::from_secs(5));
        assert_eq!(config.flatten_settle, Duration::from_millis(1000));
        assert_eq!(config.bar_initial_delay, Duration::from_millis(1000));
        assert!(config.reconcile_on_connect);
    }

    #[test]
    fn test_overrides() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("BROKER_HOST", "gateway.internal"),
            ("BROKER_PORT", "4002"),
            ("BROKER_CLIENT_ID", "17"),
            ("SESSION_REQUEST_TIMEOUT_SECS", "2"),
            ("SESSION_FLATTEN_SETTLE_MS", "250"),
            ("SESSION_RECONCILE_ON_CONNECT", "false"),
        ]))
        .unwrap();
        assert_eq!(config.connection.host, "gateway.internal");
        assert_eq!(config.connection.port, 4002);
        assert_eq!(config.connection.client_id, 17);
        assert_eq!(config.timeouts.request, Duration::from_secs(2));
        assert_eq!(config.timeouts.subscribe, Duration::from_secs(5));
        assert_eq!(config.flatten_settle, Duration::from_millis(250));
        assert!(!config.reconcile_on_connect);
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("BROKER_PORT", "not-a-port"),
            ("SESSION_CONNECT_TIMEOUT_SECS", "-3"),
            ("SESSION_RECONCILE_ON_CONNECT", "maybe"),
        ]))
        .unwrap();
        assert_eq!(config.connection.port, 7497);
        assert_eq!(config.timeouts.connect, Duration::from_secs(5));
        assert!(config.reconcile_on_connect);
    }

    #[test]
    fn test_empty_host_rejected() {
        let err = SessionConfig::from_lookup(lookup(&[("BROKER_HOST", "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::EmptyValue("BROKER_HOST".to_string()));
    }

    #[test]
    fn test_invalid_client_id_rejected() {
        let err = SessionConfig::from_lookup(lookup(&[("BROKER_CLIENT_ID", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_with_timeouts() {
        let config = SessionConfig::default()
            .with_client_id(3)
            .with_timeouts(Duration::from_millis(200));
        assert_eq!(config.connection.client_id, 3);
        assert_eq!(config.timeouts.open_orders, Duration::from_millis(200));
        assert_eq!(config.timeouts.connect, Duration::from_millis(200));
    }
}
