use std::{net::SocketAddr, str::FromStr, time::Duration};

use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid bind address: {0}")]
    InvalidBindAddr(String),
    #[error("invalid store settings: {0}")]
    InvalidStore(String),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind_addr: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub operation_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: Option<String>,
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub metrics: MetricsConfig,
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: None,
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_format: LogFormat::Compact,
            database_url: None,
            metrics: MetricsConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Values supplied on the command line; each one set wins over file and
/// environment layers.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind_addr: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_format: Option<LogFormat>,
    pub database_url: Option<String>,
    pub metrics_enabled: Option<bool>,
    pub metrics_bind_addr: Option<String>,
    pub store_timeout_ms: Option<u64>,
}

impl ServerConfig {
    const ENV_PREFIX: &'static str = "SIGNALBOX_SERVER";

    pub fn load() -> Result<Self, ConfigError> {
        let defaults = ServerConfig::default();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/server").required(false))
            .add_source(config::File::with_name("config/server.local").required(false))
            .add_source(
                config::Environment::with_prefix(Self::ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("host", defaults.host.clone())?
            .set_default("port", defaults.port as i64)?
            .set_default("log_format", defaults.log_format.as_str())?
            .set_default("metrics.enabled", defaults.metrics.enabled)?
            .set_default(
                "store.operation_timeout_ms",
                defaults.store.operation_timeout_ms as i64,
            )?;

        let settings: ServerConfig = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_overrides(&mut self, overrides: &CliOverrides) -> Result<(), ConfigError> {
        if let Some(bind_addr) = &overrides.bind_addr {
            self.bind_addr = Some(bind_addr.clone());
        }
        if let Some(host) = &overrides.host {
            self.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(log_format) = overrides.log_format {
            self.log_format = log_format;
        }
        if let Some(database_url) = &overrides.database_url {
            self.database_url = Some(database_url.clone());
        }
        if let Some(enabled) = overrides.metrics_enabled {
            self.metrics.enabled = enabled;
        }
        if let Some(addr) = &overrides.metrics_bind_addr {
            self.metrics.bind_addr = Some(addr.clone());
        }
        if let Some(timeout_ms) = overrides.store_timeout_ms {
            self.store.operation_timeout_ms = timeout_ms;
        }
        self.validate()
    }

    /// Names of `SIGNALBOX_SERVER__*` variables present in the environment.
    pub fn environment_override_keys() -> Vec<String> {
        let prefix = format!("{}__", Self::ENV_PREFIX);
        let mut keys: Vec<String> = std::env::vars()
            .filter_map(|(key, _)| key.strip_prefix(&prefix).map(|rest| rest.to_lowercase()))
            .collect();
        keys.sort();
        keys
    }

    pub fn listener_addr(&self) -> Result<SocketAddr, ConfigError> {
        if let Some(addr) = &self.bind_addr {
            return addr
                .parse()
                .map_err(|_| ConfigError::InvalidBindAddr(addr.clone()));
        }

        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ConfigError::InvalidBindAddr(addr))
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidBindAddr("port cannot be zero".into()));
        }
        if let Some(addr) = &self.metrics.bind_addr {
            addr.parse::<SocketAddr>()
                .map_err(|_| ConfigError::InvalidBindAddr(addr.clone()))?;
        }
        if self.store.operation_timeout_ms == 0 {
            return Err(ConfigError::InvalidStore(
                "operation_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unsupported log format '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for LogFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        LogFormat::from_str(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn defaults_match_expectations() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Compact);
        assert!(config.database_url.is_none());
        assert!(!config.metrics.enabled);
        assert_eq!(config.store.operation_timeout(), Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn environment_overrides_take_effect() {
        env::set_var("SIGNALBOX_SERVER__HOST", "127.0.0.1");
        env::set_var("SIGNALBOX_SERVER__PORT", "9090");
        env::set_var("SIGNALBOX_SERVER__LOG_FORMAT", "json");
        env::set_var("SIGNALBOX_SERVER__STORE__OPERATION_TIMEOUT_MS", "750");

        let config = ServerConfig::load().expect("config loads");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9090);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.store.operation_timeout_ms, 750);

        let keys = ServerConfig::environment_override_keys();
        assert!(keys.contains(&"host".to_string()));
        assert!(keys.contains(&"store__operation_timeout_ms".to_string()));

        env::remove_var("SIGNALBOX_SERVER__HOST");
        env::remove_var("SIGNALBOX_SERVER__PORT");
        env::remove_var("SIGNALBOX_SERVER__LOG_FORMAT");
        env::remove_var("SIGNALBOX_SERVER__STORE__OPERATION_TIMEOUT_MS");
    }

    #[test]
    #[serial]
    fn listener_addr_prefers_bind_addr() {
        env::set_var("SIGNALBOX_SERVER__BIND_ADDR", "192.168.1.20:5555");

        let config = ServerConfig::load().expect("config loads");
        let addr = config.listener_addr().expect("valid addr");
        assert_eq!(addr.to_string(), "192.168.1.20:5555");

        env::remove_var("SIGNALBOX_SERVER__BIND_ADDR");
    }

    #[test]
    fn listener_addr_composes_host_and_port() {
        let config = ServerConfig {
            host: "10.0.0.2".into(),
            port: 7000,
            ..ServerConfig::default()
        };

        let addr = config.listener_addr().expect("valid addr");
        assert_eq!(addr.to_string(), "10.0.0.2:7000");
    }

    #[test]
    #[serial]
    fn invalid_bind_addr_returns_error() {
        env::set_var("SIGNALBOX_SERVER__BIND_ADDR", "::invalid::");

        let config = ServerConfig::load().expect("config loads");
        let err = config.listener_addr().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBindAddr(_)));

        env::remove_var("SIGNALBOX_SERVER__BIND_ADDR");
    }

    #[test]
    fn cli_overrides_win() {
        let mut config = ServerConfig::default();
        config
            .apply_overrides(&CliOverrides {
                port: Some(9443),
                log_format: Some(LogFormat::Json),
                database_url: Some("postgres://localhost/signalbox".into()),
                metrics_enabled: Some(true),
                store_timeout_ms: Some(250),
                ..CliOverrides::default()
            })
            .expect("overrides valid");

        assert_eq!(config.port, 9443);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/signalbox")
        );
        assert!(config.metrics.enabled);
        assert_eq!(config.store.operation_timeout(), Duration::from_millis(250));
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn zero_store_timeout_is_rejected() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_overrides(&CliOverrides {
                store_timeout_ms: Some(0),
                ..CliOverrides::default()
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStore(_)));
    }

    #[test]
    fn malformed_metrics_addr_is_rejected() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_overrides(&CliOverrides {
                metrics_bind_addr: Some("nowhere".into()),
                ..CliOverrides::default()
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBindAddr(_)));
    }
}
