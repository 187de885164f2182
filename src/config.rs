use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::constants::{auth, game, net};
use crate::net::connection::ReconnectPolicy;

const DEFAULT_ORIGIN: &str = "http://localhost:8000";

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Origin must use http or https, got '{0}'")]
    UnsupportedScheme(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("Reconnect max delay cannot be below the initial delay")]
    BackoffBelowInitial,
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Page origin the client belongs to (http or https)
    pub origin: String,
    /// Socket path on the origin
    pub ws_path: String,
    /// HTTP API prefix on the origin
    pub api_path: String,
    /// Delay before the first reconnect attempt
    pub reconnect_delay: Duration,
    /// Upper bound for doubling backoff, `None` keeps the delay fixed
    pub reconnect_max_delay: Option<Duration>,
    /// Interval of the full inventory backstop poll
    pub inventory_poll_interval: Duration,
    /// Where the session token is persisted, in memory if unset
    pub token_path: Option<PathBuf>,
    /// Port for the metrics endpoint, disabled if unset
    pub metrics_port: Option<u16>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            ws_path: net::WS_PATH.to_string(),
            api_path: auth::API_PATH.to_string(),
            reconnect_delay: net::RECONNECT_DELAY,
            reconnect_max_delay: None,
            inventory_poll_interval: game::INVENTORY_POLL_INTERVAL,
            token_path: None,
            metrics_port: None,
        }
    }
}

impl ClientConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(origin) = std::env::var("SERVER_ORIGIN") {
            match Url::parse(&origin) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => config.origin = origin,
                _ => tracing::warn!("Invalid SERVER_ORIGIN '{}', using default", origin),
            }
        }

        if let Ok(path) = std::env::var("WS_PATH") {
            if path.starts_with('/') {
                config.ws_path = path;
            } else {
                tracing::warn!("WS_PATH must start with '/', using default");
            }
        }

        if let Ok(path) = std::env::var("API_PATH") {
            if path.starts_with('/') {
                config.api_path = path.trim_end_matches('/').to_string();
            } else {
                tracing::warn!("API_PATH must start with '/', using default");
            }
        }

        if let Ok(delay) = std::env::var("RECONNECT_DELAY_MS") {
            match delay.parse::<u64>() {
                Ok(ms) if ms > 0 && ms <= 600_000 => {
                    config.reconnect_delay = Duration::from_millis(ms)
                }
                Ok(_) => tracing::warn!("RECONNECT_DELAY_MS must be 1-600000, using default"),
                Err(_) => tracing::warn!("Invalid RECONNECT_DELAY_MS '{}', using default", delay),
            }
        }

        if let Ok(max) = std::env::var("RECONNECT_MAX_DELAY_MS") {
            match max.parse::<u64>() {
                Ok(ms) if ms > 0 => config.reconnect_max_delay = Some(Duration::from_millis(ms)),
                _ => tracing::warn!("Invalid RECONNECT_MAX_DELAY_MS '{}', keeping fixed delay", max),
            }
        }

        if let Ok(secs) = std::env::var("INVENTORY_POLL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) if s > 0 => config.inventory_poll_interval = Duration::from_secs(s),
                _ => tracing::warn!("Invalid INVENTORY_POLL_SECS '{}', using default", secs),
            }
        }

        if let Ok(path) = std::env::var("TOKEN_PATH") {
            config.token_path = Some(PathBuf::from(path));
        }

        if let Ok(port) = std::env::var("METRICS_PORT") {
            match port.parse::<u16>() {
                Ok(p) if p > 0 => config.metrics_port = Some(p),
                _ => tracing::warn!("Invalid METRICS_PORT '{}', metrics endpoint disabled", port),
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.origin_url()?;
        if self.reconnect_delay.is_zero() {
            return Err(ConfigError::ZeroDuration("reconnect_delay"));
        }
        if self.inventory_poll_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("inventory_poll_interval"));
        }
        if let Some(max) = self.reconnect_max_delay {
            if max < self.reconnect_delay {
                return Err(ConfigError::BackoffBelowInitial);
            }
        }
        self.socket_url()?;
        Ok(())
    }

    /// Parsed origin, rejecting anything but http and https
    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.origin).map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
        }
        Ok(url)
    }

    /// Socket endpoint: same origin, `http` swapped for `ws`, fixed path
    pub fn socket_url(&self) -> Result<Url, ConfigError> {
        let origin = self.origin_url()?.origin().ascii_serialization();
        let swapped = match origin.strip_prefix("http") {
            Some(rest) => format!("ws{}", rest),
            None => return Err(ConfigError::UnsupportedScheme(origin)),
        };
        Url::parse(&format!("{}{}", swapped, self.ws_path))
            .map_err(|e| ConfigError::InvalidUrl(e.to_string()))
    }

    /// Absolute URL of an auth endpoint, e.g. `/auth/login`
    pub fn api_url(&self, endpoint: &str) -> Result<Url, ConfigError> {
        self.origin_url()?
            .join(&format!("{}{}", self.api_path, endpoint))
            .map_err(|e| ConfigError::InvalidUrl(e.to_string()))
    }

    /// Reconnect policy derived from the delay settings
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        match self.reconnect_max_delay {
            Some(max) => ReconnectPolicy::Backoff {
                initial: self.reconnect_delay,
                max,
            },
            None => ReconnectPolicy::Fixed(self.reconnect_delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.inventory_poll_interval, Duration::from_secs(300));
        assert!(config.token_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_socket_url_swaps_scheme() {
        let mut config = ClientConfig::default();
        config.origin = "https://game.example.org/some/page?x=1".to_string();
        assert_eq!(config.socket_url().unwrap().as_str(), "wss://game.example.org/ws");

        config.origin = "http://127.0.0.1:8080".to_string();
        assert_eq!(config.socket_url().unwrap().as_str(), "ws://127.0.0.1:8080/ws");
    }

    #[test]
    fn test_api_url() {
        let config = ClientConfig::default();
        assert_eq!(
            config.api_url(auth::LOGIN_PATH).unwrap().as_str(),
            "http://localhost:8000/api/auth/login"
        );
    }

    #[test]
    fn test_validate_backoff() {
        let mut config = ClientConfig::default();
        config.reconnect_max_delay = Some(Duration::from_millis(500));
        assert!(matches!(config.validate(), Err(ConfigError::BackoffBelowInitial)));

        config.reconnect_max_delay = Some(Duration::from_secs(30));
        assert!(config.validate().is_ok());
        assert!(matches!(config.reconnect_policy(), ReconnectPolicy::Backoff { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_origin() {
        let mut config = ClientConfig::default();
        config.origin = "not a url".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));

        config.origin = "ftp://localhost:8000".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::UnsupportedScheme(_))));
        assert!(config.socket_url().is_err());
    }

    #[test]
    fn test_load_or_default() {
        let config = ClientConfig::load_or_default();
        assert!(!config.reconnect_delay.is_zero());
    }
}
