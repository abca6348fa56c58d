use std::time::Duration;

use thiserror::Error;

use crate::api::bitrix24::{self, Bitrix24Settings};
use crate::api::telemost;
use crate::api::yandex_oauth::{self, YandexOAuthSettings};

pub const DEFAULT_DATABASE_URL: &str = "telemost_bridge.db";
pub const DEFAULT_JOIN_BASE: &str = "https://telemost.yandex.ru";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:5000/auth/yandex/callback";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub encryption_key: String,
    pub port: u16,
    pub environment: String,
    pub bitrix_client_id: Option<String>,
    pub bitrix_client_secret: Option<String>,
    pub bitrix_oauth_url: String,
    pub yandex_client_id: Option<String>,
    pub yandex_client_secret: Option<String>,
    pub yandex_redirect_uri: String,
    pub yandex_auth_url: String,
    pub yandex_token_url: String,
    /// Service token used when a caller has none of their own.
    pub yandex_oauth_token: Option<String>,
    pub telemost_api_base: String,
    pub telemost_join_base: String,
    pub request_timeout: Duration,
    pub sentry_dsn: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any name -> value lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let or = |name: &str, default: &str| var(name).unwrap_or_else(|| default.to_string());

        let port = match var("PORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name: "PORT", value })?,
            None => DEFAULT_PORT,
        };
        let timeout_secs = match var("TELEMOST_TIMEOUT_SECS") {
            Some(value) => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => return Err(ConfigError::Invalid { name: "TELEMOST_TIMEOUT_SECS", value }),
            },
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Config {
            database_url: or("DATABASE_URL", DEFAULT_DATABASE_URL),
            encryption_key: var("ENCRYPTION_KEY").ok_or(ConfigError::Missing("ENCRYPTION_KEY"))?,
            port,
            environment: or("ENVIRONMENT", "development"),
            bitrix_client_id: var("BITRIX24_CLIENT_ID"),
            bitrix_client_secret: var("BITRIX24_CLIENT_SECRET"),
            bitrix_oauth_url: or("BITRIX24_OAUTH_URL", bitrix24::DEFAULT_OAUTH_URL),
            yandex_client_id: var("YANDEX_CLIENT_ID"),
            yandex_client_secret: var("YANDEX_CLIENT_SECRET"),
            yandex_redirect_uri: or("YANDEX_REDIRECT_URI", DEFAULT_REDIRECT_URI),
            yandex_auth_url: or("YANDEX_AUTH_URL", yandex_oauth::DEFAULT_AUTH_URL),
            yandex_token_url: or("YANDEX_TOKEN_URL", yandex_oauth::DEFAULT_TOKEN_URL),
            yandex_oauth_token: var("YANDEX_OAUTH_TOKEN"),
            telemost_api_base: or("TELEMOST_API_BASE", telemost::DEFAULT_API_BASE),
            telemost_join_base: or("TELEMOST_JOIN_BASE", DEFAULT_JOIN_BASE),
            request_timeout: Duration::from_secs(timeout_secs),
            sentry_dsn: var("SENTRY_DSN"),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment != "development"
    }

    /// Log filter used when `RUST_LOG` is unset. Crate debug logs are only on
    /// outside production.
    pub fn default_log_filter(&self) -> &'static str {
        if self.is_production() {
            "info"
        } else {
            "info,telemost_bridge=debug"
        }
    }

    /// `None` unless both client id and secret are configured.
    pub fn yandex_oauth_settings(&self) -> Option<YandexOAuthSettings> {
        Some(YandexOAuthSettings {
            client_id: self.yandex_client_id.clone()?,
            client_secret: self.yandex_client_secret.clone()?,
            redirect_uri: self.yandex_redirect_uri.clone(),
            auth_url: self.yandex_auth_url.clone(),
            token_url: self.yandex_token_url.clone(),
            timeout: self.request_timeout,
        })
    }

    pub fn bitrix_settings(&self) -> Bitrix24Settings {
        Bitrix24Settings {
            client_id: self.bitrix_client_id.clone(),
            client_secret: self.bitrix_client_secret.clone(),
            oauth_url: self.bitrix_oauth_url.clone(),
            timeout: self.request_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[("ENCRYPTION_KEY", "key")]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.request_timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.telemost_api_base, telemost::DEFAULT_API_BASE);
        assert_eq!(config.telemost_join_base, DEFAULT_JOIN_BASE);
        assert!(config.yandex_oauth_token.is_none());
        assert!(config.yandex_oauth_settings().is_none());
        assert!(!config.is_production());
        assert_eq!(config.default_log_filter(), "info,telemost_bridge=debug");
    }

    #[test]
    fn production_quiets_crate_debug_logs() {
        let config = config(&[("ENCRYPTION_KEY", "key"), ("ENVIRONMENT", "production")]).unwrap();
        assert!(config.is_production());
        assert_eq!(config.default_log_filter(), "info");
    }

    #[test]
    fn encryption_key_is_required() {
        assert!(matches!(config(&[]), Err(ConfigError::Missing("ENCRYPTION_KEY"))));
        assert!(matches!(config(&[("ENCRYPTION_KEY", "  ")]), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(matches!(
            config(&[("ENCRYPTION_KEY", "k"), ("PORT", "http")]),
            Err(ConfigError::Invalid { name: "PORT", .. })
        ));
        assert!(matches!(
            config(&[("ENCRYPTION_KEY", "k"), ("TELEMOST_TIMEOUT_SECS", "0")]),
            Err(ConfigError::Invalid { name: "TELEMOST_TIMEOUT_SECS", .. })
        ));
    }

    #[test]
    fn yandex_settings_need_id_and_secret() {
        let config = config(&[
            ("ENCRYPTION_KEY", "k"),
            ("YANDEX_CLIENT_ID", "id"),
            ("YANDEX_CLIENT_SECRET", "secret"),
            ("TELEMOST_TIMEOUT_SECS", "3"),
        ])
        .unwrap();
        let settings = config.yandex_oauth_settings().unwrap();
        assert_eq!(settings.client_id, "id");
        assert_eq!(settings.timeout, Duration::from_secs(3));
        assert_eq!(settings.redirect_uri, DEFAULT_REDIRECT_URI);
    }
}
