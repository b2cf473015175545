use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

use crate::engine::sales::MAX_SALE_DURATION_HOURS;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub db_max_connections: u32,
    pub default_tax_percent: u32,
    pub max_page_size: i64,
    pub default_sale_duration_hours: i64,
    pub notify_webhook_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let db_max_connections =
            parse_or(&env_map, "DB_MAX_CONNECTIONS", 5u32, "must be a positive u32")?;
        if db_max_connections == 0 {
            return Err(invalid("DB_MAX_CONNECTIONS", "must be a positive u32"));
        }

        let default_tax_percent =
            parse_or(&env_map, "DEFAULT_TAX_PERCENT", 0u32, "must be 0..=100")?;
        if default_tax_percent > 100 {
            return Err(invalid("DEFAULT_TAX_PERCENT", "must be 0..=100"));
        }

        let max_page_size = parse_or(&env_map, "MAX_PAGE_SIZE", 100i64, "must be 1..=1000")?;
        if !(1..=1000).contains(&max_page_size) {
            return Err(invalid("MAX_PAGE_SIZE", "must be 1..=1000"));
        }

        let default_sale_duration_hours = parse_or(
            &env_map,
            "DEFAULT_SALE_DURATION_HOURS",
            24i64,
            "must be a whole number of hours",
        )?;
        if !(1..=MAX_SALE_DURATION_HOURS).contains(&default_sale_duration_hours) {
            return Err(invalid(
                "DEFAULT_SALE_DURATION_HOURS",
                &format!("must be 1..={} hours", MAX_SALE_DURATION_HOURS),
            ));
        }

        let notify_webhook_url = env_map
            .get("NOTIFY_WEBHOOK_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(url) = &notify_webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(invalid("NOTIFY_WEBHOOK_URL", "must be an http(s) URL"));
            }
        }

        Ok(Config {
            port,
            database_path,
            db_max_connections,
            default_tax_percent,
            max_page_size,
            default_sale_duration_hours,
            notify_webhook_url,
        })
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue(key.to_string(), reason.to_string())
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    reason: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key).map(|s| s.trim()) {
        None | Some("") => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| invalid(key, reason)),
    }
}
