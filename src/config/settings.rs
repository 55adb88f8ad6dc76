//! Process settings from the environment (`.env` honoured via dotenvy).

use crate::error::ConfigError;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    /// Path of the JSON model file.
    pub resource_config: PathBuf,
    /// Overrides every entity's schema when set (e.g. per-environment schemas).
    pub schema_override: Option<String>,
    pub max_connections: u32,
    pub body_limit: usize,
}

impl Settings {
    /// Read settings from the process environment after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup (used by tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| ConfigError::Validation("DATABASE_URL is required".into()))?;
        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.into())
            .parse()
            .map_err(|e| ConfigError::Validation(format!("BIND_ADDR: {}", e)))?;
        let resource_config = lookup("RESOURCE_CONFIG")
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::Validation("RESOURCE_CONFIG is required".into()))?;
        let schema_override = lookup("DB_SCHEMA").filter(|s| !s.trim().is_empty());
        let max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let body_limit = parse_or(&lookup, "BODY_LIMIT_BYTES", DEFAULT_BODY_LIMIT)?;
        Ok(Settings {
            database_url,
            bind_addr,
            resource_config,
            schema_override,
            max_connections,
            body_limit,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e| ConfigError::Validation(format!("{}: {}", key, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn applies_defaults() {
        let s = Settings::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("RESOURCE_CONFIG", "model.json"),
        ]))
        .unwrap();
        assert_eq!(s.bind_addr.port(), 3000);
        assert_eq!(s.max_connections, 5);
        assert_eq!(s.body_limit, 1024 * 1024);
        assert!(s.schema_override.is_none());
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = Settings::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("RESOURCE_CONFIG", "model.json"),
            ("DB_MAX_CONNECTIONS", "many"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("DB_MAX_CONNECTIONS"));
    }
}
