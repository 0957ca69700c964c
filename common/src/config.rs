//! Service configuration.
//!
//! Two layers, both read from the process environment:
//! - [`AppConfig`]: HTTP server settings with defaults, always available.
//! - [`ChatConfig`]: database and language-model credentials. These are
//!   required; when any is missing the service starts but refuses requests.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

/// Environment variables that must be present (and non-empty).
pub const REQUIRED_VARS: [&str; 5] = ["DB_USER", "PASSWORD", "DB_HOST", "DB_NAME", "OPENAI_API_KEY"];

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_DB_PORT: u16 = 5432;
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Configuration errors detected at startup.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// One or more required variables are absent or empty.
    #[error("Missing necessary environment variables: {}", .0.join(", "))]
    Missing(Vec<String>),

    /// A variable is present but cannot be parsed.
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: String, value: String },
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Name reported in logs and health responses.
    pub service_name: String,
    pub host: String,
    pub port: u16,
    /// Upper bound of the database pool.
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection.
    pub connect_timeout_secs: u64,
    /// Origins allowed by CORS. A single `*` allows any origin.
    pub cors_allowed_origins: Vec<String>,
    /// Directory served as the frontend fallback, only set in production.
    pub static_dir: Option<String>,
}

impl AppConfig {
    /// Loads server settings for the named service, falling back to defaults
    /// for anything unset or unparsable.
    pub fn load_with_service(service_name: &str) -> Self {
        Self::from_lookup(service_name, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(service_name: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_or = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGIN.to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let production = lookup("ENV")
            .map(|env| env.eq_ignore_ascii_case("production"))
            .unwrap_or(false);
        let static_dir = production
            .then(|| lookup("STATIC_DIR").unwrap_or_else(|| "static".to_string()));

        Self {
            service_name: service_name.to_string(),
            host: lookup("SERVER_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: lookup("SERVER_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_PORT),
            max_connections: parse_or("DB_MAX_CONNECTIONS", 5) as u32,
            connect_timeout_secs: parse_or("DB_CONNECT_TIMEOUT_SECS", 10),
            cors_allowed_origins,
            static_dir,
        }
    }
}

/// PostgreSQL connection settings.
#[derive(Clone)]
pub struct DatabaseSettings {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub name: String,
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .finish()
    }
}

/// Chat-completions API settings.
#[derive(Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl fmt::Debug for OpenAiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiSettings")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Everything the chat pipeline needs to start.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub database: DatabaseSettings,
    pub openai: OpenAiSettings,
    /// Row cap suggested to the model when the question names none.
    pub top_k: usize,
    /// Sample rows per table included in the schema context.
    pub sample_rows: usize,
}

impl ChatConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// Every missing required variable is reported in one error, in the
    /// order of [`REQUIRED_VARS`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let missing: Vec<String> = REQUIRED_VARS
            .iter()
            .copied()
            .filter(|&key| present(key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let required = |key: &str| present(key).unwrap_or_default();

        Ok(Self {
            database: DatabaseSettings {
                user: required("DB_USER"),
                password: required("PASSWORD"),
                host: required("DB_HOST"),
                port: parse_optional(&lookup, "DB_PORT", DEFAULT_DB_PORT)?,
                name: required("DB_NAME"),
            },
            openai: OpenAiSettings {
                api_key: required("OPENAI_API_KEY"),
                model: present("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                base_url: present("OPENAI_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                temperature: parse_optional(&lookup, "OPENAI_TEMPERATURE", 0.0)?,
                timeout_secs: parse_optional(&lookup, "OPENAI_TIMEOUT_SECS", 60)?,
            },
            top_k: parse_optional(&lookup, "SQL_TOP_K", 5)?,
            sample_rows: parse_optional(&lookup, "SAMPLE_ROWS_IN_TABLE_INFO", 3)?,
        })
    }
}

fn parse_optional<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            name: key.to_string(),
            value,
        }),
    }
}

/// Loads `KEY=VALUE` lines from a `.env` file into the environment.
///
/// Best effort: a missing or unreadable file is ignored, and variables that
/// are already set keep their value.
pub fn load_dotenv(path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim().trim_start_matches("export ").trim();
            let value = value.trim().trim_matches('"').trim_matches('\'');
            if std::env::var(key).is_err() {
                std::env::set_var(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn complete_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("DB_USER", "postgres"),
            ("PASSWORD", "secret"),
            ("DB_HOST", "db.example.com"),
            ("DB_NAME", "prices"),
            ("OPENAI_API_KEY", "sk-test"),
        ]
    }

    #[test]
    fn test_complete_env_uses_defaults() {
        let config = ChatConfig::from_lookup(lookup_from(&complete_env())).unwrap();
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.openai.model, "gpt-4o-mini");
        assert_eq!(config.openai.base_url, "https://api.openai.com/v1");
        assert_eq!(config.openai.temperature, 0.0);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.sample_rows, 3);
    }

    #[test]
    fn test_missing_vars_are_all_named() {
        let env = [("DB_HOST", "localhost"), ("DB_NAME", "prices")];
        let err = ChatConfig::from_lookup(lookup_from(&env)).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing(vec![
                "DB_USER".to_string(),
                "PASSWORD".to_string(),
                "OPENAI_API_KEY".to_string(),
            ])
        );
        assert_eq!(
            err.to_string(),
            "Missing necessary environment variables: DB_USER, PASSWORD, OPENAI_API_KEY"
        );
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let mut env = complete_env();
        env.retain(|(k, _)| *k != "OPENAI_API_KEY");
        env.push(("OPENAI_API_KEY", "  "));
        let err = ChatConfig::from_lookup(lookup_from(&env)).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let mut env = complete_env();
        env.push(("DB_PORT", "not-a-port"));
        let err = ChatConfig::from_lookup(lookup_from(&env)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref name, .. } if name == "DB_PORT"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ChatConfig::from_lookup(lookup_from(&complete_env())).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
        assert!(!debug.contains("sk-test"));
    }

    #[test]
    fn test_app_config_defaults() {
        let config = AppConfig::from_lookup("chat-service", |_| None);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.cors_allowed_origins, vec!["http://localhost:3000"]);
        assert!(config.static_dir.is_none());
    }

    #[test]
    fn test_app_config_production_serves_static() {
        let env = [
            ("ENV", "Production"),
            ("SERVER_PORT", "9000"),
            ("CORS_ALLOWED_ORIGINS", "https://a.example, https://b.example"),
        ];
        let config = AppConfig::from_lookup("chat-service", lookup_from(&env));
        assert_eq!(config.port, 9000);
        assert_eq!(config.static_dir.as_deref(), Some("static"));
        assert_eq!(config.cors_allowed_origins.len(), 2);
    }
}
