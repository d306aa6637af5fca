use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::{env, path::PathBuf, time::Duration};

const ENV_PREFIX: &str = "INBOX_STATS";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpServerConfig {
    pub port: u16,
    pub log_format: LogFormat,
    pub allowed_origins: Vec<String>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            log_format: LogFormat::Text,
            allowed_origins: vec!["http://localhost:5173".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Message ids requested per listing call, also the fan-out width
    pub page_size: u32,
    pub request_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            request_timeout_secs: 30,
        }
    }
}

impl IngestConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub idle_ttl_secs: u64,
    pub eviction_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 60 * 60,
            eviction_interval_secs: 5 * 60,
        }
    }
}

impl RegistryConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ApiLimits {
    pub default_top_senders: usize,
    pub max_top_senders: usize,
    pub default_email_page: usize,
    pub max_email_page: usize,
}

impl Default for ApiLimits {
    fn default() -> Self {
        Self {
            default_top_senders: 20,
            max_top_senders: 500,
            default_email_page: 50,
            max_email_page: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: HttpServerConfig,
    pub ingest: IngestConfig,
    pub registry: RegistryConfig,
    pub api: ApiLimits,
}

impl ServerConfig {
    /// Loads `config.toml` from the config directory when it exists, then applies
    /// `INBOX_STATS__<SECTION>__<KEY>` environment overrides and finally `PORT`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_dir().join("config.toml");
        let mut config: ServerConfig = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if let Ok(port) = env::var("PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| ConfigError::Message(format!("PORT is invalid: {port}")))?;
        }

        config.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.registry.eviction_interval_secs == 0 {
            return Err(ConfigError::Message(
                "registry.eviction_interval_secs must be at least 1".to_string(),
            ));
        }

        Ok(self)
    }
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Server Config:\n{:?}\n\nIngest: {:?}\n\nRegistry: {:?}\n\nApi: {:?}",
            self.server, self.ingest, self.registry, self.api,
        )
    }
}

fn config_dir() -> PathBuf {
    match env::var("APP_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
            manifest_dir
                .parent()
                .map(|p| p.join("config"))
                .unwrap_or_else(|| manifest_dir.join("config"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_source_uses_defaults() {
        let config: ServerConfig = Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.ingest.page_size, 100);
        assert_eq!(config.api.default_top_senders, 20);
        assert_eq!(config.server.log_format, LogFormat::Text);
        assert_eq!(config.registry.idle_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let toml = r#"
            [ingest]
            page_size = 25

            [server]
            log_format = "json"
        "#;
        let config: ServerConfig = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.ingest.page_size, 25);
        assert_eq!(config.ingest.request_timeout_secs, 30);
        assert_eq!(config.server.log_format, LogFormat::Json);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_zero_eviction_interval_is_rejected() {
        let toml = r#"
            [registry]
            eviction_interval_secs = 0
        "#;
        let config: ServerConfig = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(config.validate().is_err());
        assert!(ServerConfig::default().validate().is_ok());
    }
}
