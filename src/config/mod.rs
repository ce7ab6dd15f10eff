use std::env;
use std::path::PathBuf;

use crate::error::HubError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub graph: GraphConfig,
    pub model: ModelConfig,
    pub governance: GovernanceSettings,
    pub vault: VaultConfig,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
}

/// Graph backend (bolt) configuration
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    pub max_retry_time_ms: u64,
    pub acquisition_timeout_ms: u64,
}

/// Model runtime configuration
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub inventory_ttl_secs: u64,
    pub defaults: ModelDefaults,
}

/// Per-task-class default model names
#[derive(Debug, Clone)]
pub struct ModelDefaults {
    pub reasoning: String,
    pub coding: String,
    pub vision: String,
    pub chat: String,
    pub embedding: String,
    pub general: String,
    pub fallback: String,
}

/// Governance pipeline knobs, all on by default
#[derive(Debug, Clone)]
pub struct GovernanceSettings {
    pub enforce_logging: bool,
    pub block_on_failure: bool,
    pub require_timestamp: bool,
    pub require_source: bool,
    pub require_action: bool,
    pub iso8601_strict: bool,
    pub validate_schema: bool,
}

/// Notebook vault configuration
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub root: PathBuf,
    pub logs_folder: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Server-level behavior
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub shutdown_drain_secs: u64,
    pub health_probe_timeout_ms: u64,
}

impl ModelConfig {
    /// Base URL of the model runtime API.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl VaultConfig {
    /// Directory that receives the per-day governance log files.
    pub fn logs_dir(&self) -> PathBuf {
        self.logs_folder.clone().unwrap_or_else(|| self.root.clone())
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, HubError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let graph = GraphConfig {
            uri: env::var("NEO4J_URI").unwrap_or_else(|_| "bolt://localhost:7687".to_string()),
            user: env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string()),
            password: env::var("NEO4J_PASSWORD").map_err(|_| HubError::Config {
                message: "NEO4J_PASSWORD is required".to_string(),
            })?,
            database: env::var("NEO4J_DATABASE").unwrap_or_else(|_| "neo4j".to_string()),
            max_pool_size: parse_env("NEO4J_MAX_POOL_SIZE", 50),
            max_retry_time_ms: parse_env("NEO4J_MAX_RETRY_TIME_MS", 30_000),
            acquisition_timeout_ms: parse_env("NEO4J_ACQUISITION_TIMEOUT_MS", 60_000),
        };

        let model = ModelConfig {
            host: env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: parse_env("OLLAMA_PORT", 11434),
            timeout_ms: parse_env("MODEL_TIMEOUT_MS", 120_000),
            max_retries: parse_env("MODEL_MAX_RETRIES", 3),
            inventory_ttl_secs: parse_env("MODEL_INVENTORY_TTL_SECS", 300),
            defaults: ModelDefaults {
                reasoning: env::var("MODEL_REASONING")
                    .unwrap_or_else(|_| "qwq:32b".to_string()),
                coding: env::var("MODEL_CODING")
                    .unwrap_or_else(|_| "qwen2.5-coder:14b".to_string()),
                vision: env::var("MODEL_VISION").unwrap_or_else(|_| "llama3.2-vision".to_string()),
                chat: env::var("MODEL_CHAT").unwrap_or_else(|_| "llama3.1:8b".to_string()),
                embedding: env::var("MODEL_EMBEDDING")
                    .unwrap_or_else(|_| "nomic-embed-text".to_string()),
                general: env::var("MODEL_GENERAL").unwrap_or_else(|_| "llama3.1:8b".to_string()),
                fallback: env::var("MODEL_FALLBACK").unwrap_or_else(|_| "llama3.1:8b".to_string()),
            },
        };

        let governance = GovernanceSettings {
            enforce_logging: parse_bool_env("GOVERNANCE_ENFORCE", true),
            block_on_failure: parse_bool_env("GOVERNANCE_BLOCK_ON_FAILURE", true),
            require_timestamp: parse_bool_env("GOVERNANCE_REQUIRE_TIMESTAMP", true),
            require_source: parse_bool_env("GOVERNANCE_REQUIRE_SOURCE", true),
            require_action: parse_bool_env("GOVERNANCE_REQUIRE_ACTION", true),
            iso8601_strict: parse_bool_env("GOVERNANCE_ISO8601_STRICT", true),
            validate_schema: parse_bool_env("GOVERNANCE_VALIDATE_SCHEMA", true),
        };

        let vault = VaultConfig {
            root: PathBuf::from(env::var("VAULT_ROOT").map_err(|_| HubError::Config {
                message: "VAULT_ROOT is required".to_string(),
            })?),
            logs_folder: env::var("VAULT_LOGS_FOLDER").ok().map(PathBuf::from),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let server = ServerConfig {
            shutdown_drain_secs: parse_env("SHUTDOWN_DRAIN_SECS", 30),
            health_probe_timeout_ms: parse_env("HEALTH_PROBE_TIMEOUT_MS", 30_000),
        };

        Ok(Config {
            graph,
            model,
            governance,
            vault,
            logging,
            server,
        })
    }
}

impl Default for GovernanceSettings {
    fn default() -> Self {
        Self {
            enforce_logging: true,
            block_on_failure: true,
            require_timestamp: true,
            require_source: true,
            require_action: true,
            iso8601_strict: true,
            validate_schema: true,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_bool_env(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_governance_defaults_all_on() {
        let settings = GovernanceSettings::default();
        assert!(settings.enforce_logging);
        assert!(settings.block_on_failure);
        assert!(settings.require_timestamp);
        assert!(settings.require_source);
        assert!(settings.require_action);
        assert!(settings.iso8601_strict);
        assert!(settings.validate_schema);
    }

    #[test]
    fn test_model_base_url() {
        let config = ModelConfig {
            host: "localhost".to_string(),
            port: 11434,
            timeout_ms: 120_000,
            max_retries: 3,
            inventory_ttl_secs: 300,
            defaults: ModelDefaults {
                reasoning: "a".into(),
                coding: "b".into(),
                vision: "c".into(),
                chat: "d".into(),
                embedding: "e".into(),
                general: "f".into(),
                fallback: "g".into(),
            },
        };
        assert_eq!(config.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_vault_logs_dir_falls_back_to_root() {
        let vault = VaultConfig {
            root: PathBuf::from("/tmp/vault"),
            logs_folder: None,
        };
        assert_eq!(vault.logs_dir(), PathBuf::from("/tmp/vault"));

        let vault = VaultConfig {
            root: PathBuf::from("/tmp/vault"),
            logs_folder: Some(PathBuf::from("/tmp/vault/logs")),
        };
        assert_eq!(vault.logs_dir(), PathBuf::from("/tmp/vault/logs"));
    }
}
