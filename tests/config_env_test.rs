//! Environment-driven configuration tests.
//!
//! Env vars are process-global, so everything runs in one test function to
//! avoid interleaving with parallel tests.

use std::env;

use mcp_memory_hub::config::{Config, LogFormat};

#[test]
fn test_config_from_env_defaults_and_overrides() {
    // required
    env::set_var("NEO4J_PASSWORD", "secret");
    env::set_var("VAULT_ROOT", "/tmp/hub-vault");

    // overrides
    env::set_var("NEO4J_MAX_POOL_SIZE", "10");
    env::set_var("MODEL_MAX_RETRIES", "5");
    env::set_var("OLLAMA_PORT", "12345");
    env::set_var("GOVERNANCE_BLOCK_ON_FAILURE", "false");
    env::set_var("LOG_FORMAT", "json");

    let config = Config::from_env().expect("config should load");

    // defaults
    assert_eq!(config.graph.uri, "bolt://localhost:7687");
    assert_eq!(config.graph.user, "neo4j");
    assert_eq!(config.graph.database, "neo4j");
    assert_eq!(config.graph.acquisition_timeout_ms, 60_000);
    assert_eq!(config.model.timeout_ms, 120_000);
    assert_eq!(config.model.inventory_ttl_secs, 300);
    assert_eq!(config.server.shutdown_drain_secs, 30);
    assert!(config.governance.enforce_logging);

    // overrides took effect
    assert_eq!(config.graph.password, "secret");
    assert_eq!(config.graph.max_pool_size, 10);
    assert_eq!(config.model.max_retries, 5);
    assert_eq!(config.model.port, 12345);
    assert_eq!(config.model.base_url(), "http://localhost:12345");
    assert!(!config.governance.block_on_failure);
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.vault.root.display().to_string(), "/tmp/hub-vault");

    // unparseable numerics fall back to defaults
    env::set_var("NEO4J_MAX_POOL_SIZE", "not-a-number");
    let config = Config::from_env().expect("config should still load");
    assert_eq!(config.graph.max_pool_size, 50);

    // missing password is a hard error
    env::remove_var("NEO4J_PASSWORD");
    assert!(Config::from_env().is_err());
    env::set_var("NEO4J_PASSWORD", "secret");

    // missing vault root is a hard error
    env::remove_var("VAULT_ROOT");
    assert!(Config::from_env().is_err());
}
