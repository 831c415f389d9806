//! Directive configuration: defaults, then an optional TOML file, then environment.
//!
//! | Key | Env | Default | Description |
//! |-----|-----|---------|-------------|
//! | storage_path | DIRECTIVE__STORAGE_PATH | ./data/directive | Sled database (corrections, incidents) |
//! | rules_path | DIRECTIVE__RULES_PATH | (embedded) | Law table TOML |
//! | context_path | DIRECTIVE__CONTEXT_PATH | (none) | Static context snapshot JSON for the daemon |
//! | context_timeout_ms | DIRECTIVE__CONTEXT_TIMEOUT_MS | 2000 | Per-domain read timeout |
//! | alertmanager_url | DIRECTIVE__ALERTMANAGER_URL | (none) | Shutdown alerts; log-only when unset |
//! | max_concurrent_orders | DIRECTIVE__MAX_CONCURRENT_ORDERS | 16 | Batch concurrency bound |
//! | approval_mode | DIRECTIVE__APPROVAL_MODE | wait | `wait` on the approval bridge or `defer` to the caller |
//! | terminate_process | DIRECTIVE__TERMINATE_PROCESS | true | Exit the process on shutdown |
//!
//! The file path comes from `DIRECTIVE_CONFIG` (default `config/directive`, extension optional).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "DIRECTIVE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/directive";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Park the request on the approval bridge and wait for an operator.
    #[default]
    Wait,
    /// Return `pending_approval` immediately.
    Defer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectiveConfig {
    pub storage_path: String,
    #[serde(default)]
    pub rules_path: Option<String>,
    #[serde(default)]
    pub context_path: Option<String>,
    pub context_timeout_ms: u64,
    #[serde(default)]
    pub alertmanager_url: Option<String>,
    pub max_concurrent_orders: usize,
    #[serde(default)]
    pub approval_mode: ApprovalMode,
    pub terminate_process: bool,
}

impl Default for DirectiveConfig {
    fn default() -> Self {
        Self {
            storage_path: "./data/directive".to_string(),
            rules_path: None,
            context_path: None,
            context_timeout_ms: 2_000,
            alertmanager_url: None,
            max_concurrent_orders: 16,
            approval_mode: ApprovalMode::Wait,
            terminate_process: true,
        }
    }
}

impl DirectiveConfig {
    /// Precedence: environment > file named by `DIRECTIVE_CONFIG` (or `config/directive`) > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&config_path)
    }

    /// Same as `load` with an explicit file path. A missing file is not an error.
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        let defaults = Self::default();
        let built = config::Config::builder()
            .set_default("storage_path", defaults.storage_path)?
            .set_default("context_timeout_ms", defaults.context_timeout_ms as i64)?
            .set_default("max_concurrent_orders", defaults.max_concurrent_orders as i64)?
            .set_default("approval_mode", "wait")?
            .set_default("terminate_process", defaults.terminate_process)?
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("DIRECTIVE").separator("__"))
            .build()?;

        let cfg: Self = built.try_deserialize()?;
        if cfg.max_concurrent_orders == 0 {
            return Err(config::ConfigError::Message(
                "max_concurrent_orders must be at least 1".to_string(),
            ));
        }
        Ok(cfg)
    }

    pub fn context_timeout(&self) -> Duration {
        Duration::from_millis(self.context_timeout_ms)
    }

    pub fn storage_path(&self) -> PathBuf {
        PathBuf::from(&self.storage_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        let cfg = DirectiveConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg, DirectiveConfig::default());
        assert_eq!(cfg.context_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directive.toml");
        std::fs::write(
            &path,
            r#"
storage_path = "/var/lib/directive"
alertmanager_url = "http://alertmanager:9093/api/v2/alerts"
max_concurrent_orders = 4
approval_mode = "defer"
"#,
        )
        .unwrap();

        // Extension is optional, as with the default path.
        let stem = dir.path().join("directive");
        let cfg = DirectiveConfig::load_from(stem.to_str().unwrap()).unwrap();
        assert_eq!(cfg.storage_path, "/var/lib/directive");
        assert_eq!(cfg.max_concurrent_orders, 4);
        assert_eq!(cfg.approval_mode, ApprovalMode::Defer);
        assert_eq!(cfg.alertmanager_url.as_deref(), Some("http://alertmanager:9093/api/v2/alerts"));
        assert!(cfg.rules_path.is_none());
        assert!(cfg.terminate_process);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.toml");
        std::fs::write(&path, "max_concurrent_orders = 0\n").unwrap();
        assert!(DirectiveConfig::load_from(path.to_str().unwrap()).is_err());
    }
}
