//! Configuration Management
//!
//! This module loads the server configuration: target databases, the
//! validation policy, orchestrator settings and the completion service.
//!
//! # Configuration Locations
//! - Explicit: `--config <path>`
//! - Local: `.pg-mcp/config.json` (team-shareable, per-project)
//! - Global: `~/.config/pg-mcp/config.json` (per-user)
//!
//! # Resolution Precedence
//! The first location that applies wins; files are not merged. An explicit
//! path must exist.
//!
//! # Secrets
//! Passwords can be stored directly or referenced through `password_env`.
//! The completion API key is always read from the environment.
//!
//! ```json
//! {
//!   "databases": [
//!     { "name": "sales", "host": "db.internal", "user": "reader", "password_env": "SALES_PW" },
//!     { "name": "hr", "readonly": true, "max_pool_size": 4 }
//!   ],
//!   "policy": { "allowed_schemas": ["public"], "max_result_rows": 1000 },
//!   "orchestrator": { "max_attempts": 3 },
//!   "completion": { "model": "gpt-4o-mini" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::DatabaseConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::generator::CompletionConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::validator::ValidationPolicy;

const CONFIG_DIR: &str = ".pg-mcp";
const APP_DIR: &str = "pg-mcp";
const CONFIG_FILE: &str = "config.json";

/// Stored database definition
///
/// Like `DatabaseConfig` but supports environment variable references
/// for the password and a per-database policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDatabase {
    /// Database and pool configuration
    #[serde(flatten)]
    pub config: DatabaseConfig,

    /// Environment variable name for password (if not storing password directly)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Whether this database is readonly (rejects all write/DDL statements
    /// regardless of the policy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,

    /// Policy replacing the global one for this database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ValidationPolicy>,
}

impl StoredDatabase {
    /// Resolve environment variables and return the `DatabaseConfig`
    pub fn resolve(&self) -> ConfigResult<DatabaseConfig> {
        let mut config = self.config.clone();

        if let Some(env_var) = &self.password_env {
            match std::env::var(env_var) {
                Ok(password) => config.password = Some(password),
                Err(_) => {
                    return Err(ConfigError::new(format!(
                        "Environment variable {env_var} not found for password of database '{}'",
                        self.config.name
                    )));
                }
            }
        }

        Ok(config)
    }

    /// Policy for this database, if it differs from `global`
    #[must_use]
    pub fn effective_policy(&self, global: &ValidationPolicy) -> Option<ValidationPolicy> {
        let readonly = self.readonly.unwrap_or(false);
        if !readonly {
            return self.policy.clone();
        }

        let mut policy = self.policy.clone().unwrap_or_else(|| global.clone());
        policy.allow_write = false;
        policy.allow_ddl = None;
        Some(policy)
    }
}

/// Server configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub databases: Vec<StoredDatabase>,

    /// Policy for every database without its own
    #[serde(default)]
    pub policy: ValidationPolicy,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub completion: CompletionConfig,
}

impl AppConfig {
    /// Check everything that can be checked without connecting
    pub fn validate(&self) -> ConfigResult<()> {
        let mut names = HashSet::new();
        for stored in &self.databases {
            stored.config.validate()?;
            if !names.insert(stored.config.name.as_str()) {
                return Err(ConfigError::new(format!(
                    "Database '{}' is defined more than once",
                    stored.config.name
                )));
            }
        }

        let policies =
            std::iter::once(&self.policy)
                .chain(self.databases.iter().filter_map(|d| d.policy.as_ref()));
        for policy in policies {
            if policy.max_statements == 0 {
                return Err(ConfigError::new("policy.max_statements must be at least 1"));
            }
            if policy.max_result_rows == Some(0) {
                return Err(ConfigError::new("policy.max_result_rows must be at least 1"));
            }
        }

        if self.orchestrator.max_attempts == 0 {
            return Err(ConfigError::new("orchestrator.max_attempts must be at least 1"));
        }
        if self.orchestrator.generation_timeout_ms == 0 {
            return Err(ConfigError::new(
                "orchestrator.generation_timeout_ms must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Database configs with secrets resolved, in file order
    pub fn resolve_databases(&self) -> ConfigResult<Vec<DatabaseConfig>> {
        self.databases.iter().map(StoredDatabase::resolve).collect()
    }

    /// Per-database policy overrides
    #[must_use]
    pub fn database_policies(&self) -> HashMap<String, ValidationPolicy> {
        self.databases
            .iter()
            .filter_map(|d| d.effective_policy(&self.policy).map(|p| (d.config.name.clone(), p)))
            .collect()
    }
}

/// Configuration file location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Path given on the command line
    Explicit,
    /// Local config: `.pg-mcp/config.json` (team-shareable)
    Local,
    /// Global config: `~/.config/pg-mcp/config.json` (per-user)
    Global,
}

impl fmt::Display for ConfigLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Explicit => "explicit",
            Self::Local => "local",
            Self::Global => "global",
        })
    }
}

/// Get path to local config file (`.pg-mcp/config.json`)
pub fn local_config_path() -> ConfigResult<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        ConfigError::new(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Get path to global config file (`~/.config/pg-mcp/config.json`)
pub fn global_config_path() -> ConfigResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::new("Could not determine user config directory"))?;

    Ok(config_dir.join(APP_DIR).join(CONFIG_FILE))
}

/// Pick the configuration file to load
pub fn resolve_config_path(explicit: Option<&Path>) -> ConfigResult<(ConfigLocation, PathBuf)> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::new(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }
        return Ok((ConfigLocation::Explicit, path.to_path_buf()));
    }

    let local = local_config_path()?;
    if local.exists() {
        return Ok((ConfigLocation::Local, local));
    }

    let global = global_config_path()?;
    if global.exists() {
        return Ok((ConfigLocation::Global, global));
    }

    Err(ConfigError::new(format!(
        "No configuration found. Create {} or {}, or pass --config",
        local.display(),
        global.display()
    )))
}

/// Read and validate a configuration file
pub fn load_config(path: &Path) -> ConfigResult<AppConfig> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ConfigError::new(format!("Could not read config file: {e}")))?;

    let config: AppConfig = serde_json::from_str(&contents)
        .map_err(|e| ConfigError::new(format!("Invalid config file format: {e}")))?;

    config.validate()?;
    Ok(config)
}

/// Resolve the configuration location and load it
pub fn load(explicit: Option<&Path>) -> ConfigResult<AppConfig> {
    let (location, path) = resolve_config_path(explicit)?;
    let config = load_config(&path)?;
    tracing::info!(
        location = %location,
        path = %path.display(),
        databases = config.databases.len(),
        "Configuration loaded"
    );
    Ok(config)
}
