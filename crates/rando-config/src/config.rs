// crates/rando-config/src/config.rs
// ============================================================================
// Module: Rando Configuration
// Description: Configuration loading and validation for the Rando workspace.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: rando-core, rando-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! One TOML file declares the store backend and every randomization scheme
//! the host activates. Loading enforces size, path, and UTF-8 limits, and
//! `into_registry` materializes a validated [`SchemeRegistry`]: a mismatched
//! assignment/description key set or a duplicate scheme name is fatal before
//! any allocation can run.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use rando_core::AssignmentCode;
use rando_core::AssignmentMap;
use rando_core::Scheme;
use rando_core::SchemeName;
use rando_core::SchemeRegistry;
use rando_store_sqlite::SqliteStoreConfig;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "rando.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "RANDO_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of schemes in one config file.
pub(crate) const MAX_SCHEMES: usize = 64;
/// Maximum number of assignment codes per scheme.
pub(crate) const MAX_ASSIGNMENTS: usize = 64;
/// Maximum number of declared extra manifest columns per scheme.
pub(crate) const MAX_EXTRA_COLUMNS: usize = 16;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Top-level Rando configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RandoConfig {
    /// Store backend selection.
    pub store: StoreBackendConfig,
    /// Randomization schemes to register at startup.
    #[serde(default)]
    pub schemes: Vec<SchemeConfig>,
}

/// Store backend selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreBackendConfig {
    /// In-memory store (tests and ephemeral hosts).
    Memory,
    /// Durable `SQLite` store.
    Sqlite(SqliteStoreConfig),
}

/// One randomization scheme declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemeConfig {
    /// Unique scheme name.
    pub name: String,
    /// Path to the audited manifest CSV.
    pub manifest_path: PathBuf,
    /// Assignment code to allocation integer.
    pub assignments: BTreeMap<String, i64>,
    /// Assignment code to operator-facing description.
    pub descriptions: BTreeMap<String, String>,
    /// Extra manifest columns beyond the fixed three, in header order.
    #[serde(default)]
    pub extra_csv_columns: Vec<String>,
    /// Request attributes that must be present to randomize.
    #[serde(default)]
    pub required_extra_attrs: Vec<String>,
    /// Whether the trial is blinded.
    #[serde(default = "default_blinded")]
    pub blinded: bool,
}

/// Returns the default blinded flag.
const fn default_blinded() -> bool {
    true
}

impl RandoConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// Resolution order: explicit path, then `RANDO_CONFIG`, then
    /// `rando.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schemes.is_empty() {
            return Err(ConfigError::Invalid("at least one scheme is required".to_string()));
        }
        if self.schemes.len() > MAX_SCHEMES {
            return Err(ConfigError::Invalid("too many schemes".to_string()));
        }
        if let StoreBackendConfig::Sqlite(sqlite) = &self.store {
            validate_path_string("store.path", &sqlite.path.to_string_lossy())?;
        }
        for scheme in &self.schemes {
            scheme.validate()?;
        }
        Ok(())
    }

    /// Builds the validated scheme registry from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a scheme's assignment and description
    /// key sets differ or a scheme name is registered twice.
    pub fn into_registry(&self) -> Result<SchemeRegistry, ConfigError> {
        let mut registry = SchemeRegistry::new();
        for scheme in &self.schemes {
            registry
                .register(scheme.build()?)
                .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        }
        Ok(registry)
    }
}

impl SchemeConfig {
    /// Validates one scheme declaration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("scheme name must be non-empty".to_string()));
        }
        validate_path_string(
            &format!("schemes.{}.manifest_path", self.name),
            &self.manifest_path.to_string_lossy(),
        )?;
        if self.assignments.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "scheme `{}` must declare at least one assignment",
                self.name
            )));
        }
        if self.assignments.len() > MAX_ASSIGNMENTS {
            return Err(ConfigError::Invalid(format!(
                "scheme `{}` declares too many assignments",
                self.name
            )));
        }
        if self.extra_csv_columns.len() > MAX_EXTRA_COLUMNS {
            return Err(ConfigError::Invalid(format!(
                "scheme `{}` declares too many extra columns",
                self.name
            )));
        }
        Ok(())
    }

    /// Materializes the validated scheme.
    fn build(&self) -> Result<Scheme, ConfigError> {
        let allocations: BTreeMap<AssignmentCode, i64> = self
            .assignments
            .iter()
            .map(|(code, value)| (AssignmentCode::new(code.as_str()), *value))
            .collect();
        let descriptions: BTreeMap<AssignmentCode, String> = self
            .descriptions
            .iter()
            .map(|(code, text)| (AssignmentCode::new(code.as_str()), text.clone()))
            .collect();
        let assignment_map = AssignmentMap::new(allocations, descriptions)
            .map_err(|err| ConfigError::Invalid(format!("scheme `{}`: {err}", self.name)))?;
        Ok(Scheme::new(
            SchemeName::new(self.name.as_str()),
            assignment_map,
            self.manifest_path.clone(),
            self.extra_csv_columns.clone(),
            self.required_extra_attrs.clone(),
            self.blinded,
        ))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from the caller or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    let path = Path::new(trimmed);
    for component in path.components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
