// crates/rando-config/src/lib.rs
// ============================================================================
// Module: Rando Configuration
// Description: Configuration loading and validation for the Rando workspace.
// Purpose: Materialize a SchemeRegistry from strict, fail-closed TOML config.
// Dependencies: rando-core, rando-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Missing or invalid configuration fails closed: a config file that cannot
//! be read, parsed, or validated never yields a partially-usable registry.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ConfigError;
pub use config::RandoConfig;
pub use config::SchemeConfig;
pub use config::StoreBackendConfig;
