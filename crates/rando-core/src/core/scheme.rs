// crates/rando-core/src/core/scheme.rs
// ============================================================================
// Module: Rando Scheme Registry
// Description: Immutable scheme configuration and the process-wide registry.
// Purpose: Let multiple independently verified randomization lists coexist.
// Dependencies: thiserror, crate::core::{assignment, identifiers}
// ============================================================================

//! ## Overview
//! A `Scheme` is one named randomization configuration: assignment map,
//! manifest path, declared extra manifest columns, and the extra attributes
//! an allocation request must supply. Schemes are immutable values built
//! during process initialization and registered exactly once with the
//! `SchemeRegistry` by deliberate calls; duplicate names are a fatal
//! configuration error and registration never relies on load-order side
//! effects.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::assignment::AssignmentMap;
use crate::core::identifiers::AssignmentCode;
use crate::core::identifiers::SchemeName;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Fatal configuration errors raised at process initialization.
///
/// # Invariants
/// - Never recovered at runtime; the host must fix configuration and restart.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Assignment and description maps cover different key sets.
    #[error(
        "assignment description map keys do not match assignment map: \
         missing {missing:?}, extra {extra:?}"
    )]
    AssignmentMapMismatch {
        /// Codes present in the allocation map but not described.
        missing: Vec<AssignmentCode>,
        /// Described codes absent from the allocation map.
        extra: Vec<AssignmentCode>,
    },
    /// A scheme name was registered more than once.
    #[error("scheme already registered: {0}")]
    DuplicateScheme(SchemeName),
}

// ============================================================================
// SECTION: Scheme
// ============================================================================

/// One named randomization configuration.
///
/// # Invariants
/// - Immutable after construction; no class-level mutable state.
/// - The assignment map was validated at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheme {
    /// Registry name of the scheme.
    name: SchemeName,
    /// Validated assignment map.
    assignment_map: AssignmentMap,
    /// Path of the audited manifest file.
    manifest_path: PathBuf,
    /// Extra manifest columns declared by the scheme, in header order.
    extra_csv_columns: Vec<String>,
    /// Extra allocation request attributes that must be present.
    required_extra_attrs: Vec<String>,
    /// True while the trial is blinded.
    trial_blinded: bool,
}

impl Scheme {
    /// Creates an immutable scheme configuration.
    #[must_use]
    pub fn new(
        name: SchemeName,
        assignment_map: AssignmentMap,
        manifest_path: PathBuf,
        extra_csv_columns: Vec<String>,
        required_extra_attrs: Vec<String>,
        trial_blinded: bool,
    ) -> Self {
        Self {
            name,
            assignment_map,
            manifest_path,
            extra_csv_columns,
            required_extra_attrs,
            trial_blinded,
        }
    }

    /// Returns the scheme name.
    #[must_use]
    pub const fn name(&self) -> &SchemeName {
        &self.name
    }

    /// Returns the validated assignment map.
    #[must_use]
    pub const fn assignment_map(&self) -> &AssignmentMap {
        &self.assignment_map
    }

    /// Returns the manifest file path.
    #[must_use]
    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Returns the declared extra manifest columns.
    #[must_use]
    pub fn extra_csv_columns(&self) -> &[String] {
        &self.extra_csv_columns
    }

    /// Returns the extra allocation attributes required by this scheme.
    #[must_use]
    pub fn required_extra_attrs(&self) -> &[String] {
        &self.required_extra_attrs
    }

    /// Returns true while the trial is blinded.
    #[must_use]
    pub const fn trial_blinded(&self) -> bool {
        self.trial_blinded
    }

    /// Splits request extras into the subset used as a slot predicate.
    ///
    /// Only keys that name declared extra manifest columns filter slot
    /// eligibility; other extras are validation-only attributes.
    #[must_use]
    pub fn slot_filter_extras(
        &self,
        extras: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        extras
            .iter()
            .filter(|(key, _)| self.extra_csv_columns.iter().any(|column| column == *key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

// ============================================================================
// SECTION: Scheme Registry
// ============================================================================

/// Process-wide mapping of scheme name to scheme configuration.
///
/// # Invariants
/// - Populated once during process initialization by deliberate calls.
/// - Scheme names are unique; duplicates are fatal.
#[derive(Debug, Default, Clone)]
pub struct SchemeRegistry {
    /// Registered schemes keyed by name.
    schemes: BTreeMap<SchemeName, Scheme>,
}

impl SchemeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schemes: BTreeMap::new(),
        }
    }

    /// Registers a scheme under its name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::DuplicateScheme`] when the name is
    /// already registered.
    pub fn register(&mut self, scheme: Scheme) -> Result<(), ConfigurationError> {
        if self.schemes.contains_key(scheme.name()) {
            return Err(ConfigurationError::DuplicateScheme(scheme.name().clone()));
        }
        self.schemes.insert(scheme.name().clone(), scheme);
        Ok(())
    }

    /// Returns the scheme registered under the name, if any.
    #[must_use]
    pub fn get(&self, name: &SchemeName) -> Option<&Scheme> {
        self.schemes.get(name)
    }

    /// Returns the registered schemes in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Scheme> {
        self.schemes.values()
    }

    /// Returns the number of registered schemes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemes.len()
    }

    /// Returns true when no scheme has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemes.is_empty()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        reason = "Test-only assertions and helpers are permitted."
    )]

    use super::*;

    fn sample_scheme(name: &str) -> Scheme {
        let allocations =
            [(AssignmentCode::new("active"), 1), (AssignmentCode::new("placebo"), 2)]
                .into_iter()
                .collect();
        let descriptions = [
            (AssignmentCode::new("active"), "Active: study drug".to_string()),
            (AssignmentCode::new("placebo"), "Placebo: control".to_string()),
        ]
        .into_iter()
        .collect();
        let map = AssignmentMap::new(allocations, descriptions).expect("valid map");
        Scheme::new(
            SchemeName::new(name),
            map,
            PathBuf::from("randomization_list.csv"),
            Vec::new(),
            Vec::new(),
            true,
        )
    }

    #[test]
    fn registers_and_resolves_by_name() {
        let mut registry = SchemeRegistry::new();
        registry.register(sample_scheme("default")).expect("register");
        registry.register(sample_scheme("substudy")).expect("register");
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&SchemeName::new("default")).is_some());
        assert!(registry.get(&SchemeName::new("absent")).is_none());
    }

    #[test]
    fn duplicate_name_is_fatal() {
        let mut registry = SchemeRegistry::new();
        registry.register(sample_scheme("default")).expect("register");
        let result = registry.register(sample_scheme("default"));
        assert!(matches!(result, Err(ConfigurationError::DuplicateScheme(_))));
    }

    #[test]
    fn slot_filter_extras_keeps_declared_columns_only() {
        let allocations = [(AssignmentCode::new("active"), 1)].into_iter().collect();
        let descriptions =
            [(AssignmentCode::new("active"), "Active".to_string())].into_iter().collect();
        let map = AssignmentMap::new(allocations, descriptions).expect("valid map");
        let scheme = Scheme::new(
            SchemeName::new("stratified"),
            map,
            PathBuf::from("list.csv"),
            vec!["gender".to_string()],
            vec!["gender".to_string()],
            true,
        );
        let extras = [
            ("gender".to_string(), "F".to_string()),
            ("consent_version".to_string(), "3".to_string()),
        ]
        .into_iter()
        .collect();
        let filter = scheme.slot_filter_extras(&extras);
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.get("gender").map(String::as_str), Some("F"));
    }
}
