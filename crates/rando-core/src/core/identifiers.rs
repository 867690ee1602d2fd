// crates/rando-core/src/core/identifiers.rs
// ============================================================================
// Module: Rando Identifiers
// Description: Canonical opaque identifiers for slots, subjects, and schemes.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the canonical identifiers used throughout Rando.
//! Identifiers are opaque and serialize as numbers or strings on the wire.
//! The slot identifier enforces a positive, 1-based invariant at construction
//! boundaries because its ordering is clinically meaningful.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU64;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Sequential slot identifier assigned at import.
///
/// # Invariants
/// - Always >= 1 (non-zero, 1-based).
/// - Ascending order is the order in which slots must be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sid(NonZeroU64);

impl Sid {
    /// Creates a new slot identifier from a non-zero value.
    #[must_use]
    pub const fn new(id: NonZeroU64) -> Self {
        Self(id)
    }

    /// Creates a slot identifier from a raw value (returns `None` if zero).
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Returns the raw identifier value (always >= 1).
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.get().fmt(f)
    }
}

/// Subject identifier assigned by the enrollment workflow.
///
/// # Invariants
/// - Opaque UTF-8 string; no normalization or validation is applied by this type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectIdentifier(String);

impl SubjectIdentifier {
    /// Creates a new subject identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for SubjectIdentifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SubjectIdentifier {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Site name used as the slot partition key.
///
/// # Invariants
/// - Opaque UTF-8 string; site directory resolution is a host concern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteName(String);

impl SiteName {
    /// Creates a new site name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for SiteName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SiteName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Treatment assignment code drawn from a scheme's assignment map.
///
/// # Invariants
/// - Opaque UTF-8 string; membership in the assignment map is validated at
///   import and allocation boundaries, not by this type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentCode(String);

impl AssignmentCode {
    /// Creates a new assignment code.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssignmentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for AssignmentCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AssignmentCode {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Randomization scheme name registered with the scheme registry.
///
/// # Invariants
/// - Opaque UTF-8 string; uniqueness is enforced by the scheme registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemeName(String);

impl SchemeName {
    /// Creates a new scheme name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for SchemeName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SchemeName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
