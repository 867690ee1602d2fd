// crates/rando-core/src/core/assignment.rs
// ============================================================================
// Module: Rando Assignment Map
// Description: Treatment code to allocation value mapping with descriptions.
// Purpose: Validate assignment configuration at scheme activation boundaries.
// Dependencies: crate::core::identifiers, crate::core::scheme
// ============================================================================

//! ## Overview
//! An assignment map binds each treatment code to an integer allocation value
//! and pairs it with a human-readable description map over the identical key
//! set. Key-set inequality is a fatal configuration error: a description that
//! names a code the map does not know (or vice versa) would unblind or
//! misreport assignments downstream.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::AssignmentCode;
use crate::core::scheme::ConfigurationError;

// ============================================================================
// SECTION: Assignment Map
// ============================================================================

/// Fixed mapping of assignment code to allocation value and description.
///
/// # Invariants
/// - Allocation and description maps cover the identical key set.
/// - The map is immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentMap {
    /// Allocation value per assignment code.
    allocations: BTreeMap<AssignmentCode, i64>,
    /// Description per assignment code.
    descriptions: BTreeMap<AssignmentCode, String>,
}

impl AssignmentMap {
    /// Creates a validated assignment map.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::AssignmentMapMismatch`] when the
    /// description map key set differs from the allocation map key set.
    pub fn new(
        allocations: BTreeMap<AssignmentCode, i64>,
        descriptions: BTreeMap<AssignmentCode, String>,
    ) -> Result<Self, ConfigurationError> {
        let missing: Vec<AssignmentCode> = allocations
            .keys()
            .filter(|code| !descriptions.contains_key(*code))
            .cloned()
            .collect();
        let extra: Vec<AssignmentCode> = descriptions
            .keys()
            .filter(|code| !allocations.contains_key(*code))
            .cloned()
            .collect();
        if !missing.is_empty() || !extra.is_empty() {
            return Err(ConfigurationError::AssignmentMapMismatch {
                missing,
                extra,
            });
        }
        Ok(Self {
            allocations,
            descriptions,
        })
    }

    /// Returns true when the code is a member of the map.
    #[must_use]
    pub fn contains(&self, code: &AssignmentCode) -> bool {
        self.allocations.contains_key(code)
    }

    /// Returns the allocation value for a code.
    #[must_use]
    pub fn allocation(&self, code: &AssignmentCode) -> Option<i64> {
        self.allocations.get(code).copied()
    }

    /// Returns the description for a code.
    #[must_use]
    pub fn description(&self, code: &AssignmentCode) -> Option<&str> {
        self.descriptions.get(code).map(String::as_str)
    }

    /// Returns the assignment codes in sorted order.
    pub fn codes(&self) -> impl Iterator<Item = &AssignmentCode> {
        self.allocations.keys()
    }

    /// Returns the number of assignment codes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    /// Returns true when the map holds no codes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
