// crates/rando-core/src/core/records.rs
// ============================================================================
// Module: Rando Persisted Records
// Description: Slot and Registration records persisted by allocation stores.
// Purpose: Define the rows the importer creates and the randomizer mutates.
// Dependencies: serde, time, crate::core::identifiers, crate::core::manifest
// ============================================================================

//! ## Overview
//! A `Slot` is one persisted row corresponding one-to-one with a manifest
//! row; it is created unallocated by the importer and mutated exactly once,
//! at allocation. A `Registration` is the external record of an enrolling
//! subject, created by the enrollment workflow before allocation and updated
//! by the randomizer when the subject is randomized.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

use crate::core::identifiers::AssignmentCode;
use crate::core::identifiers::SchemeName;
use crate::core::identifiers::Sid;
use crate::core::identifiers::SiteName;
use crate::core::identifiers::SubjectIdentifier;
use crate::core::manifest::ManifestRow;

// ============================================================================
// SECTION: Slot
// ============================================================================

/// One persisted slot row; the unit of allocation.
///
/// # Invariants
/// - `sid` is unique within a scheme and immutable after import.
/// - Once `subject_identifier` is set the row is never mutated again.
/// - At most one slot is bound to any subject.
/// - `allocated` is true exactly when `subject_identifier` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Sequential slot identifier assigned at import.
    pub sid: Sid,
    /// Treatment assignment code (blinded until allocation).
    pub assignment: AssignmentCode,
    /// Site partition key from the manifest.
    pub site_name: SiteName,
    /// Scheme-specific extra manifest columns (e.g. a stratification factor).
    pub extra: BTreeMap<String, String>,
    /// Allocated subject, or `None` while the slot is free.
    pub subject_identifier: Option<SubjectIdentifier>,
    /// True once the slot has been claimed.
    pub allocated: bool,
    /// When the slot was claimed.
    #[serde(with = "time::serde::rfc3339::option")]
    pub allocated_datetime: Option<OffsetDateTime>,
    /// User that performed the allocation.
    pub allocated_user: Option<String>,
    /// Site the allocation was performed at.
    pub allocated_site: Option<SiteName>,
}

impl Slot {
    /// Creates an unallocated slot from a manifest row.
    #[must_use]
    pub fn from_manifest_row(row: &ManifestRow) -> Self {
        Self {
            sid: row.sid,
            assignment: row.assignment.clone(),
            site_name: row.site_name.clone(),
            extra: row.extra.clone(),
            subject_identifier: None,
            allocated: false,
            allocated_datetime: None,
            allocated_user: None,
            allocated_site: None,
        }
    }

    /// Returns true while the slot has not been claimed.
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.subject_identifier.is_none()
    }

    /// Returns true when every extra filter entry matches this slot.
    #[must_use]
    pub fn matches_extra(&self, filter: &BTreeMap<String, String>) -> bool {
        filter.iter().all(|(key, value)| self.extra.get(key) == Some(value))
    }
}

// ============================================================================
// SECTION: Registration
// ============================================================================

/// Registration status of an enrolling subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// Registered by the enrollment workflow; not yet allocated a slot.
    Registered,
    /// Randomized; a slot has been bound to the subject.
    Randomized,
}

impl RegistrationStatus {
    /// Returns the stable wire form of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Randomized => "randomized",
        }
    }
}

/// External record of an enrolling subject.
///
/// # Invariants
/// - If `sid` is set it matches exactly one slot whose `subject_identifier`
///   equals this registration's identifier.
/// - Only the randomizer mutates a registration after enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Subject identifier assigned at enrollment.
    pub identifier: SubjectIdentifier,
    /// Allocated slot identifier, or `None` until randomized.
    pub sid: Option<Sid>,
    /// When the subject was randomized.
    #[serde(with = "time::serde::rfc3339::option")]
    pub randomization_datetime: Option<OffsetDateTime>,
    /// Current registration status.
    pub registration_status: RegistrationStatus,
    /// Scheme that randomized the subject, once allocated.
    pub randomization_list_model: Option<SchemeName>,
}

impl Registration {
    /// Creates a new unallocated registration for an enrolling subject.
    #[must_use]
    pub const fn new(identifier: SubjectIdentifier) -> Self {
        Self {
            identifier,
            sid: None,
            randomization_datetime: None,
            registration_status: RegistrationStatus::Registered,
            randomization_list_model: None,
        }
    }

    /// Returns true once the registration has been randomized.
    #[must_use]
    pub const fn is_allocated(&self) -> bool {
        self.sid.is_some()
    }
}
