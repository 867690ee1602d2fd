// crates/rando-core/src/interfaces/mod.rs
// ============================================================================
// Module: Rando Store Interfaces
// Description: Backend-agnostic interfaces for slot and registration storage.
// Purpose: Define the contract surfaces the allocation engine drives.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how the allocation engine touches persisted state
//! without embedding backend details. The one non-negotiable contract is
//! [`AllocationStore::allocate`]: select the smallest free matching sid and
//! claim it together with the registration update in a single committed
//! transaction, so no two concurrent callers can receive the same slot and
//! no crash can leave a claimed slot without a linked registration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use time::OffsetDateTime;

use crate::core::Registration;
use crate::core::SchemeName;
use crate::core::Sid;
use crate::core::SiteName;
use crate::core::Slot;
use crate::core::SubjectIdentifier;
use crate::core::manifest::ManifestRow;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Store access errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Backend engine error.
    #[error("store error: {0}")]
    Store(String),
    /// Invalid persisted data.
    #[error("store invalid data: {0}")]
    Invalid(String),
}

/// Which persisted store observed a prior claim for a subject.
///
/// Carried on already-randomized failures so operators can tell whether the
/// registration store or the slot table is the one out of sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSource {
    /// The registration record already carries a sid.
    RegistrationModel,
    /// A slot is already bound to the subject.
    SlotModel,
}

impl SyncSource {
    /// Returns the stable diagnostic code for the source.
    #[must_use]
    pub const fn as_code(self) -> &'static str {
        match self {
            Self::RegistrationModel => "registration-model",
            Self::SlotModel => "slot-model",
        }
    }
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl std::error::Error for SyncSource {}

/// Allocation failures surfaced by [`AllocationStore::allocate`].
///
/// # Invariants
/// - Never retried automatically; blind retry could violate sid ordering.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocateError {
    /// The slot pool for the requested partition is exhausted.
    #[error("no additional sids available for {filter}")]
    Exhausted {
        /// Rendered eligibility filter (site and extra attributes).
        filter: String,
    },
    /// A concurrent writer claimed the selected slot first, or the post-claim
    /// re-read disagreed with the chosen row.
    #[error("slot claim conflict: {0}")]
    Conflict(String),
    /// The subject was already allocated when the transaction re-checked.
    #[error("subject already allocated (source: {source})")]
    AlreadyAllocated {
        /// Store that observed the prior claim.
        source: SyncSource,
    },
    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Lookup Results
// ============================================================================

/// Three-way registration lookup result.
///
/// Replaces branch-on-exception detection of "already allocated" with an
/// explicit value the caller switches over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationLookup {
    /// No registration exists for the identifier.
    NotFound,
    /// A registration exists and has not been allocated a slot.
    Unallocated(Registration),
    /// A registration exists and already carries a sid.
    Allocated(Registration),
}

// ============================================================================
// SECTION: Allocation Inputs
// ============================================================================

/// Slot eligibility filter for one allocation.
///
/// # Invariants
/// - `extra` holds only scheme-declared manifest columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotFilter {
    /// Site partition the slot must belong to.
    pub site_name: SiteName,
    /// Extra column values the slot must match exactly.
    pub extra: BTreeMap<String, String>,
}

impl fmt::Display for SlotFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "site_name=`{}`", self.site_name)?;
        for (key, value) in &self.extra {
            write!(f, ", {key}=`{value}`")?;
        }
        Ok(())
    }
}

/// Values written onto the claimed slot and registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotClaim {
    /// Subject the slot is bound to.
    pub subject_identifier: SubjectIdentifier,
    /// Allocation timestamp supplied by the caller.
    pub allocated_datetime: OffsetDateTime,
    /// User performing the allocation.
    pub allocated_user: String,
    /// Site the allocation is performed at.
    pub allocated_site: SiteName,
    /// Scheme recorded on the registration.
    pub scheme: SchemeName,
}

// ============================================================================
// SECTION: Slot Store
// ============================================================================

/// Persisted slot table for one scheme.
pub trait SlotStore {
    /// Returns the number of persisted slots.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn count(&self) -> Result<u64, StoreError>;

    /// Returns all slots ordered by ascending sid.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn slots_ordered(&self) -> Result<Vec<Slot>, StoreError>;

    /// Returns the slot with the given sid, if present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn find_by_sid(&self, sid: Sid) -> Result<Option<Slot>, StoreError>;

    /// Returns the slot bound to the subject, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn find_by_subject(
        &self,
        subject_identifier: &SubjectIdentifier,
    ) -> Result<Option<Slot>, StoreError>;

    /// Inserts all manifest rows as unallocated slots in one transaction and
    /// records the manifest digest. With `overwrite` the existing slot table
    /// is cleared first inside the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails; no partial writes remain.
    fn insert_manifest(
        &self,
        rows: &[ManifestRow],
        digest: &str,
        overwrite: bool,
    ) -> Result<u64, StoreError>;

    /// Returns the manifest digest recorded at import, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn manifest_digest(&self) -> Result<Option<String>, StoreError>;
}

// ============================================================================
// SECTION: Registration Store
// ============================================================================

/// Persisted registration records for enrolling subjects.
pub trait RegistrationStore {
    /// Looks up the registration for a subject as a three-way result.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn lookup(
        &self,
        subject_identifier: &SubjectIdentifier,
    ) -> Result<RegistrationLookup, StoreError>;

    /// Creates or replaces a registration record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn save(&self, registration: &Registration) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Allocation Store
// ============================================================================

/// Combined store able to claim a slot and update the registration together.
pub trait AllocationStore: SlotStore + RegistrationStore + fmt::Debug {
    /// Claims the smallest free sid matching the filter and writes the claim
    /// plus the registration update as a single committed transaction.
    ///
    /// The implementation must re-check inside the transaction that neither
    /// store already carries a claim for the subject, and must re-read the
    /// claimed row by its unique allocation predicate before committing;
    /// disagreement aborts with [`AllocateError::Conflict`].
    ///
    /// # Errors
    ///
    /// Returns [`AllocateError`] on pool exhaustion, lost races, prior
    /// claims, or store failure. Nothing is committed on error.
    fn allocate(&self, filter: &SlotFilter, claim: &SlotClaim) -> Result<Slot, AllocateError>;
}
