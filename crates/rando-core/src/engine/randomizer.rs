// crates/rando-core/src/engine/randomizer.rs
// ============================================================================
// Module: Rando Allocation Engine
// Description: Claims the next eligible slot for an enrolling subject.
// Purpose: Enforce at-most-once allocation in ascending sid order per partition.
// Dependencies: tracing, crate::core, crate::interfaces, crate::engine
// ============================================================================

//! ## Overview
//! The randomizer drives the per-(scheme, subject) state machine
//! `{unregistered, registered-unallocated, allocated}` with a single
//! operation, [`Randomizer::randomize`]. It validates the request, resolves
//! the registration as an explicit three-way result, and delegates the
//! claim-plus-registration write to the store as one committed transaction.
//! "Pick the smallest free matching sid" is the statistically load-bearing
//! rule: the pre-registered sequence is only valid if slots are consumed in
//! ascending order per site and stratum. All lookups are scoped to a single
//! allocation; nothing is cached across calls, since staleness under
//! concurrency is itself a correctness hazard.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;

use crate::core::AssignmentCode;
use crate::core::Scheme;
use crate::core::SiteName;
use crate::core::SubjectIdentifier;
use crate::engine::gate::AllocationGate;
use crate::engine::gate::GateClosed;
use crate::engine::importer::ImportError;
use crate::engine::importer::ListImporter;
use crate::engine::verifier::ListVerifier;
use crate::engine::verifier::VerificationError;
use crate::interfaces::AllocateError;
use crate::interfaces::AllocationStore;
use crate::interfaces::RegistrationLookup;
use crate::interfaces::SlotClaim;
use crate::interfaces::SlotFilter;
use crate::interfaces::StoreError;
use crate::interfaces::SyncSource;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Failures raised while activating a scheme's randomizer.
#[derive(Debug, Error)]
pub enum ActivationError {
    /// The scheme's manifest could not be imported.
    #[error(transparent)]
    Import(#[from] ImportError),
    /// Verification could not run against the store or manifest.
    #[error(transparent)]
    Verification(#[from] VerificationError),
}

/// Failures raised by one `randomize()` call.
///
/// # Invariants
/// - Never retried automatically; every failure terminates the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RandomizeError {
    /// No registration exists for the subject.
    #[error("subject does not exist; got {0}")]
    RegistrationNotFound(SubjectIdentifier),
    /// The subject was already randomized.
    ///
    /// The code identifies which store observed the prior claim so operators
    /// can tell which one is out of sync.
    #[error("subject already randomized (code: {code}); got {subject_identifier}")]
    AlreadyRandomized {
        /// Subject that was already randomized.
        subject_identifier: SubjectIdentifier,
        /// Store that observed the prior claim.
        code: SyncSource,
    },
    /// Required request attributes are missing.
    #[error("randomization failed; insufficient data, missing [{}]", missing.join(", "))]
    InsufficientData {
        /// Names of the missing attributes.
        missing: Vec<String>,
    },
    /// The slot pool for the requested partition is exhausted, or the claim
    /// lost a race and must be investigated by an operator.
    #[error("randomization failed; {0}")]
    Allocation(String),
    /// Allocation is blocked until the list verifies cleanly.
    #[error(transparent)]
    GateClosed(#[from] GateClosed),
    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Request
// ============================================================================

/// One allocation request for an enrolling subject.
///
/// Datetime, user, and site are caller-supplied; the engine never reads the
/// wall clock or an ambient user itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomizeRequest {
    /// Subject to randomize.
    pub subject_identifier: SubjectIdentifier,
    /// Report datetime for the allocation.
    pub report_datetime: Option<OffsetDateTime>,
    /// Site the subject enrolls at.
    pub site: Option<SiteName>,
    /// User performing the allocation.
    pub user: Option<String>,
    /// Scheme-specific extra attributes (e.g. a stratification factor).
    pub extra: BTreeMap<String, String>,
}

// ============================================================================
// SECTION: Randomizer
// ============================================================================

/// Allocation engine for one scheme.
///
/// # Invariants
/// - Slot claim and registration update commit as one transaction.
/// - Successive commits per partition observe strictly increasing sids.
pub struct Randomizer {
    /// Immutable scheme configuration.
    scheme: Scheme,
    /// Combined slot and registration store.
    store: Arc<dyn AllocationStore + Send + Sync>,
    /// Verification-driven allocation gate.
    gate: Arc<AllocationGate>,
}

impl Randomizer {
    /// Activates a scheme: imports the manifest (tolerating a prior import
    /// as a no-op), verifies the list, and records the outcome on the gate.
    ///
    /// The assignment map was validated when the scheme was constructed; a
    /// mismatched description map can never reach this point.
    ///
    /// # Errors
    ///
    /// Returns [`ActivationError`] when the import or verification cannot
    /// run. A verification that runs but finds discrepancies is not an
    /// error here; it leaves the gate closed.
    pub fn activate(
        scheme: Scheme,
        store: Arc<dyn AllocationStore + Send + Sync>,
        gate: Arc<AllocationGate>,
    ) -> Result<Self, ActivationError> {
        let importer = ListImporter::new(scheme.assignment_map(), scheme.extra_csv_columns());
        let report = importer.import_tolerant(scheme.manifest_path(), store.as_ref())?;
        if report.skipped {
            tracing::debug!(scheme = %scheme.name(), "randomization list already imported");
        }

        let verifier = ListVerifier::new(scheme.extra_csv_columns());
        let discrepancies = verifier.verify(scheme.manifest_path(), store.as_ref())?;
        gate.record(&discrepancies);
        if let Some(first) = discrepancies.first() {
            tracing::warn!(scheme = %scheme.name(), %first, "randomization list verification failed");
        }

        Ok(Self {
            scheme,
            store,
            gate,
        })
    }

    /// Returns the scheme this randomizer allocates for.
    #[must_use]
    pub const fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Randomizes a subject by claiming the smallest free matching sid.
    ///
    /// # Errors
    ///
    /// Returns [`RandomizeError`] when the gate is closed, the registration
    /// is missing or already allocated, required attributes are absent, the
    /// partition's slot pool is exhausted, or the claim loses a race.
    pub fn randomize(&self, request: &RandomizeRequest) -> Result<(), RandomizeError> {
        self.gate.permit(None)?;

        // Step 1: resolve the registration as an explicit three-way result.
        let registration = match self.store.lookup(&request.subject_identifier)? {
            RegistrationLookup::NotFound => {
                return Err(RandomizeError::RegistrationNotFound(
                    request.subject_identifier.clone(),
                ));
            }
            RegistrationLookup::Allocated(_) => {
                return Err(RandomizeError::AlreadyRandomized {
                    subject_identifier: request.subject_identifier.clone(),
                    code: SyncSource::RegistrationModel,
                });
            }
            RegistrationLookup::Unallocated(registration) => registration,
        };

        // Step 2: all required attributes must be present.
        let (datetime, site, user) = self.required_attrs(request)?;

        // Step 3: a slot already bound to the subject means the stores are
        // out of sync with the registration record.
        if self.store.find_by_subject(&registration.identifier)?.is_some() {
            return Err(RandomizeError::AlreadyRandomized {
                subject_identifier: request.subject_identifier.clone(),
                code: SyncSource::SlotModel,
            });
        }

        // Steps 4-6: claim the smallest free matching sid and update the
        // registration in one committed transaction.
        let filter = SlotFilter {
            site_name: site.clone(),
            extra: self.scheme.slot_filter_extras(&request.extra),
        };
        let claim = SlotClaim {
            subject_identifier: request.subject_identifier.clone(),
            allocated_datetime: datetime,
            allocated_user: user,
            allocated_site: site,
            scheme: self.scheme.name().clone(),
        };
        let slot = self.store.allocate(&filter, &claim).map_err(|error| match error {
            AllocateError::Exhausted {
                filter,
            } => RandomizeError::Allocation(format!("no additional sids available for {filter}")),
            AllocateError::Conflict(message) => {
                RandomizeError::Allocation(format!("slot claim conflict: {message}"))
            }
            AllocateError::AlreadyAllocated {
                source,
            } => RandomizeError::AlreadyRandomized {
                subject_identifier: request.subject_identifier.clone(),
                code: source,
            },
            AllocateError::Store(store_error) => RandomizeError::Store(store_error),
        })?;

        tracing::info!(
            scheme = %self.scheme.name(),
            subject = %request.subject_identifier,
            sid = slot.sid.get(),
            site = %slot.site_name,
            "subject randomized"
        );
        Ok(())
    }

    /// Returns the assignment for a subject, or `None` when the subject was
    /// never allocated through this scheme.
    ///
    /// The assignment is never exposed prior to allocation, preserving
    /// blinding.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    pub fn get_assignment(
        &self,
        subject_identifier: &SubjectIdentifier,
    ) -> Result<Option<AssignmentCode>, StoreError> {
        Ok(self.store.find_by_subject(subject_identifier)?.map(|slot| slot.assignment))
    }

    /// Validates that datetime, site, user, and scheme-required extras are
    /// all present on the request.
    fn required_attrs(
        &self,
        request: &RandomizeRequest,
    ) -> Result<(OffsetDateTime, SiteName, String), RandomizeError> {
        let mut missing: Vec<String> = Vec::new();
        if request.report_datetime.is_none() {
            missing.push("report_datetime".to_string());
        }
        if request.site.is_none() {
            missing.push("site".to_string());
        }
        if request.user.as_deref().is_none_or(str::is_empty) {
            missing.push("user".to_string());
        }
        for attr in self.scheme.required_extra_attrs() {
            if request.extra.get(attr).is_none_or(String::is_empty) {
                missing.push(attr.clone());
            }
        }
        if !missing.is_empty() {
            return Err(RandomizeError::InsufficientData {
                missing,
            });
        }
        match (request.report_datetime, request.site.clone(), request.user.clone()) {
            (Some(datetime), Some(site), Some(user)) => Ok((datetime, site, user)),
            _ => Err(RandomizeError::InsufficientData {
                missing: vec!["report_datetime".to_string()],
            }),
        }
    }
}
