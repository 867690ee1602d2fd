// crates/rando-core/src/stores/memory.rs
// ============================================================================
// Module: Rando In-Memory Store
// Description: Mutex-guarded in-memory slot and registration store.
// Purpose: Provide a deterministic store implementation without external deps.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! This module provides an in-memory implementation of the store interfaces
//! for tests and single-process hosts. One mutex guards slots, registrations,
//! and the recorded digest together, so the claim-plus-registration write is
//! naturally a single critical section with the same visibility guarantees a
//! durable transaction provides.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::core::Registration;
use crate::core::RegistrationStatus;
use crate::core::Sid;
use crate::core::Slot;
use crate::core::SubjectIdentifier;
use crate::core::manifest::ManifestRow;
use crate::interfaces::AllocateError;
use crate::interfaces::AllocationStore;
use crate::interfaces::RegistrationLookup;
use crate::interfaces::RegistrationStore;
use crate::interfaces::SlotClaim;
use crate::interfaces::SlotFilter;
use crate::interfaces::SlotStore;
use crate::interfaces::StoreError;
use crate::interfaces::SyncSource;

// ============================================================================
// SECTION: State
// ============================================================================

/// Mutable state guarded by the store mutex.
#[derive(Debug, Default)]
struct MemoryState {
    /// Slots keyed by sid (iteration order is ascending sid).
    slots: BTreeMap<Sid, Slot>,
    /// Registrations keyed by subject identifier.
    registrations: BTreeMap<SubjectIdentifier, Registration>,
    /// Manifest digest recorded at import.
    digest: Option<String>,
}

// ============================================================================
// SECTION: Memory Store
// ============================================================================

/// In-memory slot and registration store for tests and in-process hosts.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    /// Shared state behind one mutex.
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Locks the state, mapping a poisoned mutex to a store error.
    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Store("memory store mutex poisoned".to_string()))
    }
}

impl SlotStore for MemoryStore {
    fn count(&self) -> Result<u64, StoreError> {
        let guard = self.lock()?;
        Ok(u64::try_from(guard.slots.len()).unwrap_or(u64::MAX))
    }

    fn slots_ordered(&self) -> Result<Vec<Slot>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.slots.values().cloned().collect())
    }

    fn find_by_sid(&self, sid: Sid) -> Result<Option<Slot>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.slots.get(&sid).cloned())
    }

    fn find_by_subject(
        &self,
        subject_identifier: &SubjectIdentifier,
    ) -> Result<Option<Slot>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .slots
            .values()
            .find(|slot| slot.subject_identifier.as_ref() == Some(subject_identifier))
            .cloned())
    }

    fn insert_manifest(
        &self,
        rows: &[ManifestRow],
        digest: &str,
        overwrite: bool,
    ) -> Result<u64, StoreError> {
        let mut guard = self.lock()?;
        if !guard.slots.is_empty() && !overwrite {
            return Err(StoreError::Invalid("slot table is not empty".to_string()));
        }
        guard.slots.clear();
        for row in rows {
            guard.slots.insert(row.sid, Slot::from_manifest_row(row));
        }
        guard.digest = Some(digest.to_string());
        Ok(u64::try_from(rows.len()).unwrap_or(u64::MAX))
    }

    fn manifest_digest(&self) -> Result<Option<String>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.digest.clone())
    }
}

impl RegistrationStore for MemoryStore {
    fn lookup(
        &self,
        subject_identifier: &SubjectIdentifier,
    ) -> Result<RegistrationLookup, StoreError> {
        let guard = self.lock()?;
        Ok(match guard.registrations.get(subject_identifier) {
            None => RegistrationLookup::NotFound,
            Some(registration) if registration.sid.is_some() => {
                RegistrationLookup::Allocated(registration.clone())
            }
            Some(registration) => RegistrationLookup::Unallocated(registration.clone()),
        })
    }

    fn save(&self, registration: &Registration) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        guard.registrations.insert(registration.identifier.clone(), registration.clone());
        Ok(())
    }
}

impl AllocationStore for MemoryStore {
    fn allocate(&self, filter: &SlotFilter, claim: &SlotClaim) -> Result<Slot, AllocateError> {
        let mut guard = self.state.lock().map_err(|_| {
            AllocateError::Store(StoreError::Store("memory store mutex poisoned".to_string()))
        })?;

        // Re-check both stores for a prior claim under the lock.
        if guard
            .slots
            .values()
            .any(|slot| slot.subject_identifier.as_ref() == Some(&claim.subject_identifier))
        {
            return Err(AllocateError::AlreadyAllocated {
                source: SyncSource::SlotModel,
            });
        }
        match guard.registrations.get(&claim.subject_identifier) {
            None => {
                return Err(AllocateError::Conflict(format!(
                    "registration disappeared for {}",
                    claim.subject_identifier
                )));
            }
            Some(registration) if registration.sid.is_some() => {
                return Err(AllocateError::AlreadyAllocated {
                    source: SyncSource::RegistrationModel,
                });
            }
            Some(_) => {}
        }

        // Smallest free sid matching the partition filter.
        let sid = guard
            .slots
            .values()
            .find(|slot| {
                slot.is_free()
                    && slot.site_name == filter.site_name
                    && slot.matches_extra(&filter.extra)
            })
            .map(|slot| slot.sid)
            .ok_or_else(|| AllocateError::Exhausted {
                filter: filter.to_string(),
            })?;

        let Some(slot) = guard.slots.get_mut(&sid) else {
            return Err(AllocateError::Conflict(format!("slot {sid} vanished during claim")));
        };
        slot.subject_identifier = Some(claim.subject_identifier.clone());
        slot.allocated = true;
        slot.allocated_datetime = Some(claim.allocated_datetime);
        slot.allocated_user = Some(claim.allocated_user.clone());
        slot.allocated_site = Some(claim.allocated_site.clone());
        let claimed = slot.clone();

        let Some(registration) = guard.registrations.get_mut(&claim.subject_identifier) else {
            return Err(AllocateError::Conflict(format!(
                "registration disappeared for {}",
                claim.subject_identifier
            )));
        };
        registration.sid = Some(sid);
        registration.randomization_datetime = Some(claim.allocated_datetime);
        registration.registration_status = RegistrationStatus::Randomized;
        registration.randomization_list_model = Some(claim.scheme.clone());

        // Re-read by the unique allocation predicate before releasing the lock.
        let confirmed = guard
            .slots
            .values()
            .find(|slot| slot.subject_identifier.as_ref() == Some(&claim.subject_identifier))
            .cloned()
            .ok_or_else(|| AllocateError::Conflict("claimed slot not found on re-read".to_string()))?;
        if confirmed.sid != claimed.sid {
            return Err(AllocateError::Conflict(format!(
                "re-read returned sid {} instead of {}",
                confirmed.sid, claimed.sid
            )));
        }
        Ok(confirmed)
    }
}
