// crates/rando-core/src/engine/gate.rs
// ============================================================================
// Module: Rando Allocation Gate
// Description: Verification-driven gate that admits or blocks allocation.
// Purpose: Keep the randomizer closed until the list verifies cleanly.
// Dependencies: thiserror, crate::engine::verifier
// ============================================================================

//! ## Overview
//! The gate holds the latest verification outcome. It starts closed: no
//! allocation is permitted until a verification pass records an empty
//! discrepancy list. Maintenance operations the host declares on the
//! allow-list (import, schema migration) may proceed while the gate is
//! closed, since they are exactly the operations that resolve discrepancies.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Mutex;

use thiserror::Error;

use crate::engine::verifier::Discrepancy;

// ============================================================================
// SECTION: Maintenance Operations
// ============================================================================

/// Maintenance operations a host may allow through a closed gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MaintenanceOp {
    /// Loading or reloading the randomization list.
    Import,
    /// Host-driven schema migration.
    Migration,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Raised when allocation is attempted while the gate is closed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("allocation blocked: {reason}")]
pub struct GateClosed {
    /// First blocking discrepancy, or the unverified-state notice.
    pub reason: String,
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// Internal gate state guarded by the mutex.
#[derive(Debug)]
struct GateState {
    /// Rendered discrepancies from the last verification, if any ran.
    last_verification: Option<Vec<String>>,
}

/// Verification-driven allocation gate.
///
/// # Invariants
/// - Closed until a verification records zero discrepancies.
/// - Allow-listed maintenance operations bypass a closed gate; allocation
///   never does.
#[derive(Debug)]
pub struct AllocationGate {
    /// Latest verification outcome.
    state: Mutex<GateState>,
    /// Maintenance operations declared by the host.
    allowed: BTreeSet<MaintenanceOp>,
}

impl AllocationGate {
    /// Creates a closed gate with the host-declared maintenance allow-list.
    #[must_use]
    pub fn new(allowed: impl IntoIterator<Item = MaintenanceOp>) -> Self {
        Self {
            state: Mutex::new(GateState {
                last_verification: None,
            }),
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Records the outcome of a verification pass.
    pub fn record(&self, discrepancies: &[Discrepancy]) {
        let rendered: Vec<String> =
            discrepancies.iter().map(ToString::to_string).collect();
        if let Ok(mut guard) = self.state.lock() {
            guard.last_verification = Some(rendered);
        }
    }

    /// Returns true when the last verification was clean.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state
            .lock()
            .map(|guard| {
                guard.last_verification.as_ref().is_some_and(Vec::is_empty)
            })
            .unwrap_or(false)
    }

    /// Permits the caller through the gate, or fails with [`GateClosed`].
    ///
    /// `maintenance` identifies the calling operation when it is one of the
    /// declared maintenance operations; allocation passes `None`.
    ///
    /// # Errors
    ///
    /// Returns [`GateClosed`] when the gate is closed and the operation is
    /// not on the allow-list.
    pub fn permit(&self, maintenance: Option<MaintenanceOp>) -> Result<(), GateClosed> {
        if let Some(op) = maintenance
            && self.allowed.contains(&op)
        {
            return Ok(());
        }
        let guard = self.state.lock().map_err(|_| GateClosed {
            reason: "allocation gate mutex poisoned".to_string(),
        })?;
        match guard.last_verification.as_ref() {
            None => Err(GateClosed {
                reason: "randomization list has not been verified".to_string(),
            }),
            Some(messages) if messages.is_empty() => Ok(()),
            Some(messages) => Err(GateClosed {
                reason: messages.first().cloned().unwrap_or_default(),
            }),
        }
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
        reason = "Test-only assertions and helpers are permitted."
    )]

    use super::*;

    #[test]
    fn starts_closed_until_clean_verification() {
        let gate = AllocationGate::new([]);
        assert!(!gate.is_open());
        assert!(gate.permit(None).is_err());
        gate.record(&[]);
        assert!(gate.is_open());
        assert!(gate.permit(None).is_ok());
    }

    #[test]
    fn discrepancies_close_the_gate() {
        let gate = AllocationGate::new([]);
        gate.record(&[]);
        gate.record(&[Discrepancy::NotLoaded]);
        assert!(!gate.is_open());
        let error = gate.permit(None).expect_err("gate closed");
        assert!(error.reason.contains("not been loaded"));
    }

    #[test]
    fn allow_listed_maintenance_bypasses_closed_gate() {
        let gate = AllocationGate::new([MaintenanceOp::Import]);
        assert!(gate.permit(Some(MaintenanceOp::Import)).is_ok());
        assert!(gate.permit(Some(MaintenanceOp::Migration)).is_err());
        assert!(gate.permit(None).is_err());
    }
}
