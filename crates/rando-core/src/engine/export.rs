// crates/rando-core/src/engine/export.rs
// ============================================================================
// Module: Rando Allocation Export
// Description: Pipe-delimited snapshot of allocated slots for reporting.
// Purpose: Feed downstream reporting without exposing unallocated assignments.
// Dependencies: time, crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! The export is a read-only collaborator: a pipe-delimited CSV snapshot of
//! allocated slots ordered by sid, with the allocation value resolved from
//! the assignment map. Free slots never appear in the snapshot, so the
//! unconsumed part of the sequence stays blinded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;

use thiserror::Error;
use time::format_description::well_known::Rfc3339;

use crate::core::AssignmentMap;
use crate::interfaces::SlotStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Export columns, in order.
const EXPORT_FIELDNAMES: [&str; 6] = [
    "subject_identifier",
    "sid",
    "assignment",
    "allocated_datetime",
    "site_name",
    "allocation",
];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Export failures.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The store could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The snapshot could not be written.
    #[error("export io error: {0}")]
    Io(String),
    /// A persisted slot carries an assignment outside the assignment map.
    #[error("allocated slot {sid} carries unknown assignment `{assignment}`")]
    UnknownAssignment {
        /// Offending sid.
        sid: u64,
        /// Assignment code persisted on the slot.
        assignment: String,
    },
}

// ============================================================================
// SECTION: Export
// ============================================================================

/// Writes the pipe-delimited snapshot of allocated slots, returning the
/// number of rows written (excluding the header).
///
/// # Errors
///
/// Returns [`ExportError`] when the store cannot be read, the writer fails,
/// or an allocated slot names an assignment outside the map.
pub fn export_allocated<W: Write>(
    store: &dyn SlotStore,
    assignment_map: &AssignmentMap,
    writer: &mut W,
) -> Result<u64, ExportError> {
    writeln!(writer, "{}", EXPORT_FIELDNAMES.join("|"))
        .map_err(|err| ExportError::Io(err.to_string()))?;

    let mut written: u64 = 0;
    for slot in store.slots_ordered()? {
        let Some(subject) = slot.subject_identifier.as_ref() else {
            continue;
        };
        let allocation = assignment_map.allocation(&slot.assignment).ok_or_else(|| {
            ExportError::UnknownAssignment {
                sid: slot.sid.get(),
                assignment: slot.assignment.to_string(),
            }
        })?;
        let datetime = slot
            .allocated_datetime
            .map(|value| value.format(&Rfc3339).unwrap_or_default())
            .unwrap_or_default();
        writeln!(
            writer,
            "{subject}|{}|{}|{datetime}|{}|{allocation}",
            slot.sid, slot.assignment, slot.site_name
        )
        .map_err(|err| ExportError::Io(err.to_string()))?;
        written += 1;
    }
    Ok(written)
}
