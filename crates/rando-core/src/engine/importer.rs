// crates/rando-core/src/engine/importer.rs
// ============================================================================
// Module: Rando List Importer
// Description: One-time, idempotency-guarded manifest import.
// Purpose: Load the audited randomization list into the slot table exactly once.
// Dependencies: tracing, crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! The importer reads manifest rows in file order and creates one unallocated
//! slot per row in a single store transaction. A non-empty slot table rejects
//! the import (`AlreadyImported`) unless overwrite is requested; overwrite
//! clears the table first and is only safe while no allocations exist, which
//! the caller must guarantee. Unknown assignment codes and duplicate sids
//! abort the import with no partial writes. The manifest digest is recorded
//! alongside the import so the verifier can detect later file substitution.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::AssignmentMap;
use crate::core::Sid;
use crate::core::manifest::ManifestError;
use crate::core::manifest::manifest_digest;
use crate::core::manifest::read_manifest;
use crate::interfaces::SlotStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Import failures; the import aborts with no partial writes.
///
/// # Invariants
/// - Surfaced to the operator; never retried automatically.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImportError {
    /// The slot table already contains rows and overwrite was not requested.
    #[error("randomization list already imported; not overwriting")]
    AlreadyImported,
    /// A manifest row names an assignment code outside the assignment map.
    #[error("invalid assignment code on line {line}: `{code}`")]
    InvalidAssignment {
        /// 1-indexed manifest line.
        line: u64,
        /// Offending assignment code.
        code: String,
    },
    /// A sid appears more than once inside the manifest.
    #[error("duplicate sid {sid} on line {line}")]
    DuplicateSid {
        /// 1-indexed manifest line of the second occurrence.
        line: u64,
        /// Duplicated sid.
        sid: Sid,
    },
    /// The manifest file does not exist.
    #[error("randomization list file not found: {0}")]
    ManifestNotFound(PathBuf),
    /// The manifest failed to parse.
    #[error(transparent)]
    Manifest(ManifestError),
    /// The store rejected the write.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ManifestError> for ImportError {
    fn from(error: ManifestError) -> Self {
        match error {
            ManifestError::NotFound(path) => Self::ManifestNotFound(path),
            other => Self::Manifest(other),
        }
    }
}

// ============================================================================
// SECTION: Report
// ============================================================================

/// Outcome of an import attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    /// Number of slots created.
    pub imported: u64,
    /// True when an existing import was tolerated as a no-op.
    pub skipped: bool,
}

// ============================================================================
// SECTION: Importer
// ============================================================================

/// One-time manifest importer for a scheme's slot table.
#[derive(Debug, Clone)]
pub struct ListImporter<'a> {
    /// Validated assignment map for the scheme.
    assignment_map: &'a AssignmentMap,
    /// Extra manifest columns declared by the scheme.
    extra_csv_columns: &'a [String],
}

impl<'a> ListImporter<'a> {
    /// Creates an importer bound to a scheme's assignment configuration.
    #[must_use]
    pub const fn new(assignment_map: &'a AssignmentMap, extra_csv_columns: &'a [String]) -> Self {
        Self {
            assignment_map,
            extra_csv_columns,
        }
    }

    /// Imports the manifest into the slot table.
    ///
    /// With `overwrite` the slot table is cleared first; that is only safe
    /// while no allocations exist, and the caller carries that precondition.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError`] on a prior import without overwrite, a missing
    /// or malformed manifest, an unknown assignment code, a duplicate sid, or
    /// a store failure. No writes remain on error.
    pub fn import(
        &self,
        manifest_path: &Path,
        store: &dyn SlotStore,
        overwrite: bool,
    ) -> Result<ImportReport, ImportError> {
        if store.count()? > 0 && !overwrite {
            return Err(ImportError::AlreadyImported);
        }

        let rows = read_manifest(manifest_path, self.extra_csv_columns)?;

        let mut seen: BTreeSet<Sid> = BTreeSet::new();
        for row in &rows {
            if !self.assignment_map.contains(&row.assignment) {
                return Err(ImportError::InvalidAssignment {
                    line: row.line,
                    code: row.assignment.to_string(),
                });
            }
            if !seen.insert(row.sid) {
                return Err(ImportError::DuplicateSid {
                    line: row.line,
                    sid: row.sid,
                });
            }
        }

        let digest = manifest_digest(manifest_path)?;
        let imported = store.insert_manifest(&rows, &digest, overwrite)?;
        tracing::info!(imported, overwrite, "randomization list imported");
        Ok(ImportReport {
            imported,
            skipped: false,
        })
    }

    /// Imports the manifest, tolerating a prior import as a no-op.
    ///
    /// Used at scheme activation, where "already imported" is the normal
    /// steady state rather than an operator error.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError`] for every failure except `AlreadyImported`.
    pub fn import_tolerant(
        &self,
        manifest_path: &Path,
        store: &dyn SlotStore,
    ) -> Result<ImportReport, ImportError> {
        match self.import(manifest_path, store, false) {
            Ok(report) => Ok(report),
            Err(ImportError::AlreadyImported) => Ok(ImportReport {
                imported: 0,
                skipped: true,
            }),
            Err(error) => Err(error),
        }
    }
}
