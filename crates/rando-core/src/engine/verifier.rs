// crates/rando-core/src/engine/verifier.rs
// ============================================================================
// Module: Rando List Verifier
// Description: Streams manifest rows against persisted slots to detect drift.
// Purpose: Report any divergence between the audited list and the slot table.
// Dependencies: tracing, crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! The verifier compares the manifest positionally against persisted slots
//! ordered by ascending sid: row *i* must carry the *i*-th smallest persisted
//! sid, with matching assignment and site. Verification is fail-fast, a
//! deliberate trade of completeness for speed: it stops at the first
//! discrepancy rather than aggregating all of them. An empty result is the
//! precondition for opening the allocation gate.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::AssignmentCode;
use crate::core::Sid;
use crate::core::SiteName;
use crate::core::manifest::ManifestError;
use crate::core::manifest::manifest_digest;
use crate::core::manifest::read_manifest;
use crate::interfaces::SlotStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Infrastructure failures during verification.
///
/// Discrepancies between manifest and slots are values, not errors; this
/// type covers the cases where verification itself could not run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// The store could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The manifest could not be read or parsed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

// ============================================================================
// SECTION: Discrepancies
// ============================================================================

/// One detected divergence between manifest and persisted slots.
///
/// # Invariants
/// - Renders as an operator-facing message with line or sid detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discrepancy {
    /// The slot table is empty; the list was never imported.
    NotLoaded,
    /// Slots are persisted but the manifest file is gone.
    FileMissing {
        /// Expected manifest path.
        path: PathBuf,
    },
    /// Row *i*'s sid does not equal the *i*-th smallest persisted sid.
    InvalidSid {
        /// 1-indexed manifest line where the divergence starts.
        line: u64,
        /// Sid read from the manifest row.
        manifest_sid: Sid,
        /// Sid found at the same position in the slot table.
        persisted_sid: Sid,
    },
    /// Assignment differs for a matching sid.
    AssignmentMismatch {
        /// Matching sid.
        sid: Sid,
        /// Assignment in the manifest.
        manifest_assignment: AssignmentCode,
        /// Assignment persisted on the slot.
        persisted_assignment: AssignmentCode,
    },
    /// Site differs for a matching sid.
    SiteMismatch {
        /// Matching sid.
        sid: Sid,
        /// Site in the manifest.
        manifest_site: SiteName,
        /// Site persisted on the slot.
        persisted_site: SiteName,
    },
    /// Manifest row count does not equal the persisted slot count.
    CountMismatch {
        /// Persisted slot count.
        persisted: u64,
        /// Manifest row count.
        manifest: u64,
    },
    /// Manifest bytes changed since import (recorded digest disagrees).
    DigestMismatch {
        /// Digest recorded at import.
        recorded: String,
        /// Digest of the file as it stands now.
        actual: String,
    },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotLoaded => write!(
                f,
                "randomization list has not been loaded; import the list before using the system"
            ),
            Self::FileMissing {
                path,
            } => write!(
                f,
                "randomization list file does not exist but sids have been loaded; \
                 expected file {}",
                path.display()
            ),
            Self::InvalidSid {
                line,
                manifest_sid,
                persisted_sid,
            } => write!(
                f,
                "randomization list is invalid; file data does not match model data \
                 starting on line {line}; got {manifest_sid} != {persisted_sid}"
            ),
            Self::AssignmentMismatch {
                sid,
                manifest_assignment,
                persisted_assignment,
            } => write!(
                f,
                "assignment mismatch for sid {sid}; got `{manifest_assignment}` != \
                 `{persisted_assignment}`"
            ),
            Self::SiteMismatch {
                sid,
                manifest_site,
                persisted_site,
            } => write!(
                f,
                "site mismatch for sid {sid}; got `{manifest_site}` != `{persisted_site}`"
            ),
            Self::CountMismatch {
                persisted,
                manifest,
            } => write!(
                f,
                "randomization list count is off; expected {persisted}, got {manifest}"
            ),
            Self::DigestMismatch {
                recorded,
                actual,
            } => write!(
                f,
                "randomization list file changed since import; recorded digest {recorded}, \
                 current digest {actual}"
            ),
        }
    }
}

// ============================================================================
// SECTION: Verifier
// ============================================================================

/// Fail-fast manifest-versus-store verifier for one scheme.
#[derive(Debug, Clone)]
pub struct ListVerifier<'a> {
    /// Extra manifest columns declared by the scheme.
    extra_csv_columns: &'a [String],
}

impl<'a> ListVerifier<'a> {
    /// Creates a verifier for a scheme's manifest layout.
    #[must_use]
    pub const fn new(extra_csv_columns: &'a [String]) -> Self {
        Self {
            extra_csv_columns,
        }
    }

    /// Verifies the persisted slot table against the manifest.
    ///
    /// Returns at most one discrepancy (fail-fast); an empty vector means
    /// the store exactly matches the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`VerificationError`] when the store or manifest cannot be
    /// read at all. A missing manifest with loaded sids is a discrepancy,
    /// not an error.
    pub fn verify(
        &self,
        manifest_path: &Path,
        store: &dyn SlotStore,
    ) -> Result<Vec<Discrepancy>, VerificationError> {
        let count = store.count()?;
        if count == 0 {
            return Ok(vec![Discrepancy::NotLoaded]);
        }
        if !manifest_path.exists() {
            return Ok(vec![Discrepancy::FileMissing {
                path: manifest_path.to_path_buf(),
            }]);
        }

        let rows = read_manifest(manifest_path, self.extra_csv_columns)?;
        let slots = store.slots_ordered()?;

        for (row, slot) in rows.iter().zip(slots.iter()) {
            if row.sid != slot.sid {
                return Ok(vec![Discrepancy::InvalidSid {
                    line: row.line,
                    manifest_sid: row.sid,
                    persisted_sid: slot.sid,
                }]);
            }
            if row.assignment != slot.assignment {
                return Ok(vec![Discrepancy::AssignmentMismatch {
                    sid: row.sid,
                    manifest_assignment: row.assignment.clone(),
                    persisted_assignment: slot.assignment.clone(),
                }]);
            }
            if row.site_name != slot.site_name {
                return Ok(vec![Discrepancy::SiteMismatch {
                    sid: row.sid,
                    manifest_site: row.site_name.clone(),
                    persisted_site: slot.site_name.clone(),
                }]);
            }
        }

        let manifest_count = u64::try_from(rows.len()).unwrap_or(u64::MAX);
        if manifest_count != count {
            return Ok(vec![Discrepancy::CountMismatch {
                persisted: count,
                manifest: manifest_count,
            }]);
        }

        if let Some(recorded) = store.manifest_digest()? {
            let actual = manifest_digest(manifest_path)?;
            if recorded != actual {
                return Ok(vec![Discrepancy::DigestMismatch {
                    recorded,
                    actual,
                }]);
            }
        }

        tracing::debug!(count, "randomization list verified");
        Ok(Vec::new())
    }
}
