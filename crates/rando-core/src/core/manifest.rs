// crates/rando-core/src/core/manifest.rs
// ============================================================================
// Module: Rando Manifest Reader
// Description: Strict reader for the audited randomization list CSV.
// Purpose: Parse manifest rows in file order with line-numbered failures.
// Dependencies: sha2, crate::core::identifiers
// ============================================================================

//! ## Overview
//! The manifest is the externally generated, audited, read-only source of
//! truth for the randomization sequence. Columns are exactly
//! `sid, assignment, site_name` plus any scheme-declared extra columns. The
//! reader is strict and fail-closed: a malformed header, a non-positive sid,
//! or a short row aborts the read with the offending line number. The file is
//! never rewritten by this system.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use crate::core::identifiers::AssignmentCode;
use crate::core::identifiers::Sid;
use crate::core::identifiers::SiteName;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Fixed leading manifest columns, in order.
pub const MANIFEST_FIELDNAMES: [&str; 3] = ["sid", "assignment", "site_name"];

/// Maximum manifest file size accepted by the reader (bytes).
pub const MAX_MANIFEST_BYTES: u64 = 64 * 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Manifest read and parse errors.
///
/// # Invariants
/// - Row errors carry the 1-indexed file line for operator diagnosis.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// Manifest file does not exist.
    #[error("randomization list file not found: {0}")]
    NotFound(PathBuf),
    /// Manifest file could not be read.
    #[error("randomization list io error: {0}")]
    Io(String),
    /// Manifest file exceeds the accepted size limit.
    #[error("randomization list file exceeds size limit: {actual} bytes (max {max})")]
    TooLarge {
        /// Maximum accepted bytes.
        max: u64,
        /// Actual file size in bytes.
        actual: u64,
    },
    /// Header row does not name the expected columns.
    #[error("randomization list header mismatch: expected `{expected}`, got `{actual}`")]
    Header {
        /// Expected header line.
        expected: String,
        /// Header line found in the file.
        actual: String,
    },
    /// A data row failed to parse.
    #[error("randomization list line {line}: {message}")]
    Row {
        /// 1-indexed file line (header is line 1).
        line: u64,
        /// Parse failure detail.
        message: String,
    },
}

// ============================================================================
// SECTION: Manifest Row
// ============================================================================

/// One parsed manifest row; read-only ground truth for one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRow {
    /// 1-indexed file line the row was read from (header is line 1).
    pub line: u64,
    /// Sequential slot identifier.
    pub sid: Sid,
    /// Treatment assignment code.
    pub assignment: AssignmentCode,
    /// Site partition key.
    pub site_name: SiteName,
    /// Scheme-declared extra column values, keyed by column name.
    pub extra: BTreeMap<String, String>,
}

// ============================================================================
// SECTION: Reader
// ============================================================================

/// Reads and validates the manifest, returning rows in file order.
///
/// `extra_columns` names scheme-declared columns that must follow the fixed
/// three in the header, in the given order.
///
/// # Errors
///
/// Returns [`ManifestError`] when the file is missing, oversized, has a
/// mismatched header, or contains a malformed row.
pub fn read_manifest(
    path: &Path,
    extra_columns: &[String],
) -> Result<Vec<ManifestRow>, ManifestError> {
    let contents = read_manifest_bytes(path)?;
    let text = String::from_utf8(contents)
        .map_err(|_| ManifestError::Io("randomization list file must be utf-8".to_string()))?;

    let mut lines = text.lines();
    let header = lines.next().unwrap_or_default().trim();
    let expected = expected_header(extra_columns);
    if normalize_header(header) != expected {
        return Err(ManifestError::Header {
            expected,
            actual: header.to_string(),
        });
    }

    let mut rows = Vec::new();
    for (offset, raw) in lines.enumerate() {
        // Header is line 1; the first data row is line 2.
        let line = u64::try_from(offset).unwrap_or(u64::MAX).saturating_add(2);
        if raw.trim().is_empty() {
            continue;
        }
        rows.push(parse_row(raw, line, extra_columns)?);
    }
    Ok(rows)
}

/// Computes the SHA-256 digest of the manifest bytes as lowercase hex.
///
/// # Errors
///
/// Returns [`ManifestError`] when the file is missing or unreadable.
pub fn manifest_digest(path: &Path) -> Result<String, ManifestError> {
    let contents = read_manifest_bytes(path)?;
    let digest = Sha256::digest(&contents);
    Ok(hex_encode(&digest))
}

/// Reads the manifest bytes with existence and size guards.
fn read_manifest_bytes(path: &Path) -> Result<Vec<u8>, ManifestError> {
    if !path.exists() {
        return Err(ManifestError::NotFound(path.to_path_buf()));
    }
    let metadata = fs::metadata(path).map_err(|err| ManifestError::Io(err.to_string()))?;
    if metadata.len() > MAX_MANIFEST_BYTES {
        return Err(ManifestError::TooLarge {
            max: MAX_MANIFEST_BYTES,
            actual: metadata.len(),
        });
    }
    fs::read(path).map_err(|err| ManifestError::Io(err.to_string()))
}

/// Returns the expected header line for the declared extra columns.
fn expected_header(extra_columns: &[String]) -> String {
    let mut fields: Vec<&str> = MANIFEST_FIELDNAMES.to_vec();
    for column in extra_columns {
        fields.push(column.as_str());
    }
    fields.join(",")
}

/// Normalizes a header line for comparison (trimmed fields, no quoting).
fn normalize_header(header: &str) -> String {
    header.split(',').map(str::trim).collect::<Vec<&str>>().join(",")
}

/// Parses one data row.
fn parse_row(
    raw: &str,
    line: u64,
    extra_columns: &[String],
) -> Result<ManifestRow, ManifestError> {
    let fields: Vec<&str> = raw.split(',').map(str::trim).collect();
    let expected_len = MANIFEST_FIELDNAMES.len() + extra_columns.len();
    if fields.len() != expected_len {
        return Err(ManifestError::Row {
            line,
            message: format!("expected {expected_len} fields, got {}", fields.len()),
        });
    }

    let sid_raw: u64 = fields[0].parse().map_err(|_| ManifestError::Row {
        line,
        message: format!("sid is not a positive integer: `{}`", fields[0]),
    })?;
    let sid = Sid::from_raw(sid_raw).ok_or_else(|| ManifestError::Row {
        line,
        message: "sid must be >= 1".to_string(),
    })?;

    if fields[1].is_empty() {
        return Err(ManifestError::Row {
            line,
            message: "assignment is empty".to_string(),
        });
    }
    if fields[2].is_empty() {
        return Err(ManifestError::Row {
            line,
            message: "site_name is empty".to_string(),
        });
    }

    let mut extra = BTreeMap::new();
    for (column, value) in extra_columns.iter().zip(fields.iter().skip(3)) {
        extra.insert(column.clone(), (*value).to_string());
    }

    Ok(ManifestRow {
        line,
        sid,
        assignment: AssignmentCode::new(fields[1]),
        site_name: SiteName::new(fields[2]),
        extra,
    })
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
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
        clippy::use_debug,
        reason = "Test-only assertions and helpers are permitted."
    )]

    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn write_manifest(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp manifest");
        file.write_all(contents.as_bytes()).expect("write manifest");
        file
    }

    #[test]
    fn reads_rows_in_file_order() {
        let file = write_manifest(
            "sid,assignment,site_name\n3,active,north\n1,placebo,north\n2,active,south\n",
        );
        let rows = read_manifest(file.path(), &[]).expect("read manifest");
        let sids: Vec<u64> = rows.iter().map(|row| row.sid.get()).collect();
        assert_eq!(sids, vec![3, 1, 2]);
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[2].line, 4);
    }

    #[test]
    fn reads_declared_extra_columns() {
        let file = write_manifest(
            "sid,assignment,site_name,gender\n1,active,north,F\n2,placebo,north,M\n",
        );
        let rows =
            read_manifest(file.path(), &["gender".to_string()]).expect("read manifest");
        assert_eq!(rows[0].extra.get("gender").map(String::as_str), Some("F"));
        assert_eq!(rows[1].extra.get("gender").map(String::as_str), Some("M"));
    }

    #[test]
    fn rejects_header_mismatch() {
        let file = write_manifest("sid,arm,site\n1,active,north\n");
        let result = read_manifest(file.path(), &[]);
        assert!(matches!(result, Err(ManifestError::Header { .. })));
    }

    #[test]
    fn rejects_zero_sid_with_line_number() {
        let file = write_manifest("sid,assignment,site_name\n1,active,north\n0,placebo,north\n");
        match read_manifest(file.path(), &[]) {
            Err(ManifestError::Row {
                line,
                ..
            }) => assert_eq!(line, 3),
            other => panic!("expected row error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_short_row() {
        let file = write_manifest("sid,assignment,site_name\n1,active\n");
        assert!(matches!(read_manifest(file.path(), &[]), Err(ManifestError::Row { .. })));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.csv");
        assert!(matches!(read_manifest(&path, &[]), Err(ManifestError::NotFound(_))));
        assert!(matches!(manifest_digest(&path), Err(ManifestError::NotFound(_))));
    }

    #[test]
    fn digest_changes_with_contents() {
        let first = write_manifest("sid,assignment,site_name\n1,active,north\n");
        let second = write_manifest("sid,assignment,site_name\n1,placebo,north\n");
        let a = manifest_digest(first.path()).expect("digest");
        let b = manifest_digest(second.path()).expect("digest");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }
}
