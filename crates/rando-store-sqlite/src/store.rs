// crates/rando-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Allocation Store
// Description: Durable AllocationStore backed by SQLite WAL.
// Purpose: Persist slots and registrations with single-transaction claims.
// Dependencies: rando-core, rusqlite, serde, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! This module implements the core store interfaces over `SQLite`. The slot
//! table carries one row per manifest row; the registration table carries
//! one row per enrolling subject; the manifest digest recorded at import
//! lives in a single-row table. `allocate` runs `BEGIN IMMEDIATE`, re-checks
//! both tables for a prior claim, selects the smallest free matching sid,
//! writes the claim and the registration update, re-reads the claimed row by
//! subject, and only then commits. Any disagreement aborts the transaction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use rando_core::AllocateError;
use rando_core::AllocationStore;
use rando_core::AssignmentCode;
use rando_core::ManifestRow;
use rando_core::Registration;
use rando_core::RegistrationLookup;
use rando_core::RegistrationStatus;
use rando_core::RegistrationStore;
use rando_core::SchemeName;
use rando_core::Sid;
use rando_core::SiteName;
use rando_core::Slot;
use rando_core::SlotClaim;
use rando_core::SlotFilter;
use rando_core::SlotStore;
use rando_core::StoreError;
use rando_core::SubjectIdentifier;
use rando_core::SyncSource;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Slot table columns, in select order.
const SLOT_COLUMNS: &str = "sid, assignment, site_name, extra_json, subject_identifier, \
                            allocated, allocated_datetime, allocated_user, allocated_site";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` allocation store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) | SqliteStoreError::VersionMismatch(message) => {
                Self::Store(message)
            }
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
        }
    }
}

/// Maps a `rusqlite` error to a store error.
fn db_err(error: &rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(error.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed allocation store with WAL support.
///
/// One store instance covers one scheme's slot table. The registration table
/// shares the database so claims span both tables in one transaction.
#[derive(Debug, Clone)]
pub struct SqliteAllocationStore {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteAllocationStore {
    /// Opens an `SQLite`-backed allocation store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: SlotStore Impl
// ============================================================================

impl SlotStore for SqliteAllocationStore {
    fn count(&self) -> Result<u64, StoreError> {
        let guard = self.lock()?;
        let count: i64 = guard
            .query_row("SELECT COUNT(*) FROM slot", params![], |row| row.get(0))
            .map_err(|err| db_err(&err))?;
        drop(guard);
        u64::try_from(count)
            .map_err(|_| StoreError::Invalid("negative slot count".to_string()))
    }

    fn slots_ordered(&self) -> Result<Vec<Slot>, StoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(&format!("SELECT {SLOT_COLUMNS} FROM slot ORDER BY sid ASC"))
            .map_err(|err| db_err(&err))?;
        let raw_rows = statement
            .query_map(params![], read_raw_slot)
            .map_err(|err| db_err(&err))?
            .collect::<Result<Vec<RawSlot>, rusqlite::Error>>()
            .map_err(|err| db_err(&err))?;
        drop(statement);
        drop(guard);
        raw_rows.into_iter().map(|raw| decode_slot(raw).map_err(StoreError::from)).collect()
    }

    fn find_by_sid(&self, sid: Sid) -> Result<Option<Slot>, StoreError> {
        let guard = self.lock()?;
        let raw = guard
            .query_row(
                &format!("SELECT {SLOT_COLUMNS} FROM slot WHERE sid = ?1"),
                params![encode_sid(sid)?],
                read_raw_slot,
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        drop(guard);
        raw.map(|value| decode_slot(value).map_err(StoreError::from)).transpose()
    }

    fn find_by_subject(
        &self,
        subject_identifier: &SubjectIdentifier,
    ) -> Result<Option<Slot>, StoreError> {
        let guard = self.lock()?;
        let raw = guard
            .query_row(
                &format!("SELECT {SLOT_COLUMNS} FROM slot WHERE subject_identifier = ?1"),
                params![subject_identifier.as_str()],
                read_raw_slot,
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        drop(guard);
        raw.map(|value| decode_slot(value).map_err(StoreError::from)).transpose()
    }

    fn insert_manifest(
        &self,
        rows: &[ManifestRow],
        digest: &str,
        overwrite: bool,
    ) -> Result<u64, StoreError> {
        let mut guard = self.lock()?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_err(&err))?;
        if overwrite {
            tx.execute("DELETE FROM slot", params![]).map_err(|err| db_err(&err))?;
            tx.execute("DELETE FROM manifest_import", params![]).map_err(|err| db_err(&err))?;
        }
        for row in rows {
            let extra_json = serde_json::to_string(&row.extra)
                .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
            tx.execute(
                "INSERT INTO slot (sid, assignment, site_name, extra_json) VALUES (?1, ?2, ?3, \
                 ?4)",
                params![
                    encode_sid(row.sid)?,
                    row.assignment.as_str(),
                    row.site_name.as_str(),
                    extra_json
                ],
            )
            .map_err(|err| db_err(&err))?;
        }
        let row_count = i64::try_from(rows.len())
            .map_err(|_| SqliteStoreError::Invalid("manifest too large".to_string()))?;
        tx.execute(
            "INSERT OR REPLACE INTO manifest_import (id, digest, imported_at, row_count) VALUES \
             (1, ?1, ?2, ?3)",
            params![digest, unix_millis(), row_count],
        )
        .map_err(|err| db_err(&err))?;
        tx.commit().map_err(|err| db_err(&err))?;
        drop(guard);
        Ok(u64::try_from(row_count).unwrap_or_default())
    }

    fn manifest_digest(&self) -> Result<Option<String>, StoreError> {
        let guard = self.lock()?;
        let digest = guard
            .query_row("SELECT digest FROM manifest_import WHERE id = 1", params![], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|err| db_err(&err))?;
        drop(guard);
        Ok(digest)
    }
}

// ============================================================================
// SECTION: RegistrationStore Impl
// ============================================================================

impl RegistrationStore for SqliteAllocationStore {
    fn lookup(
        &self,
        subject_identifier: &SubjectIdentifier,
    ) -> Result<RegistrationLookup, StoreError> {
        let guard = self.lock()?;
        let raw = guard
            .query_row(
                "SELECT subject_identifier, sid, randomization_datetime, registration_status, \
                 randomization_list_model FROM registration WHERE subject_identifier = ?1",
                params![subject_identifier.as_str()],
                read_raw_registration,
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        drop(guard);
        let Some(raw) = raw else {
            return Ok(RegistrationLookup::NotFound);
        };
        let registration = decode_registration(raw)?;
        if registration.is_allocated() {
            Ok(RegistrationLookup::Allocated(registration))
        } else {
            Ok(RegistrationLookup::Unallocated(registration))
        }
    }

    fn save(&self, registration: &Registration) -> Result<(), StoreError> {
        let datetime = registration
            .randomization_datetime
            .map(format_datetime)
            .transpose()?;
        let sid = registration.sid.map(encode_sid).transpose()?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT OR REPLACE INTO registration (subject_identifier, sid, \
                 randomization_datetime, registration_status, randomization_list_model) VALUES \
                 (?1, ?2, ?3, ?4, ?5)",
                params![
                    registration.identifier.as_str(),
                    sid,
                    datetime,
                    registration.registration_status.as_str(),
                    registration.randomization_list_model.as_ref().map(SchemeName::as_str)
                ],
            )
            .map_err(|err| db_err(&err))?;
        drop(guard);
        Ok(())
    }
}

// ============================================================================
// SECTION: AllocationStore Impl
// ============================================================================

impl AllocationStore for SqliteAllocationStore {
    fn allocate(&self, filter: &SlotFilter, claim: &SlotClaim) -> Result<Slot, AllocateError> {
        let mut guard = self.lock().map_err(StoreError::from)?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| StoreError::from(db_err(&err)))?;
        let slot = allocate_in_tx(&tx, filter, claim)?;
        tx.commit().map_err(|err| StoreError::from(db_err(&err)))?;
        drop(guard);
        Ok(slot)
    }
}

/// Runs the claim inside an already-open immediate transaction.
///
/// Returning an error drops the transaction, rolling back every write.
fn allocate_in_tx(
    tx: &Transaction<'_>,
    filter: &SlotFilter,
    claim: &SlotClaim,
) -> Result<Slot, AllocateError> {
    // A slot already bound to the subject means a prior claim committed.
    let bound: Option<i64> = tx
        .query_row(
            "SELECT sid FROM slot WHERE subject_identifier = ?1",
            params![claim.subject_identifier.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| StoreError::from(db_err(&err)))?;
    if bound.is_some() {
        return Err(AllocateError::AlreadyAllocated {
            source: SyncSource::SlotModel,
        });
    }

    // The registration must still exist and still be unallocated.
    let registration_sid: Option<Option<i64>> = tx
        .query_row(
            "SELECT sid FROM registration WHERE subject_identifier = ?1",
            params![claim.subject_identifier.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| StoreError::from(db_err(&err)))?;
    match registration_sid {
        None => {
            return Err(AllocateError::Conflict(format!(
                "registration for {} disappeared before the claim committed",
                claim.subject_identifier
            )));
        }
        Some(Some(_)) => {
            return Err(AllocateError::AlreadyAllocated {
                source: SyncSource::RegistrationModel,
            });
        }
        Some(None) => {}
    }

    // Smallest free sid in the site partition whose extras match the filter.
    let candidate = select_candidate(tx, filter)?;
    let Some(candidate) = candidate else {
        return Err(AllocateError::Exhausted {
            filter: filter.to_string(),
        });
    };

    let datetime =
        format_datetime(claim.allocated_datetime).map_err(StoreError::from)?;
    let updated = tx
        .execute(
            "UPDATE slot SET subject_identifier = ?1, allocated = 1, allocated_datetime = ?2, \
             allocated_user = ?3, allocated_site = ?4 WHERE sid = ?5 AND subject_identifier IS \
             NULL",
            params![
                claim.subject_identifier.as_str(),
                datetime,
                claim.allocated_user,
                claim.allocated_site.as_str(),
                encode_sid(candidate.sid).map_err(StoreError::from)?
            ],
        )
        .map_err(|err| StoreError::from(db_err(&err)))?;
    if updated != 1 {
        return Err(AllocateError::Conflict(format!(
            "slot {} was claimed by a concurrent writer",
            candidate.sid
        )));
    }

    let registered = tx
        .execute(
            "UPDATE registration SET sid = ?1, randomization_datetime = ?2, registration_status \
             = ?3, randomization_list_model = ?4 WHERE subject_identifier = ?5 AND sid IS NULL",
            params![
                encode_sid(candidate.sid).map_err(StoreError::from)?,
                datetime,
                RegistrationStatus::Randomized.as_str(),
                claim.scheme.as_str(),
                claim.subject_identifier.as_str()
            ],
        )
        .map_err(|err| StoreError::from(db_err(&err)))?;
    if registered != 1 {
        return Err(AllocateError::Conflict(format!(
            "registration update for {} affected {registered} rows",
            claim.subject_identifier
        )));
    }

    // Re-read by the unique allocation predicate; disagreement aborts.
    let raw = tx
        .query_row(
            &format!("SELECT {SLOT_COLUMNS} FROM slot WHERE subject_identifier = ?1"),
            params![claim.subject_identifier.as_str()],
            read_raw_slot,
        )
        .optional()
        .map_err(|err| StoreError::from(db_err(&err)))?;
    let Some(raw) = raw else {
        return Err(AllocateError::Conflict(format!(
            "claimed slot for {} not found on re-read",
            claim.subject_identifier
        )));
    };
    let slot = decode_slot(raw).map_err(StoreError::from)?;
    if slot.sid != candidate.sid {
        return Err(AllocateError::Conflict(format!(
            "re-read returned sid {} after claiming sid {}",
            slot.sid, candidate.sid
        )));
    }
    Ok(slot)
}

/// Returns the smallest free slot in the filter's site partition whose extra
/// columns match the filter, or `None` when the partition is exhausted.
fn select_candidate(
    tx: &Transaction<'_>,
    filter: &SlotFilter,
) -> Result<Option<Slot>, AllocateError> {
    let mut statement = tx
        .prepare(&format!(
            "SELECT {SLOT_COLUMNS} FROM slot WHERE subject_identifier IS NULL AND site_name = \
             ?1 ORDER BY sid ASC"
        ))
        .map_err(|err| StoreError::from(db_err(&err)))?;
    let raw_rows = statement
        .query_map(params![filter.site_name.as_str()], read_raw_slot)
        .map_err(|err| StoreError::from(db_err(&err)))?;
    for raw in raw_rows {
        let raw = raw.map_err(|err| StoreError::from(db_err(&err)))?;
        let slot = decode_slot(raw).map_err(StoreError::from)?;
        if slot.matches_extra(&filter.extra) {
            return Ok(Some(slot));
        }
    }
    Ok(None)
}

// ============================================================================
// SECTION: Row Codecs
// ============================================================================

/// Raw slot row as read from `SQLite` before domain decoding.
struct RawSlot {
    /// Raw sid column.
    sid: i64,
    /// Raw assignment column.
    assignment: String,
    /// Raw site name column.
    site_name: String,
    /// Raw extra columns as JSON text.
    extra_json: String,
    /// Raw bound subject column.
    subject_identifier: Option<String>,
    /// Raw allocated flag.
    allocated: i64,
    /// Raw allocation datetime column (RFC 3339 text).
    allocated_datetime: Option<String>,
    /// Raw allocating user column.
    allocated_user: Option<String>,
    /// Raw allocating site column.
    allocated_site: Option<String>,
}

/// Reads a raw slot row in [`SLOT_COLUMNS`] order.
fn read_raw_slot(row: &rusqlite::Row<'_>) -> Result<RawSlot, rusqlite::Error> {
    Ok(RawSlot {
        sid: row.get(0)?,
        assignment: row.get(1)?,
        site_name: row.get(2)?,
        extra_json: row.get(3)?,
        subject_identifier: row.get(4)?,
        allocated: row.get(5)?,
        allocated_datetime: row.get(6)?,
        allocated_user: row.get(7)?,
        allocated_site: row.get(8)?,
    })
}

/// Decodes a raw slot row into the domain record.
fn decode_slot(raw: RawSlot) -> Result<Slot, SqliteStoreError> {
    let sid = decode_sid(raw.sid)?;
    let extra: BTreeMap<String, String> = serde_json::from_str(&raw.extra_json)
        .map_err(|err| SqliteStoreError::Invalid(format!("slot {sid} extra columns: {err}")))?;
    let allocated_datetime = raw.allocated_datetime.as_deref().map(parse_datetime).transpose()?;
    Ok(Slot {
        sid,
        assignment: AssignmentCode::new(raw.assignment),
        site_name: SiteName::new(raw.site_name),
        extra,
        subject_identifier: raw.subject_identifier.map(SubjectIdentifier::new),
        allocated: raw.allocated != 0,
        allocated_datetime,
        allocated_user: raw.allocated_user,
        allocated_site: raw.allocated_site.map(SiteName::new),
    })
}

/// Raw registration row as read from `SQLite` before domain decoding.
struct RawRegistration {
    /// Raw subject identifier column.
    subject_identifier: String,
    /// Raw sid column.
    sid: Option<i64>,
    /// Raw randomization datetime column (RFC 3339 text).
    randomization_datetime: Option<String>,
    /// Raw registration status column.
    registration_status: String,
    /// Raw scheme name column.
    randomization_list_model: Option<String>,
}

/// Reads a raw registration row.
fn read_raw_registration(row: &rusqlite::Row<'_>) -> Result<RawRegistration, rusqlite::Error> {
    Ok(RawRegistration {
        subject_identifier: row.get(0)?,
        sid: row.get(1)?,
        randomization_datetime: row.get(2)?,
        registration_status: row.get(3)?,
        randomization_list_model: row.get(4)?,
    })
}

/// Decodes a raw registration row into the domain record.
fn decode_registration(raw: RawRegistration) -> Result<Registration, SqliteStoreError> {
    let sid = raw.sid.map(decode_sid).transpose()?;
    let randomization_datetime =
        raw.randomization_datetime.as_deref().map(parse_datetime).transpose()?;
    let registration_status = match raw.registration_status.as_str() {
        "registered" => RegistrationStatus::Registered,
        "randomized" => RegistrationStatus::Randomized,
        other => {
            return Err(SqliteStoreError::Invalid(format!(
                "unknown registration status `{other}` for {}",
                raw.subject_identifier
            )));
        }
    };
    Ok(Registration {
        identifier: SubjectIdentifier::new(raw.subject_identifier),
        sid,
        randomization_datetime,
        registration_status,
        randomization_list_model: raw.randomization_list_model.map(SchemeName::new),
    })
}

/// Encodes a sid for binding as an `SQLite` integer.
fn encode_sid(sid: Sid) -> Result<i64, SqliteStoreError> {
    i64::try_from(sid.get())
        .map_err(|_| SqliteStoreError::Invalid(format!("sid {sid} exceeds storable range")))
}

/// Decodes a persisted sid column, rejecting non-positive values.
fn decode_sid(value: i64) -> Result<Sid, SqliteStoreError> {
    u64::try_from(value)
        .ok()
        .and_then(Sid::from_raw)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("invalid persisted sid {value}")))
}

/// Formats a datetime as RFC 3339 text for storage.
fn format_datetime(value: OffsetDateTime) -> Result<String, SqliteStoreError> {
    value.format(&Rfc3339).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Parses an RFC 3339 datetime from storage.
fn parse_datetime(text: &str) -> Result<OffsetDateTime, SqliteStoreError> {
    OffsetDateTime::parse(text, &Rfc3339)
        .map_err(|err| SqliteStoreError::Invalid(format!("invalid stored datetime: {err}")))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection =
        Connection::open_with_flags(&config.path, flags).map_err(|err| db_err(&err))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| db_err(&err))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| db_err(&err))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| db_err(&err))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| db_err(&err))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| db_err(&err))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| db_err(&err))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| db_err(&err))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| db_err(&err))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS slot (
                    sid INTEGER PRIMARY KEY,
                    assignment TEXT NOT NULL,
                    site_name TEXT NOT NULL,
                    extra_json TEXT NOT NULL DEFAULT '{}',
                    subject_identifier TEXT UNIQUE,
                    allocated INTEGER NOT NULL DEFAULT 0,
                    allocated_datetime TEXT,
                    allocated_user TEXT,
                    allocated_site TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_slot_free
                    ON slot (site_name, sid) WHERE subject_identifier IS NULL;
                CREATE TABLE IF NOT EXISTS registration (
                    subject_identifier TEXT PRIMARY KEY,
                    sid INTEGER UNIQUE,
                    randomization_datetime TEXT,
                    registration_status TEXT NOT NULL,
                    randomization_list_model TEXT
                );
                CREATE TABLE IF NOT EXISTS manifest_import (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    digest TEXT NOT NULL,
                    imported_at INTEGER NOT NULL,
                    row_count INTEGER NOT NULL
                );",
            )
            .map_err(|err| db_err(&err))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| db_err(&err))?;
    Ok(())
}

/// Returns the current unix epoch in milliseconds.
fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
