// crates/rando-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Allocation Store
// Description: Durable slot and registration store backed by SQLite WAL.
// Purpose: Provide production-grade persistence for randomization lists.
// Dependencies: rando-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a `SQLite`-backed implementation of the core store
//! interfaces. One database holds the slot table, the registration table,
//! and the recorded manifest digest for a single scheme, so a slot claim
//! and its registration update commit as one immediate transaction. WAL
//! journaling and a busy timeout make the claim path safe for concurrent
//! processes sharing the database file.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteAllocationStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
