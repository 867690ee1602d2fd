// crates/rando-core/src/stores/mod.rs
// ============================================================================
// Module: Rando Bundled Stores
// Description: Store implementations shipped with the core crate.
// Purpose: Provide a deterministic in-process store for tests and hosts.
// Dependencies: crate::stores::memory
// ============================================================================

//! ## Overview
//! Durable stores live in their own crates; the core ships only an in-memory
//! implementation usable for tests, demos, and single-process hosts.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod memory;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use memory::MemoryStore;
