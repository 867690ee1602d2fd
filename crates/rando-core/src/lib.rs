// crates/rando-core/src/lib.rs
// ============================================================================
// Module: Rando Core Library
// Description: Public API surface for the Rando allocation core.
// Purpose: Expose the data model, store interfaces, and allocation engine.
// Dependencies: crate::{core, interfaces, engine, stores}
// ============================================================================

//! ## Overview
//! Rando core assigns exactly one pre-generated treatment slot from a fixed,
//! externally audited randomization list to each enrolling subject, and
//! guarantees the persisted slot table never diverges from the audited
//! manifest. The core is backend-agnostic and integrates through explicit
//! store interfaces rather than embedding into a host framework.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod engine;
pub mod interfaces;
pub mod stores;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use self::core::*;

pub use engine::ActivationError;
pub use engine::AllocationGate;
pub use engine::Discrepancy;
pub use engine::ExportError;
pub use engine::GateClosed;
pub use engine::ImportError;
pub use engine::ImportReport;
pub use engine::ListImporter;
pub use engine::ListVerifier;
pub use engine::MaintenanceOp;
pub use engine::RandomizeError;
pub use engine::RandomizeRequest;
pub use engine::Randomizer;
pub use engine::VerificationError;
pub use engine::export_allocated;
pub use interfaces::AllocateError;
pub use interfaces::AllocationStore;
pub use interfaces::RegistrationLookup;
pub use interfaces::RegistrationStore;
pub use interfaces::SlotClaim;
pub use interfaces::SlotFilter;
pub use interfaces::SlotStore;
pub use interfaces::StoreError;
pub use interfaces::SyncSource;
pub use stores::MemoryStore;
