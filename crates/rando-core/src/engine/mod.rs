// crates/rando-core/src/engine/mod.rs
// ============================================================================
// Module: Rando Allocation Engine
// Description: Importer, verifier, allocation gate, randomizer, and export.
// Purpose: Group the operations that consume the audited randomization list.
// Dependencies: crate::engine submodules
// ============================================================================

//! ## Overview
//! The engine is the behavioral core: the importer loads the manifest into
//! the slot table exactly once, the verifier detects drift between manifest
//! and persisted slots, the allocation gate blocks the randomizer until a
//! clean verification, and the randomizer claims slots for subjects. The
//! export writes the read-only allocated snapshot for downstream reporting.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod export;
pub mod gate;
pub mod importer;
pub mod randomizer;
pub mod verifier;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use export::ExportError;
pub use export::export_allocated;
pub use gate::AllocationGate;
pub use gate::GateClosed;
pub use gate::MaintenanceOp;
pub use importer::ImportError;
pub use importer::ImportReport;
pub use importer::ListImporter;
pub use randomizer::ActivationError;
pub use randomizer::RandomizeError;
pub use randomizer::RandomizeRequest;
pub use randomizer::Randomizer;
pub use verifier::Discrepancy;
pub use verifier::ListVerifier;
pub use verifier::VerificationError;
