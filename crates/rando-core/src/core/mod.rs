// crates/rando-core/src/core/mod.rs
// ============================================================================
// Module: Rando Core Data Model
// Description: Data model shared across the allocation engine and stores.
// Purpose: Group identifier, record, manifest, and scheme definitions.
// Dependencies: crate::core submodules
// ============================================================================

//! ## Overview
//! The data model mirrors the audited randomization list: a `Slot` per
//! manifest row, a `Registration` per enrolling subject, an `AssignmentMap`
//! binding treatment codes to allocation values, and a `Scheme` tying one
//! randomization list configuration together.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod assignment;
pub mod identifiers;
pub mod manifest;
pub mod records;
pub mod scheme;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use assignment::AssignmentMap;
pub use identifiers::AssignmentCode;
pub use identifiers::SchemeName;
pub use identifiers::Sid;
pub use identifiers::SiteName;
pub use identifiers::SubjectIdentifier;
pub use manifest::ManifestError;
pub use manifest::ManifestRow;
pub use manifest::manifest_digest;
pub use manifest::read_manifest;
pub use records::Registration;
pub use records::RegistrationStatus;
pub use records::Slot;
pub use scheme::ConfigurationError;
pub use scheme::Scheme;
pub use scheme::SchemeRegistry;
