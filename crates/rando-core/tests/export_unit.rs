// crates/rando-core/tests/export_unit.rs
// ============================================================================
// Module: Export Unit Tests
// Description: Pipe-delimited export of allocated slots.
// Purpose: Ensure export order, field layout, and unblinded descriptions.
// ============================================================================

//! ## Overview
//! Pipe-delimited export tests covering ordering, field layout, and
//! unblinded descriptions.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use rando_core::AllocationGate;
use rando_core::AssignmentCode;
use rando_core::AssignmentMap;
use rando_core::MemoryStore;
use rando_core::RandomizeRequest;
use rando_core::Randomizer;
use rando_core::Registration;
use rando_core::RegistrationStore;
use rando_core::Scheme;
use rando_core::SchemeName;
use rando_core::SiteName;
use rando_core::SubjectIdentifier;
use rando_core::export_allocated;
use tempfile::NamedTempFile;
use time::macros::datetime;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn assignment_map() -> AssignmentMap {
    let allocations: BTreeMap<AssignmentCode, i64> =
        [(AssignmentCode::new("active"), 1), (AssignmentCode::new("placebo"), 2)]
            .into_iter()
            .collect();
    let descriptions: BTreeMap<AssignmentCode, String> = [
        (AssignmentCode::new("active"), "Active: study drug".to_string()),
        (AssignmentCode::new("placebo"), "Placebo: control".to_string()),
    ]
    .into_iter()
    .collect();
    AssignmentMap::new(allocations, descriptions).expect("valid assignment map")
}

fn populated_store() -> (MemoryStore, AssignmentMap, NamedTempFile) {
    let mut manifest = NamedTempFile::new().expect("temp manifest");
    manifest
        .write_all(
            b"sid,assignment,site_name\n\
              1,active,north\n\
              2,placebo,north\n\
              3,active,north\n",
        )
        .expect("write manifest");

    let store = MemoryStore::new();
    let scheme = Scheme::new(
        SchemeName::new("default"),
        assignment_map(),
        manifest.path().to_path_buf(),
        Vec::new(),
        Vec::new(),
        true,
    );
    let gate = Arc::new(AllocationGate::new([]));
    let randomizer =
        Randomizer::activate(scheme, Arc::new(store.clone()), gate).expect("activate");

    for subject in ["S2", "S1"] {
        store.save(&Registration::new(SubjectIdentifier::new(subject))).expect("save");
        randomizer
            .randomize(&RandomizeRequest {
                subject_identifier: SubjectIdentifier::new(subject),
                report_datetime: Some(datetime!(2024-03-01 10:30 UTC)),
                site: Some(SiteName::new("north")),
                user: Some("erikvw".to_string()),
                extra: BTreeMap::new(),
            })
            .expect("randomize");
    }
    (store, assignment_map(), manifest)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn export_emits_allocated_rows_in_sid_order() {
    let (store, map, _manifest) = populated_store();

    let mut out: Vec<u8> = Vec::new();
    let rows = export_allocated(&store, &map, &mut out).expect("export");
    assert_eq!(rows, 2);

    let text = String::from_utf8(out).expect("utf8 export");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[0],
        "subject_identifier|sid|assignment|allocated_datetime|site_name|allocation"
    );

    // Sid 1 went to S2 (enrolled first), sid 2 to S1.
    let first: Vec<&str> = lines[1].split('|').collect();
    assert_eq!(first[0], "S2");
    assert_eq!(first[1], "1");
    assert_eq!(first[2], "active");
    assert!(first[3].starts_with("2024-03-01T10:30:00"));
    assert_eq!(first[4], "north");
    assert_eq!(first[5], "1");

    let second: Vec<&str> = lines[2].split('|').collect();
    assert_eq!(second[0], "S1");
    assert_eq!(second[1], "2");
    assert_eq!(second[2], "placebo");
    assert_eq!(second[5], "2");
}

#[test]
fn export_of_untouched_store_is_header_only() {
    let store = MemoryStore::new();
    let mut out: Vec<u8> = Vec::new();
    let rows = export_allocated(&store, &assignment_map(), &mut out).expect("export");
    assert_eq!(rows, 0);
    let text = String::from_utf8(out).expect("utf8 export");
    assert_eq!(text.lines().count(), 1);
}
