// crates/rando-core/tests/randomizer_unit.rs
// ============================================================================
// Module: Randomizer Unit Tests
// Description: Allocation ordering, state machine, and validation tests.
// Purpose: Ensure slots are consumed in ascending sid order, at most once.
// ============================================================================

//! ## Overview
//! Unit-level tests for allocation engine invariants:
//! - Ascending sid consumption per site partition
//! - Pool exhaustion after K claims for K free slots
//! - At-most-once allocation per subject with store-identifying codes
//! - Required attribute validation
//! - Assignment retrieval only after allocation
//! - Gate blocking before a clean verification

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use rando_core::AllocationGate;
use rando_core::AssignmentCode;
use rando_core::AssignmentMap;
use rando_core::MemoryStore;
use rando_core::RandomizeError;
use rando_core::RandomizeRequest;
use rando_core::Randomizer;
use rando_core::Registration;
use rando_core::RegistrationStatus;
use rando_core::RegistrationStore;
use rando_core::Scheme;
use rando_core::SchemeName;
use rando_core::SiteName;
use rando_core::SlotStore;
use rando_core::SubjectIdentifier;
use rando_core::SyncSource;
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use time::macros::datetime;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const FIVE_ROWS: &str = "sid,assignment,site_name\n\
                         1,active,north\n\
                         2,placebo,north\n\
                         3,active,north\n\
                         4,placebo,north\n\
                         5,active,north\n";

const REPORT_DATETIME: OffsetDateTime = datetime!(2024-03-01 10:30 UTC);

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

fn write_manifest(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp manifest");
    file.write_all(contents.as_bytes()).expect("write manifest");
    file
}

fn scheme_for(path: PathBuf) -> Scheme {
    Scheme::new(SchemeName::new("default"), assignment_map(), path, Vec::new(), Vec::new(), true)
}

fn register(store: &MemoryStore, subject: &str) {
    store
        .save(&Registration::new(SubjectIdentifier::new(subject)))
        .expect("save registration");
}

fn request_for(subject: &str, site: &str) -> RandomizeRequest {
    RandomizeRequest {
        subject_identifier: SubjectIdentifier::new(subject),
        report_datetime: Some(REPORT_DATETIME),
        site: Some(SiteName::new(site)),
        user: Some("erikvw".to_string()),
        extra: BTreeMap::new(),
    }
}

fn activated(manifest: &NamedTempFile) -> (Randomizer, MemoryStore) {
    let store = MemoryStore::new();
    let gate = Arc::new(AllocationGate::new([]));
    let randomizer = Randomizer::activate(
        scheme_for(manifest.path().to_path_buf()),
        Arc::new(store.clone()),
        gate,
    )
    .expect("activate");
    (randomizer, store)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn concrete_scenario_consumes_sids_in_order() {
    let manifest = write_manifest(FIVE_ROWS);
    let (randomizer, store) = activated(&manifest);
    assert_eq!(store.count().expect("count"), 5);

    register(&store, "S1");
    register(&store, "S2");

    randomizer.randomize(&request_for("S1", "north")).expect("randomize S1");
    let s1_slot = store
        .find_by_subject(&SubjectIdentifier::new("S1"))
        .expect("lookup")
        .expect("slot bound to S1");
    assert_eq!(s1_slot.sid.get(), 1);

    randomizer.randomize(&request_for("S2", "north")).expect("randomize S2");
    let s2_slot = store
        .find_by_subject(&SubjectIdentifier::new("S2"))
        .expect("lookup")
        .expect("slot bound to S2");
    assert_eq!(s2_slot.sid.get(), 2);

    let repeat = randomizer.randomize(&request_for("S1", "north"));
    assert!(matches!(repeat, Err(RandomizeError::AlreadyRandomized { .. })));
}

#[test]
fn k_free_slots_yield_k_ascending_claims_then_exhaustion() {
    let manifest = write_manifest(FIVE_ROWS);
    let (randomizer, store) = activated(&manifest);

    let mut claimed = Vec::new();
    for index in 1..=5 {
        let subject = format!("S{index}");
        register(&store, &subject);
        randomizer.randomize(&request_for(&subject, "north")).expect("randomize");
        let slot = store
            .find_by_subject(&SubjectIdentifier::new(subject.as_str()))
            .expect("lookup")
            .expect("slot bound");
        claimed.push(slot.sid.get());
    }
    assert_eq!(claimed, vec![1, 2, 3, 4, 5]);

    register(&store, "S6");
    match randomizer.randomize(&request_for("S6", "north")) {
        Err(RandomizeError::Allocation(message)) => {
            assert!(message.contains("no additional sids"));
            assert!(message.contains("north"));
        }
        other => panic!("expected allocation error, got {other:?}"),
    }
}

#[test]
fn unknown_subject_fails_registration_not_found() {
    let manifest = write_manifest(FIVE_ROWS);
    let (randomizer, _store) = activated(&manifest);
    let result = randomizer.randomize(&request_for("ghost", "north"));
    assert!(matches!(result, Err(RandomizeError::RegistrationNotFound(_))));
}

#[test]
fn allocated_registration_fails_with_registration_model_code() {
    let manifest = write_manifest(FIVE_ROWS);
    let (randomizer, store) = activated(&manifest);

    register(&store, "S1");
    randomizer.randomize(&request_for("S1", "north")).expect("randomize");

    match randomizer.randomize(&request_for("S1", "north")) {
        Err(RandomizeError::AlreadyRandomized {
            code,
            ..
        }) => assert_eq!(code, SyncSource::RegistrationModel),
        other => panic!("expected already randomized, got {other:?}"),
    }
}

#[test]
fn desynchronized_slot_store_fails_with_slot_model_code() {
    let manifest = write_manifest(FIVE_ROWS);
    let (randomizer, store) = activated(&manifest);

    // Randomize, then reset the registration sid as a desynchronized
    // registration store would present it.
    register(&store, "S1");
    randomizer.randomize(&request_for("S1", "north")).expect("randomize");
    let mut registration = Registration::new(SubjectIdentifier::new("S1"));
    registration.registration_status = RegistrationStatus::Registered;
    store.save(&registration).expect("reset registration");

    match randomizer.randomize(&request_for("S1", "north")) {
        Err(RandomizeError::AlreadyRandomized {
            code,
            ..
        }) => assert_eq!(code, SyncSource::SlotModel),
        other => panic!("expected already randomized, got {other:?}"),
    }
}

#[test]
fn missing_attributes_are_named() {
    let manifest = write_manifest(FIVE_ROWS);
    let (randomizer, store) = activated(&manifest);
    register(&store, "S1");

    let request = RandomizeRequest {
        subject_identifier: SubjectIdentifier::new("S1"),
        report_datetime: Some(REPORT_DATETIME),
        site: Some(SiteName::new("north")),
        user: None,
        extra: BTreeMap::new(),
    };
    match randomizer.randomize(&request) {
        Err(RandomizeError::InsufficientData {
            missing,
        }) => assert_eq!(missing, vec!["user".to_string()]),
        other => panic!("expected insufficient data, got {other:?}"),
    }
}

#[test]
fn required_extra_attrs_are_validated() {
    let manifest = write_manifest(
        "sid,assignment,site_name,gender\n1,active,north,F\n2,placebo,north,M\n",
    );
    let store = MemoryStore::new();
    let gate = Arc::new(AllocationGate::new([]));
    let scheme = Scheme::new(
        SchemeName::new("stratified"),
        assignment_map(),
        manifest.path().to_path_buf(),
        vec!["gender".to_string()],
        vec!["gender".to_string()],
        true,
    );
    let randomizer =
        Randomizer::activate(scheme, Arc::new(store.clone()), gate).expect("activate");
    register(&store, "S1");

    // Missing stratification attribute.
    match randomizer.randomize(&request_for("S1", "north")) {
        Err(RandomizeError::InsufficientData {
            missing,
        }) => assert_eq!(missing, vec!["gender".to_string()]),
        other => panic!("expected insufficient data, got {other:?}"),
    }

    // Stratified claim selects the smallest sid inside the stratum.
    let mut request = request_for("S1", "north");
    request.extra.insert("gender".to_string(), "M".to_string());
    randomizer.randomize(&request).expect("randomize");
    let slot = store
        .find_by_subject(&SubjectIdentifier::new("S1"))
        .expect("lookup")
        .expect("slot bound");
    assert_eq!(slot.sid.get(), 2);
}

#[test]
fn site_partitions_are_independent() {
    let manifest = write_manifest(
        "sid,assignment,site_name\n\
         1,active,north\n\
         2,placebo,south\n\
         3,active,north\n\
         4,placebo,south\n",
    );
    let (randomizer, store) = activated(&manifest);

    register(&store, "S1");
    register(&store, "S2");
    randomizer.randomize(&request_for("S1", "south")).expect("randomize south");
    randomizer.randomize(&request_for("S2", "north")).expect("randomize north");

    let south = store
        .find_by_subject(&SubjectIdentifier::new("S1"))
        .expect("lookup")
        .expect("slot bound");
    let north = store
        .find_by_subject(&SubjectIdentifier::new("S2"))
        .expect("lookup")
        .expect("slot bound");
    assert_eq!(south.sid.get(), 2);
    assert_eq!(north.sid.get(), 1);
}

#[test]
fn assignment_is_exposed_only_after_allocation() {
    let manifest = write_manifest(FIVE_ROWS);
    let (randomizer, store) = activated(&manifest);
    register(&store, "S1");

    assert_eq!(
        randomizer.get_assignment(&SubjectIdentifier::new("S1")).expect("get assignment"),
        None
    );
    randomizer.randomize(&request_for("S1", "north")).expect("randomize");
    assert_eq!(
        randomizer.get_assignment(&SubjectIdentifier::new("S1")).expect("get assignment"),
        Some(AssignmentCode::new("active"))
    );
}

#[test]
fn closed_gate_blocks_allocation() {
    let manifest = write_manifest(FIVE_ROWS);
    let store = MemoryStore::new();
    let gate = Arc::new(AllocationGate::new([]));
    let randomizer = Randomizer::activate(
        scheme_for(manifest.path().to_path_buf()),
        Arc::new(store.clone()),
        Arc::clone(&gate),
    )
    .expect("activate");
    register(&store, "S1");

    // Force the gate closed as a failed re-verification would.
    gate.record(&[rando_core::Discrepancy::NotLoaded]);
    let result = randomizer.randomize(&request_for("S1", "north"));
    assert!(matches!(result, Err(RandomizeError::GateClosed(_))));

    // A clean pass reopens it.
    gate.record(&[]);
    randomizer.randomize(&request_for("S1", "north")).expect("randomize");
}

#[test]
fn registration_reflects_the_claim() {
    let manifest = write_manifest(FIVE_ROWS);
    let (randomizer, store) = activated(&manifest);
    register(&store, "S1");
    randomizer.randomize(&request_for("S1", "north")).expect("randomize");

    match store.lookup(&SubjectIdentifier::new("S1")).expect("lookup") {
        rando_core::RegistrationLookup::Allocated(registration) => {
            assert_eq!(registration.sid.map(rando_core::Sid::get), Some(1));
            assert_eq!(registration.registration_status, RegistrationStatus::Randomized);
            assert_eq!(registration.randomization_datetime, Some(REPORT_DATETIME));
            assert_eq!(
                registration.randomization_list_model,
                Some(SchemeName::new("default"))
            );
        }
        other => panic!("expected allocated registration, got {other:?}"),
    }
}
