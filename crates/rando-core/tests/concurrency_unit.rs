// crates/rando-core/tests/concurrency_unit.rs
// ============================================================================
// Module: Allocation Concurrency Tests
// Description: Races between concurrent randomize calls.
// Purpose: Prove at-most-once allocation under contention.
// ============================================================================

//! ## Overview
//! Thread-level race tests for the allocation engine:
//! - Two callers racing for the same subject produce exactly one claim.
//! - Two callers racing for the last free slot produce exactly one claim
//!   and never double-assign the slot.

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
use std::sync::Barrier;
use std::thread;

use rando_core::AllocationGate;
use rando_core::AssignmentCode;
use rando_core::AssignmentMap;
use rando_core::MemoryStore;
use rando_core::RandomizeError;
use rando_core::RandomizeRequest;
use rando_core::Randomizer;
use rando_core::Registration;
use rando_core::RegistrationStore;
use rando_core::Scheme;
use rando_core::SchemeName;
use rando_core::SiteName;
use rando_core::SlotStore;
use rando_core::SubjectIdentifier;
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

fn activated(contents: &str) -> (Arc<Randomizer>, MemoryStore, NamedTempFile) {
    let mut manifest = NamedTempFile::new().expect("temp manifest");
    manifest.write_all(contents.as_bytes()).expect("write manifest");

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
    (Arc::new(randomizer), store, manifest)
}

fn request_for(subject: &str) -> RandomizeRequest {
    RandomizeRequest {
        subject_identifier: SubjectIdentifier::new(subject),
        report_datetime: Some(datetime!(2024-03-01 10:30 UTC)),
        site: Some(SiteName::new("north")),
        user: Some("erikvw".to_string()),
        extra: BTreeMap::new(),
    }
}

fn race(
    randomizer: &Arc<Randomizer>,
    subjects: [&str; 2],
) -> Vec<Result<(), RandomizeError>> {
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = subjects
        .into_iter()
        .map(|subject| {
            let randomizer = Arc::clone(randomizer);
            let barrier = Arc::clone(&barrier);
            let request = request_for(subject);
            thread::spawn(move || {
                barrier.wait();
                randomizer.randomize(&request)
            })
        })
        .collect();
    handles.into_iter().map(|handle| handle.join().expect("thread join")).collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn same_subject_race_yields_exactly_one_claim() {
    let (randomizer, store, _manifest) = activated(
        "sid,assignment,site_name\n\
         1,active,north\n\
         2,placebo,north\n\
         3,active,north\n",
    );
    store.save(&Registration::new(SubjectIdentifier::new("S1"))).expect("save");

    let outcomes = race(&randomizer, ["S1", "S1"]);
    let successes = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(successes, 1);
    for outcome in &outcomes {
        if let Err(error) = outcome {
            assert!(matches!(error, RandomizeError::AlreadyRandomized { .. }));
        }
    }

    // Exactly one slot is bound to the subject.
    let slot = store
        .find_by_subject(&SubjectIdentifier::new("S1"))
        .expect("lookup")
        .expect("slot bound");
    assert_eq!(slot.sid.get(), 1);
    let bound: Vec<_> = store
        .slots_ordered()
        .expect("slots")
        .into_iter()
        .filter(|slot| slot.allocated)
        .collect();
    assert_eq!(bound.len(), 1);
}

#[test]
fn last_slot_race_never_double_assigns() {
    let (randomizer, store, _manifest) =
        activated("sid,assignment,site_name\n1,active,north\n");
    store.save(&Registration::new(SubjectIdentifier::new("S1"))).expect("save");
    store.save(&Registration::new(SubjectIdentifier::new("S2"))).expect("save");

    let outcomes = race(&randomizer, ["S1", "S2"]);
    let successes = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(successes, 1);
    for outcome in &outcomes {
        if let Err(error) = outcome {
            assert!(matches!(error, RandomizeError::Allocation(_)));
        }
    }

    // The single slot is bound to exactly one of the two subjects.
    let slots = store.slots_ordered().expect("slots");
    assert_eq!(slots.len(), 1);
    let winner = slots[0].subject_identifier.clone().expect("slot bound");
    assert!(winner.as_str() == "S1" || winner.as_str() == "S2");
}

#[test]
fn many_subjects_draining_a_pool_keep_sids_unique() {
    let manifest_body: String = std::iter::once("sid,assignment,site_name\n".to_string())
        .chain((1..=8).map(|sid| format!("{sid},active,north\n")))
        .collect();
    let (randomizer, store, _manifest) = activated(&manifest_body);
    for index in 1..=8 {
        store
            .save(&Registration::new(SubjectIdentifier::new(format!("S{index}"))))
            .expect("save");
    }

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (1..=8)
        .map(|index| {
            let randomizer = Arc::clone(&randomizer);
            let barrier = Arc::clone(&barrier);
            let request = request_for(&format!("S{index}"));
            thread::spawn(move || {
                barrier.wait();
                randomizer.randomize(&request)
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread join").expect("randomize");
    }

    // Every slot is bound once, to a distinct subject.
    let slots = store.slots_ordered().expect("slots");
    assert_eq!(slots.len(), 8);
    let mut subjects: Vec<_> = slots
        .iter()
        .map(|slot| slot.subject_identifier.clone().expect("slot bound").as_str().to_string())
        .collect();
    subjects.sort_unstable();
    subjects.dedup();
    assert_eq!(subjects.len(), 8);
}
