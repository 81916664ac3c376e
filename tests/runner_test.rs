mod common;

use common::{
    alphabet, journaled, options, seed_person, AddFullName, Behavior, Journal, ALPHA_ID, BRAVO_ID,
    CHARLIE_ID,
};
use docshift::migration::{
    DefaultResolver, DocumentRecordStore, ErrorPolicy, LockPolicy, MigrationDirection,
    MigrationError, MigrationLock, MigrationOptions, MigrationRecordStore, MigrationRunner,
    MigrationSource, MigrationType, NameBasedCollector, RunOutcome,
};
use docshift::store::{DocumentStore, MemoryStore, StoreError};
use docshift::utils::RECORD_COLLECTION;
use docshift::version::Version;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn records(store: &Arc<MemoryStore>) -> DocumentRecordStore {
    DocumentRecordStore::new(store.clone())
}

async fn run(
    store: &Arc<MemoryStore>,
    options: MigrationOptions,
) -> Result<RunOutcome, MigrationError> {
    MigrationRunner::new(store.clone(), options).run().await
}

async fn lock_is_free(store: &Arc<MemoryStore>) -> bool {
    MigrationLock::new(store.clone())
        .holder()
        .await
        .expect("Should read lock")
        .is_none()
}

/// Alpha succeeds, Bravo fails on the way up, Charlie would succeed.
fn failing_bravo() -> Vec<MigrationType> {
    vec![
        journaled("Alpha", 1, Behavior::Succeed),
        journaled("Bravo", 2, Behavior::FailUp),
        journaled("Charlie", 3, Behavior::Succeed),
    ]
}

#[tokio::test]
async fn test_up_applies_in_ascending_version_order() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());

    let outcome = run(&store, options(&journal, alphabet()))
        .await
        .expect("Run should succeed");

    assert_eq!(journal.entries(), vec!["up:Alpha", "up:Bravo", "up:Charlie"]);
    let summary = outcome.summary().expect("Run should complete");
    assert_eq!(summary.direction, MigrationDirection::Up);
    assert_eq!(
        summary.applied,
        vec!["tests::Alpha", "tests::Bravo", "tests::Charlie"]
    );
    assert_eq!(summary.skipped, 0);
    assert!(!summary.reached_target);
    assert_eq!(store.count(RECORD_COLLECTION).await, 3);
}

#[tokio::test]
async fn test_down_reverts_in_descending_version_order() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());
    run(&store, options(&journal, alphabet())).await.unwrap();
    journal.clear();

    let down = options(&journal, alphabet()).with_direction(MigrationDirection::Down);
    let outcome = run(&store, down).await.expect("Down run should succeed");

    assert_eq!(
        journal.entries(),
        vec!["down:Charlie", "down:Bravo", "down:Alpha"]
    );
    assert_eq!(outcome.summary().unwrap().applied.len(), 3);
    assert_eq!(store.count(RECORD_COLLECTION).await, 0);
}

#[tokio::test]
async fn test_second_up_run_applies_nothing() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());
    run(&store, options(&journal, alphabet())).await.unwrap();
    journal.clear();

    let outcome = run(&store, options(&journal, alphabet())).await.unwrap();

    assert!(journal.entries().is_empty());
    let summary = outcome.summary().unwrap();
    assert!(summary.applied.is_empty());
    assert_eq!(summary.skipped, 3);
    assert_eq!(store.count(RECORD_COLLECTION).await, 3);
}

#[tokio::test]
async fn test_down_skips_migrations_that_never_ran() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());

    let down = options(&journal, alphabet()).with_direction(MigrationDirection::Down);
    let outcome = run(&store, down).await.unwrap();

    assert!(journal.entries().is_empty());
    assert_eq!(outcome.summary().unwrap().skipped, 3);
}

#[tokio::test]
async fn test_full_name_round_trip() {
    let store = Arc::new(MemoryStore::new());
    seed_person(&store, "people/1", "Sean", "Kearon").await;
    let before = store.load("people/1").await.unwrap().unwrap();

    let source = MigrationSource::new("people")
        .register(MigrationType::of::<AddFullName>("people::AddFullName").version(1));
    let up = MigrationOptions::new().with_source(source.clone());
    run(&store, up).await.expect("Up should succeed");

    let migrated = store.load("people/1").await.unwrap().unwrap();
    assert_eq!(migrated.body, json!({"Name": "Sean Kearon"}));

    let down = MigrationOptions::new()
        .with_source(source)
        .with_direction(MigrationDirection::Down);
    run(&store, down).await.expect("Down should succeed");

    let restored = store.load("people/1").await.unwrap().unwrap();
    assert_eq!(restored, before);
}

#[tokio::test]
async fn test_profile_tagged_migration_needs_its_profile() {
    let journal = Arc::new(Journal::default());
    let demo_only = || vec![journaled("Demo", 1, Behavior::Succeed).profile("demo")];
    let demo_id = "migrationrecord/demo/1";

    let plain = Arc::new(MemoryStore::new());
    run(&plain, options(&journal, demo_only())).await.unwrap();
    assert!(records(&plain).load(demo_id).await.unwrap().is_none());

    let other = Arc::new(MemoryStore::new());
    run(
        &other,
        options(&journal, demo_only()).with_profiles(["development"]),
    )
    .await
    .unwrap();
    assert!(records(&other).load(demo_id).await.unwrap().is_none());
    assert!(journal.entries().is_empty());

    let demo = Arc::new(MemoryStore::new());
    run(&demo, options(&journal, demo_only()).with_profiles(["Demo"]))
        .await
        .unwrap();
    assert!(records(&demo).load(demo_id).await.unwrap().is_some());
    assert_eq!(journal.entries(), vec!["up:Demo"]);
}

#[tokio::test]
async fn test_to_version_bounds_forward_run() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());

    let bounded = options(&journal, alphabet()).with_to_version(Version::new(0, 1, 0, 0));
    let outcome = run(&store, bounded).await.unwrap();

    assert!(outcome.summary().unwrap().reached_target);
    let records = records(&store);
    assert!(records.load(ALPHA_ID).await.unwrap().is_some());
    assert!(records.load(BRAVO_ID).await.unwrap().is_none());
    assert!(records.load(CHARLIE_ID).await.unwrap().is_none());
}

#[tokio::test]
async fn test_to_version_bounds_reverse_run() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());
    run(&store, options(&journal, alphabet())).await.unwrap();
    journal.clear();

    let down = options(&journal, alphabet())
        .with_direction(MigrationDirection::Down)
        .with_to_version(Version::new(0, 2, 0, 0));
    run(&store, down).await.unwrap();

    assert_eq!(journal.entries(), vec!["down:Charlie", "down:Bravo"]);
    let records = records(&store);
    assert!(records.load(ALPHA_ID).await.unwrap().is_some());
    assert!(records.load(BRAVO_ID).await.unwrap().is_none());
}

#[tokio::test]
async fn test_to_version_applies_to_skipped_migrations() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());
    run(&store, options(&journal, alphabet())).await.unwrap();
    journal.clear();

    let bounded = options(&journal, alphabet()).with_to_version(Version::new(0, 2, 0, 0));
    let outcome = run(&store, bounded).await.unwrap();

    let summary = outcome.summary().unwrap();
    assert!(summary.reached_target);
    assert_eq!(summary.skipped, 2);
    assert!(journal.entries().is_empty());
}

#[tokio::test]
async fn test_failure_halts_run_and_is_recorded() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());

    let err = run(&store, options(&journal, failing_bravo()))
        .await
        .unwrap_err();

    match err {
        MigrationError::Halted {
            id,
            direction,
            message,
        } => {
            assert_eq!(id, BRAVO_ID);
            assert_eq!(direction, MigrationDirection::Up);
            assert!(message.contains("Bravo refused to apply"));
        }
        other => panic!("Unexpected error: {other}"),
    }
    assert_eq!(journal.entries(), vec!["up:Alpha", "up:Bravo"]);

    let records = records(&store);
    assert!(records.load(ALPHA_ID).await.unwrap().unwrap().is_applied());
    let bravo = records.load(BRAVO_ID).await.unwrap().expect("Failure is recorded");
    assert!(bravo.has_error);
    assert!(bravo.is_unresolved_failure());
    assert!(records.load(CHARLIE_ID).await.unwrap().is_none());
    assert!(lock_is_free(&store).await);
}

#[tokio::test]
async fn test_unfixed_failure_halts_every_later_run() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());
    run(&store, options(&journal, failing_bravo())).await.unwrap_err();
    journal.clear();

    // Even with a working Bravo deployed, the recorded failure blocks the run.
    let err = run(&store, options(&journal, alphabet())).await.unwrap_err();

    assert!(matches!(err, MigrationError::Halted { ref id, .. } if id == BRAVO_ID));
    assert!(journal.entries().is_empty());
    assert!(records(&store).load(CHARLIE_ID).await.unwrap().is_none());
}

#[tokio::test]
async fn test_marking_failure_fixed_resumes_run() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());
    run(&store, options(&journal, failing_bravo())).await.unwrap_err();
    journal.clear();

    assert!(records(&store).mark_fixed(BRAVO_ID).await.unwrap());

    let outcome = run(&store, options(&journal, alphabet())).await.unwrap();

    assert_eq!(journal.entries(), vec!["up:Bravo", "up:Charlie"]);
    assert_eq!(outcome.summary().unwrap().skipped, 1);
    let bravo = records(&store).load(BRAVO_ID).await.unwrap().unwrap();
    assert!(!bravo.has_error);
    assert!(bravo.error.is_none());
}

#[tokio::test]
async fn test_reverse_run_clears_fixed_forward_failure() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());
    run(&store, options(&journal, failing_bravo())).await.unwrap_err();
    records(&store).mark_fixed(BRAVO_ID).await.unwrap();
    journal.clear();

    let down = options(&journal, alphabet()).with_direction(MigrationDirection::Down);
    run(&store, down).await.unwrap();

    // Bravo's up never completed, so only Alpha is reverted.
    assert_eq!(journal.entries(), vec!["down:Alpha"]);
    assert_eq!(store.count(RECORD_COLLECTION).await, 0);
}

#[tokio::test]
async fn test_down_failure_is_captured() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());
    run(&store, options(&journal, alphabet())).await.unwrap();
    journal.clear();

    let stubborn = vec![
        journaled("Alpha", 1, Behavior::Succeed),
        journaled("Bravo", 2, Behavior::Succeed),
        journaled("Charlie", 3, Behavior::FailDown),
    ];
    let down = options(&journal, stubborn).with_direction(MigrationDirection::Down);
    let err = run(&store, down).await.unwrap_err();

    assert!(matches!(
        err,
        MigrationError::Halted { direction: MigrationDirection::Down, ref id, .. } if id == CHARLIE_ID
    ));
    assert_eq!(journal.entries(), vec!["down:Charlie"]);

    let charlie = records(&store).load(CHARLIE_ID).await.unwrap().unwrap();
    assert_eq!(
        charlie.error.as_ref().map(|e| e.direction),
        Some(MigrationDirection::Down)
    );
    assert!(records(&store).load(BRAVO_ID).await.unwrap().is_some());

    // Once fixed, the migration still counts as applied and is reverted.
    records(&store).mark_fixed(CHARLIE_ID).await.unwrap();
    journal.clear();
    let down = options(&journal, alphabet()).with_direction(MigrationDirection::Down);
    run(&store, down).await.unwrap();
    assert_eq!(
        journal.entries(),
        vec!["down:Charlie", "down:Bravo", "down:Alpha"]
    );
    assert_eq!(store.count(RECORD_COLLECTION).await, 0);
}

#[tokio::test]
async fn test_propagate_policy_leaves_no_failure_record() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());

    let propagate = options(&journal, failing_bravo()).with_error_policy(ErrorPolicy::Propagate);
    let err = run(&store, propagate).await.unwrap_err();

    match err {
        MigrationError::Application {
            name, direction, ..
        } => {
            assert_eq!(name, "tests::Bravo");
            assert_eq!(direction, MigrationDirection::Up);
        }
        other => panic!("Unexpected error: {other}"),
    }
    let records = records(&store);
    assert!(records.load(ALPHA_ID).await.unwrap().is_some());
    assert!(records.load(BRAVO_ID).await.unwrap().is_none());
    assert!(lock_is_free(&store).await);
}

#[tokio::test]
async fn test_panicking_migration_is_captured_and_lock_released() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());

    let types = vec![
        journaled("Alpha", 1, Behavior::Succeed),
        journaled("Bravo", 2, Behavior::PanicUp),
    ];
    let err = run(&store, options(&journal, types)).await.unwrap_err();

    assert!(matches!(
        err,
        MigrationError::Halted { ref message, .. } if message.contains("Bravo exploded")
    ));
    assert!(records(&store).load(BRAVO_ID).await.unwrap().unwrap().has_error);
    assert!(lock_is_free(&store).await);
}

#[tokio::test]
async fn test_storage_errors_propagate() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());
    store.simulate_outage(true);

    let err = run(&store, options(&journal, alphabet())).await.unwrap_err();

    assert!(matches!(
        err,
        MigrationError::Storage(StoreError::Unavailable(_))
    ));
    assert!(journal.entries().is_empty());
}

#[tokio::test]
async fn test_resolution_error_halts_before_setup() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());

    let without_services =
        options(&journal, alphabet()).with_resolver(Arc::new(DefaultResolver));
    let err = run(&store, without_services).await.unwrap_err();

    assert!(matches!(err, MigrationError::Resolution { ref name, .. } if name == "tests::Alpha"));
    assert!(journal.entries().is_empty());
    assert!(lock_is_free(&store).await);
}

#[tokio::test]
async fn test_panicking_constructor_is_a_resolution_error() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());

    let types = vec![
        journaled("Alpha", 1, Behavior::Succeed),
        MigrationType::from_fn("app::Boom", || panic!("constructor exploded")).version(2),
    ];
    let handle = tokio::spawn({
        let store = store.clone();
        let options = options(&journal, types);
        async move { run(&store, options).await }
    });
    let err = handle
        .await
        .expect("Run should not unwind")
        .unwrap_err();

    assert!(matches!(
        err,
        MigrationError::Resolution { ref name, ref reason }
            if name == "app::Boom" && reason.contains("constructor exploded")
    ));
    assert_eq!(journal.entries(), vec!["up:Alpha"]);
    assert!(lock_is_free(&store).await);
    assert!(MigrationLock::new(store.clone())
        .acquire(Duration::from_secs(60))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_setup_is_skipped_for_migrations_that_never_ran() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());

    let never = || vec![journaled("Alpha", 1, Behavior::PanicSetup)];
    let down = options(&journal, never()).with_direction(MigrationDirection::Down);
    let outcome = run(&store, down).await.expect("Nothing to revert");

    assert_eq!(outcome.summary().unwrap().skipped, 1);
    assert!(journal.entries().is_empty());
    assert_eq!(store.count(RECORD_COLLECTION).await, 0);

    // The migration still counts as pending on the way up.
    let err = run(&store, options(&journal, never())).await.unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Halted { direction: MigrationDirection::Up, ref message, .. }
            if message.contains("could not be set up")
    ));
    records(&store).mark_fixed(ALPHA_ID).await.unwrap();
    journal.clear();

    let fixed = vec![journaled("Alpha", 1, Behavior::Succeed)];
    let outcome = run(&store, options(&journal, fixed)).await.unwrap();
    assert_eq!(outcome.summary().unwrap().applied, vec!["tests::Alpha"]);
    assert_eq!(journal.entries(), vec!["up:Alpha"]);
}

#[tokio::test]
async fn test_setup_failure_keeps_applied_migration_applied() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());
    run(&store, options(&journal, vec![journaled("Alpha", 1, Behavior::Succeed)]))
        .await
        .unwrap();
    journal.clear();

    let broken = || vec![journaled("Alpha", 1, Behavior::PanicSetup)];

    // Already applied: skipped without setup, clean record untouched.
    let outcome = run(&store, options(&journal, broken())).await.unwrap();
    assert_eq!(outcome.summary().unwrap().skipped, 1);
    assert!(journal.entries().is_empty());
    assert!(!records(&store).load(ALPHA_ID).await.unwrap().unwrap().has_error);

    // On the way down setup runs, fails, and the record remembers Down.
    let down = options(&journal, broken()).with_direction(MigrationDirection::Down);
    let err = run(&store, down).await.unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Halted { direction: MigrationDirection::Down, .. }
    ));
    assert_eq!(journal.entries(), vec!["setup:Alpha"]);
    records(&store).mark_fixed(ALPHA_ID).await.unwrap();
    journal.clear();

    // Fixed Down failure: still applied, so Up does not run it again.
    let outcome = run(&store, options(&journal, alphabet())).await.unwrap();
    assert_eq!(
        outcome.summary().unwrap().applied,
        vec!["tests::Bravo", "tests::Charlie"]
    );
    assert_eq!(journal.entries(), vec!["up:Bravo", "up:Charlie"]);
}

#[tokio::test]
async fn test_colliding_record_ids_stop_the_run() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());

    let types = vec![
        common::named("billing::AddIndex", "Billing").version(1),
        common::named("users::AddIndex", "Users").version(1),
    ];
    let err = run(&store, options(&journal, types)).await.unwrap_err();

    assert!(matches!(err, MigrationError::Discovery { ref name, .. } if name == "users::AddIndex"));
    assert!(journal.entries().is_empty());
    assert_eq!(store.count(RECORD_COLLECTION).await, 0);
    assert!(lock_is_free(&store).await);
}

#[tokio::test]
async fn test_held_lock_denies_run() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());

    let other_instance = MigrationLock::new(store.clone());
    let lease = other_instance
        .acquire(Duration::from_secs(3600))
        .await
        .unwrap()
        .expect("Lock should be free");

    let outcome = run(&store, options(&journal, alphabet())).await.unwrap();

    assert!(outcome.is_lock_denied());
    assert!(journal.entries().is_empty());
    assert_eq!(store.count(RECORD_COLLECTION).await, 0);

    // The denied run must not have touched the other instance's lease.
    assert!(other_instance.release(lease).await);
}

#[tokio::test]
async fn test_expired_lease_is_taken_over() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());

    let crashed = MigrationLock::new(store.clone());
    crashed.acquire(Duration::ZERO).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let outcome = run(&store, options(&journal, alphabet())).await.unwrap();

    assert_eq!(outcome.summary().unwrap().applied.len(), 3);
    assert!(lock_is_free(&store).await);
}

#[tokio::test]
async fn test_disabled_lock_ignores_held_lease() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());
    MigrationLock::new(store.clone())
        .acquire(Duration::from_secs(3600))
        .await
        .unwrap()
        .unwrap();

    let unlocked = options(&journal, alphabet()).with_lock_policy(LockPolicy::Disabled);
    let outcome = run(&store, unlocked).await.unwrap();

    assert_eq!(outcome.summary().unwrap().applied.len(), 3);
    assert!(!lock_is_free(&store).await);
}

#[tokio::test]
async fn test_custom_separator_shapes_record_ids() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());

    run(&store, options(&journal, alphabet()).with_separator('-'))
        .await
        .unwrap();

    let records = records(&store);
    assert!(records.load("migrationrecord-alpha-1").await.unwrap().is_some());
    assert!(records.load(ALPHA_ID).await.unwrap().is_none());
}

#[tokio::test]
async fn test_name_based_collector_drives_run() {
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::default());

    let types = vec![
        common::named("app.migrations.v1.M2_Second", "Second"),
        common::named("app.migrations.v1.M1_First", "First"),
        common::named("app.migrations.v2.M1_Third", "Third"),
    ];
    let named = options(&journal, vec![])
        .with_collector(Arc::new(NameBasedCollector::new(types)));
    run(&store, named).await.unwrap();

    assert_eq!(journal.entries(), vec!["up:First", "up:Second", "up:Third"]);
    assert!(records(&store)
        .load("migrationrecord/m1/third/2.1.0.0")
        .await
        .unwrap()
        .is_some());
}
