//! Integration tests for resource-cache
//!
//! These tests drive a `ResourceCache` end to end against the in-memory
//! remote, using the clinic domain types. Timing-sensitive scenarios run on
//! a paused clock and interleave calls with `tokio::join!`.

use resource_cache::domain::customer::{Customer, CustomerDraft, CustomerStatus, CustomerType};
use resource_cache::domain::medication::{Medication, MedicationDraft, MedicationFilter};
use resource_cache::{
    CacheConfig, CacheMetrics, CollectionStatus, Error, FetchStrategy, InMemoryRemote,
    MutationKind, RemoteOp, ResourceCache,
};
use chrono::NaiveDate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type MedicationCache = ResourceCache<Medication, InMemoryRemote<Medication>>;

fn medication(id: u64, name: &str) -> Medication {
    MedicationDraft {
        commercial_name: name.to_string(),
        active_ingredient: "Meloxicam".to_string(),
        presentation: "Tableta".to_string(),
        laboratory: "Zoetis".to_string(),
    }
    .into_medication(id)
}

fn medication_remote(items: &[Medication]) -> InMemoryRemote<Medication> {
    let remote = InMemoryRemote::new(|id, draft: &MedicationDraft| draft.clone().into_medication(id));
    for item in items {
        remote.insert(item.clone());
    }
    remote
}

async fn loaded_cache(items: &[Medication]) -> MedicationCache {
    let cache = ResourceCache::new(medication_remote(items));
    assert!(cache.fetch_all().await, "Initial fetch should succeed");
    cache
}

fn ids(cache: &MedicationCache) -> Vec<u64> {
    cache.entities().iter().map(|m| m.id).collect()
}

/// Records the names of entity `id` across every snapshot delivered.
fn record_names(cache: &MedicationCache, id: u64) -> Arc<Mutex<Vec<Option<String>>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _subscription = cache.subscribe(move |snapshot| {
        let name = snapshot.get(&id).map(|m| m.commercial_name.clone());
        sink.lock().expect("lock").push(name);
    });
    seen
}

/// Test 1: Rollback on Failed Update
///
/// - The optimistic value is visible while the remote call is in flight
/// - After the failure the exact previous value is back
/// - The collection error carries the failure
#[tokio::test]
async fn test_failed_update_rolls_back_exact_value() {
    let _ = env_logger::builder().is_test(true).try_init();
    let original = medication(1, "Meloxivet");
    let cache = loaded_cache(&[original.clone(), medication(2, "Amoxil")]).await;
    let names = record_names(&cache, 1);

    cache
        .remote()
        .fail_next(RemoteOp::Update, Error::Network("timeout".to_string()));

    let mut edited = original.clone();
    edited.commercial_name = "Meloxivet Forte".to_string();
    assert!(cache.update(edited).await.is_none(), "Update should fail");

    assert_eq!(cache.get(&1), Some(original));
    assert_eq!(ids(&cache), vec![1, 2], "Order must be preserved");
    assert_eq!(cache.error(), Some(Error::Network("timeout".to_string())));
    assert_eq!(cache.status(), CollectionStatus::Loaded);
    assert!(cache.pending().is_empty());

    let names = names.lock().expect("lock").clone();
    assert_eq!(
        names,
        vec![
            Some("Meloxivet Forte".to_string()),
            Some("Meloxivet".to_string()),
            // mutation_error recorded
            Some("Meloxivet".to_string()),
        ]
    );
}

/// Test 2: Delete Rollback
///
/// - A refused delete puts the entity back at its position, unchanged
/// - A confirmed delete keeps it gone
#[tokio::test]
async fn test_delete_rollback_and_commit() {
    let items = [medication(1, "A1"), medication(2, "B2"), medication(3, "C3")];
    let cache = loaded_cache(&items).await;

    cache
        .remote()
        .fail_next(RemoteOp::Delete, Error::NotFound("medication:2".to_string()));
    assert!(!cache.delete(&2).await);
    assert_eq!(ids(&cache), vec![1, 2, 3]);
    assert_eq!(cache.get(&2), Some(items[1].clone()));
    assert!(matches!(cache.error(), Some(Error::NotFound(_))));

    assert!(cache.delete(&2).await);
    assert_eq!(ids(&cache), vec![1, 3]);
    assert_eq!(cache.error(), None, "Success clears the mutation error");

    assert!(cache.fetch_all().await);
    assert_eq!(ids(&cache), vec![1, 3], "Still gone after a refetch");
}

/// Test 2b: Abandoned Mutations Roll Back
///
/// - A mutation future dropped mid-flight (timeout, select) undoes its
///   optimistic change right away
/// - The key is released, nothing stays pending, and the error says why
#[tokio::test(start_paused = true)]
async fn test_abandoned_mutations_roll_back() {
    let cache = loaded_cache(&[medication(1, "Original"), medication(2, "Second")]).await;
    let name_of = |id: u64| cache.get(&id).map(|m| m.commercial_name);

    cache.remote().fail_next_after(
        RemoteOp::Update,
        Duration::from_millis(100),
        Error::Network("gateway timeout".into()),
    );
    let outcome = tokio::time::timeout(
        Duration::from_millis(10),
        cache.update(medication(1, "Optimistic")),
    )
    .await;
    assert!(outcome.is_err(), "update should have been cut off");
    assert_eq!(name_of(1), Some("Original".to_string()));
    assert!(matches!(cache.error(), Some(Error::Other(_))));

    cache.remote().fail_next_after(
        RemoteOp::Delete,
        Duration::from_millis(100),
        Error::Network("gateway timeout".into()),
    );
    let outcome = tokio::time::timeout(Duration::from_millis(10), cache.delete(&2)).await;
    assert!(outcome.is_err(), "delete should have been cut off");
    assert_eq!(ids(&cache), vec![1, 2]);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        cache.remote().get(&1).map(|m| m.commercial_name),
        name_of(1),
        "Local copy matches the server"
    );
    assert!(cache.remote().get(&2).is_some());
    assert!(cache.pending().is_empty());
    assert!(!cache.mutator().is_busy(&1));
    assert!(!cache.mutator().is_busy(&2));

    assert!(cache.update(medication(1, "Confirmed")).await.is_some());
    assert_eq!(name_of(1), Some("Confirmed".to_string()));
    assert_eq!(cache.error(), None);
}

/// Test 3: Fetch Race Resolution
///
/// Fetch #1 answers `[A, B]` after 200ms, fetch #2 answers `[A, B, C]`
/// after 50ms. The later-issued result wins.
#[tokio::test(start_paused = true)]
async fn test_fetch_race_resolved_by_issue_order() {
    let remote = medication_remote(&[medication(1, "A1"), medication(2, "B2")]);
    remote.delay_next(RemoteOp::FetchAll, Duration::from_millis(200));
    remote.delay_next(RemoteOp::FetchAll, Duration::from_millis(50));
    let cache = ResourceCache::new(remote.clone());

    let (first, second) = tokio::join!(cache.fetch_all(), async {
        remote.insert(medication(3, "C3"));
        cache.fetch_all().await
    });

    assert!(first, "A superseded fetch still succeeded");
    assert!(second);
    assert_eq!(ids(&cache), vec![1, 2, 3]);
    assert_eq!(cache.status(), CollectionStatus::Loaded);
}

/// Test 3b: an older result that lands first is shown but does not settle
/// the status while the newer fetch is outstanding.
#[tokio::test(start_paused = true)]
async fn test_early_older_fetch_keeps_loading() {
    let remote = medication_remote(&[medication(1, "A1")]);
    remote.delay_next(RemoteOp::FetchAll, Duration::from_millis(50));
    remote.delay_next(RemoteOp::FetchAll, Duration::from_millis(200));
    let cache = ResourceCache::new(remote.clone());

    let observe = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        (cache.status(), ids(&cache))
    };
    let (_, _, (status, mid)) = tokio::join!(cache.fetch_all(), async {
        remote.insert(medication(2, "B2"));
        cache.fetch_all().await
    }, observe);

    assert_eq!(status, CollectionStatus::Loading);
    assert_eq!(mid, vec![1]);
    assert_eq!(ids(&cache), vec![1, 2]);
    assert_eq!(cache.status(), CollectionStatus::Loaded);
}

/// Test 3c: an abandoned fetch never strands the status in `Loading`.
#[tokio::test(start_paused = true)]
async fn test_abandoned_fetch_does_not_strand_loading() {
    let cache = loaded_cache(&[medication(1, "A1")]).await;
    cache
        .remote()
        .delay_next(RemoteOp::FetchAll, Duration::from_millis(100));
    cache
        .remote()
        .delay_next(RemoteOp::FetchAll, Duration::from_millis(100));

    let (first, second) = tokio::join!(
        cache.fetch_all(),
        tokio::time::timeout(Duration::from_millis(10), cache.fetch_all())
    );

    assert!(first);
    assert!(second.is_err(), "second fetch should have been cut off");
    assert_eq!(cache.status(), CollectionStatus::Loaded);
    assert_eq!(cache.error(), None);

    cache
        .remote()
        .delay_next(RemoteOp::FetchAll, Duration::from_millis(100));
    let alone = tokio::time::timeout(Duration::from_millis(10), cache.fetch_all()).await;
    assert!(alone.is_err());
    assert_eq!(cache.status(), CollectionStatus::Loaded);
    assert_eq!(ids(&cache), vec![1]);
}

/// Test 4: Same-Key Serialization
///
/// Two updates of one key: the second waits for the first to resolve, and
/// the last issued value is what remains.
#[tokio::test(start_paused = true)]
async fn test_same_key_updates_are_serialized() {
    let cache = loaded_cache(&[medication(1, "Base")]).await;
    let remote = cache.remote().clone();
    remote.delay_next(RemoteOp::Update, Duration::from_millis(100));
    remote.delay_next(RemoteOp::Update, Duration::from_millis(10));

    let observe = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let name = cache.get(&1).map(|m| m.commercial_name);
        (name, cache.pending().len(), remote.calls(RemoteOp::Update))
    };
    let (v1, v2, (mid_name, mid_pending, mid_calls)) = tokio::join!(
        cache.update(medication(1, "v1")),
        cache.update(medication(1, "v2")),
        observe
    );

    assert!(v1.is_some());
    assert!(v2.is_some());
    assert_eq!(mid_name.as_deref(), Some("v1"), "Second update waits");
    assert_eq!(mid_pending, 2);
    assert_eq!(mid_calls, 1, "Second update not sent yet");

    assert_eq!(cache.get(&1).map(|m| m.commercial_name).as_deref(), Some("v2"));
    assert_eq!(remote.get(&1).map(|m| m.commercial_name).as_deref(), Some("v2"));
    assert!(cache.pending().is_empty());
}

/// Test 4b: different keys do not wait for each other.
#[tokio::test(start_paused = true)]
async fn test_different_keys_run_concurrently() {
    let cache = loaded_cache(&[medication(1, "One"), medication(2, "Two")]).await;
    cache
        .remote()
        .delay_next(RemoteOp::Update, Duration::from_millis(100));
    cache
        .remote()
        .delay_next(RemoteOp::Update, Duration::from_millis(100));

    let started = tokio::time::Instant::now();
    let (a, b) = tokio::join!(
        cache.update(medication(1, "Uno")),
        cache.update(medication(2, "Dos"))
    );

    assert!(a.is_some() && b.is_some());
    assert!(started.elapsed() < Duration::from_millis(150));
}

/// Test 4c: many mutations in flight at once all settle.
#[tokio::test]
async fn test_concurrent_mutations_all_settle() {
    let items: Vec<Medication> = (1..=20)
        .map(|id| medication(id, &format!("Med {}", id)))
        .collect();
    let cache = loaded_cache(&items).await;

    let updates = (1..=20).map(|id| {
        let cache = cache.clone();
        async move { cache.update(medication(id, &format!("Renamed {}", id))).await }
    });
    let results = futures::future::join_all(updates).await;

    assert!(results.iter().all(Option::is_some));
    assert!(cache.pending().is_empty());
    assert_eq!(ids(&cache), (1..=20).collect::<Vec<u64>>());
    assert!(cache
        .entities()
        .iter()
        .all(|m| m.commercial_name.starts_with("Renamed")));
}

/// Test 5: Create is Server-Authoritative
///
/// - No entity appears before the server answers
/// - The stored entity carries the server-assigned key
#[tokio::test]
async fn test_create_uses_server_key() {
    let remote = medication_remote(&[medication(1, "Amoxil")]).with_next_id(7);
    let cache = ResourceCache::new(remote);
    assert!(cache.fetch_all().await);

    let seen_keys = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen_keys);
    let _sub = cache.subscribe(move |snapshot| {
        sink.lock().expect("lock").extend(snapshot.keys());
    });

    let draft = MedicationDraft {
        commercial_name: "Ivomec".to_string(),
        active_ingredient: "Ivermectina".to_string(),
        presentation: "Inyectable".to_string(),
        laboratory: "Boehringer".to_string(),
    };
    let created = cache.create(&draft).await.expect("Create should succeed");

    assert_eq!(created.id, 7);
    assert_eq!(cache.get_one(&7).expect("cached"), created);
    assert_eq!(cache.remote().get(&7), Some(created));
    let seen = seen_keys.lock().expect("lock").clone();
    assert!(seen.iter().all(|k| *k == 1 || *k == 7), "only real keys: {:?}", seen);
}

/// Test 5b: a refused create leaves the store untouched.
#[tokio::test]
async fn test_failed_create_changes_nothing() {
    let cache = loaded_cache(&[medication(1, "Amoxil")]).await;
    let mut fields = resource_cache::FieldErrors::new();
    fields.insert(
        "commercialName".to_string(),
        vec!["commercialName is reserved".to_string()],
    );
    cache
        .remote()
        .fail_next(RemoteOp::Create, Error::Validation(fields));

    let draft = MedicationDraft {
        commercial_name: "Reservado".to_string(),
        active_ingredient: "Nada".to_string(),
        presentation: "Jarabe".to_string(),
        laboratory: "X".to_string(),
    };
    assert!(cache.create(&draft).await.is_none());
    assert_eq!(ids(&cache), vec![1]);
    assert_eq!(
        cache.error().map(|e| e.message()),
        Some("commercialName is reserved".to_string())
    );
}

/// Test 6: Idempotent Restore
///
/// Restoring an active entity succeeds and fetches exactly once; restoring a
/// deleted one brings it back.
#[tokio::test]
async fn test_restore_is_idempotent_and_refetches_once() {
    let cache = loaded_cache(&[medication(1, "A1"), medication(2, "B2")]).await;
    let remote = cache.remote().clone();
    let fetches = remote.calls(RemoteOp::FetchAll);

    assert!(cache.restore(&1).await);
    assert_eq!(cache.error(), None);
    assert_eq!(remote.calls(RemoteOp::FetchAll), fetches + 1);

    assert!(cache.delete(&2).await);
    assert!(remote.is_deleted(&2));
    assert!(cache.restore(&2).await);
    assert_eq!(ids(&cache), vec![1, 2]);
    assert_eq!(remote.calls(RemoteOp::FetchAll), fetches + 2);

    assert!(!cache.restore(&99).await, "Unknown key is an error");
    assert!(matches!(cache.error(), Some(Error::NotFound(_))));
    assert_eq!(remote.calls(RemoteOp::FetchAll), fetches + 2);
}

/// Test 7: Subscriber Isolation
///
/// A listener that panics does not prevent the next one from seeing the
/// correct snapshot, and the store stays intact.
#[tokio::test]
async fn test_panicking_listener_does_not_stop_others() {
    let cache = ResourceCache::new(medication_remote(&[medication(1, "A1"), medication(2, "B2")]));

    let _bad = cache.subscribe(|_| panic!("listener failure"));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _good = cache.subscribe(move |snapshot| {
        sink.lock()
            .expect("lock")
            .push((snapshot.status, snapshot.len()));
    });

    assert!(cache.fetch_all().await);

    let seen = seen.lock().expect("lock").clone();
    assert_eq!(
        seen,
        vec![(CollectionStatus::Loading, 0), (CollectionStatus::Loaded, 2)]
    );
    assert_eq!(cache.len(), 2);
}

/// Test 8: Load Strategies and Staleness
#[tokio::test]
async fn test_load_strategies() {
    let remote = medication_remote(&[medication(1, "A1")]);
    let cache = ResourceCache::new(remote.clone());

    assert!(cache.load(FetchStrategy::Fresh).await);
    assert_eq!(cache.status(), CollectionStatus::Idle);
    assert_eq!(remote.calls(RemoteOp::FetchAll), 0);

    assert!(cache.load(FetchStrategy::Refresh).await);
    assert!(cache.load(FetchStrategy::Refresh).await);
    assert_eq!(remote.calls(RemoteOp::FetchAll), 1, "Loaded and fresh");
    assert!(cache.last_fetched_at().is_some());

    let always_stale = ResourceCache::with_config(
        remote.clone(),
        CacheConfig::default().with_stale_after(Duration::ZERO),
    );
    assert!(always_stale.load(FetchStrategy::Refresh).await);
    assert!(always_stale.load(FetchStrategy::Refresh).await);
    assert_eq!(remote.calls(RemoteOp::FetchAll), 3);

    remote.fail_next(RemoteOp::FetchAll, Error::Network("down".to_string()));
    assert!(!cache.load(FetchStrategy::Invalidate).await);
    assert_eq!(cache.status(), CollectionStatus::Error);
    assert_eq!(cache.len(), 1, "Last good snapshot kept");
}

#[derive(Default)]
struct CountingMetrics {
    fetches: AtomicUsize,
    mutations: AtomicUsize,
    rollbacks: AtomicUsize,
    errors: AtomicUsize,
}

struct SharedMetrics(Arc<CountingMetrics>);

impl CacheMetrics for SharedMetrics {
    fn record_fetch(&self, _key: &str, _entities: usize, _duration: Duration) {
        self.0.fetches.fetch_add(1, Ordering::SeqCst);
    }

    fn record_mutation(&self, _key: &str, _kind: MutationKind, _duration: Duration) {
        self.0.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn record_rollback(&self, key: &str, kind: MutationKind) {
        assert_eq!(key, "medication:1");
        assert_eq!(kind, MutationKind::Update);
        self.0.rollbacks.fetch_add(1, Ordering::SeqCst);
    }

    fn record_error(&self, _key: &str, _error: &Error) {
        self.0.errors.fetch_add(1, Ordering::SeqCst);
    }
}

/// Test 9: Metrics Hooks
#[tokio::test]
async fn test_metrics_hooks() {
    let counters = Arc::new(CountingMetrics::default());
    let cache = ResourceCache::with_metrics(
        medication_remote(&[medication(1, "A1")]),
        Box::new(SharedMetrics(Arc::clone(&counters))),
    );

    assert!(cache.fetch_all().await);
    assert!(cache.update(medication(1, "A2")).await.is_some());
    cache
        .remote()
        .fail_next(RemoteOp::Update, Error::Network("down".to_string()));
    assert!(cache.update(medication(1, "A3")).await.is_none());

    assert_eq!(counters.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(counters.mutations.load(Ordering::SeqCst), 1);
    assert_eq!(counters.rollbacks.load(Ordering::SeqCst), 1);
    assert_eq!(counters.errors.load(Ordering::SeqCst), 1);
}

/// Test 10: Conflict Pre-flight Against the Snapshot
#[tokio::test]
async fn test_customer_conflict_preflight() {
    let remote = InMemoryRemote::new(|id, d: &CustomerDraft| Customer {
        id,
        first_names: d.first_names.clone(),
        paternal_last_name: d.paternal_last_name.clone(),
        maternal_last_name: d.maternal_last_name.clone(),
        document_id: d.document_id.clone(),
        phone: d.phone.clone(),
        email: d.email.clone(),
        address: d.address.clone(),
        customer_type: d.customer_type,
        status: d.status,
        notes: d.notes.clone(),
        registered_on: NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
    });
    let cache = ResourceCache::new(remote.clone());

    let draft = CustomerDraft {
        first_names: "Rosa".to_string(),
        paternal_last_name: "Flores".to_string(),
        maternal_last_name: None,
        document_id: "1234567".to_string(),
        phone: "70000001".to_string(),
        email: "rosa@example.com".to_string(),
        address: "Calle 1".to_string(),
        customer_type: CustomerType::Domestic,
        status: CustomerStatus::Active,
        notes: String::new(),
    };
    let rosa = cache.create(&draft).await.expect("First create succeeds");
    assert_eq!(rosa.full_name(), "Rosa Flores");

    let duplicate = CustomerDraft {
        first_names: "Rosa M.".to_string(),
        document_id: "7654321".to_string(),
        email: "ROSA@example.com".to_string(),
        ..draft.clone()
    };
    assert!(cache.create(&duplicate).await.is_none());
    let err = cache.error().expect("conflict recorded");
    assert!(err.field_errors().is_some_and(|f| f.contains_key("email")));
    assert_eq!(remote.calls(RemoteOp::Create), 1, "Never sent");

    let invalid = CustomerDraft {
        email: "rosa-at-example".to_string(),
        document_id: "555".to_string(),
        ..draft
    };
    assert!(cache.create(&invalid).await.is_none());
    assert!(cache
        .error()
        .and_then(|e| e.field_errors().map(|f| f.contains_key("email")))
        .unwrap_or(false));
    assert_eq!(cache.len(), 1);
}

/// Test 11: Refresh One and Filtering
#[tokio::test]
async fn test_refresh_one_and_filter() {
    let cache = loaded_cache(&[medication(1, "Amoxil"), medication(2, "Drontal")]).await;
    let remote = cache.remote().clone();

    let mut renamed = medication(1, "Amoxil Plus");
    renamed.created_at = None;
    remote.insert(renamed.clone());
    remote.mark_deleted(&2);

    assert_eq!(cache.refresh_one(&1).await, Some(renamed));
    assert_eq!(cache.refresh_one(&2).await, None);
    assert_eq!(ids(&cache), vec![1]);

    let filter = MedicationFilter::new().with_search("plus");
    let found = cache.filter(|m| filter.matches(m));
    assert_eq!(found.len(), 1);
}

/// Test 12: Dispose Keeps In-Flight Mutations Running
#[tokio::test(start_paused = true)]
async fn test_dispose_does_not_interrupt_mutations() {
    let cache = loaded_cache(&[medication(1, "A1")]).await;
    cache
        .remote()
        .delay_next(RemoteOp::Update, Duration::from_millis(100));

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _sub = cache.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let (updated, ()) = tokio::join!(cache.update(medication(1, "A2")), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.dispose();
    });

    assert!(updated.is_some());
    assert_eq!(cache.remote().get(&1).map(|m| m.commercial_name).as_deref(), Some("A2"));
    // Only the optimistic write was observed before disposal.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
