/// Changelog runner tests
///
/// End-to-end behaviour of `ChangeRunner` / `Migrator` against shared stores:
/// idempotence, run-always entries, fail-fast, and exclusion between
/// concurrent runs.
/// Run with: cargo test --test runner_tests

use async_trait::async_trait;
use runonce::{
    ChangeDescriptor, ChangeEntry, ChangeLedger, ChangeRunner, ChangelogStore, ConditionalPut,
    DistributedLock, FileStore, InMemoryStore, LockPolicy, MigrationError, Migrator,
    MigratorConfig, RunStatus,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const TABLE: &str = "changelog";

type CallLog = Arc<Mutex<Vec<String>>>;

fn runner_on(store: Arc<dyn ChangelogStore>, holder: &str, policy: LockPolicy) -> ChangeRunner {
    ChangeRunner::new(
        ChangeLedger::new(store.clone(), TABLE),
        DistributedLock::new(store, TABLE),
        policy,
    )
    .with_holder(holder)
}

fn logged(id: &str, calls: &CallLog) -> ChangeDescriptor {
    let calls = calls.clone();
    let name = id.to_string();
    ChangeDescriptor::new(id, "tester", move || {
        let calls = calls.clone();
        let name = name.clone();
        async move {
            calls.lock().unwrap().push(name);
            anyhow::Ok(())
        }
    })
}

async fn recording_store() -> InMemoryStore {
    let store = InMemoryStore::new().with_history();
    store.create_table(TABLE).await.unwrap();
    store
}

fn ledger_writes(history: &[ChangeEntry]) -> Vec<&ChangeEntry> {
    history.iter().filter(|entry| !entry.is_lock()).collect()
}

#[tokio::test]
async fn test_three_change_sets_with_run_always() {
    let store = recording_store().await;
    let runner = runner_on(Arc::new(store.clone()), "host-a", LockPolicy::no_wait());
    let calls = CallLog::default();
    let descriptors = vec![
        logged("1", &calls),
        logged("2", &calls).run_always(true),
        logged("3", &calls),
    ];

    let first = runner.execute(&descriptors).await.unwrap();
    assert_eq!(first.status, RunStatus::Completed);
    assert_eq!(first.invoked, vec!["1", "2", "3"]);
    assert_eq!(store.entry_count(TABLE).await.unwrap(), 3);
    let first_stamp = runner.ledger().find("2").await.unwrap().unwrap().timestamp;

    let second = runner.execute(&descriptors).await.unwrap();
    assert_eq!(second.invoked, vec!["2"]);
    assert_eq!(second.skipped, vec!["1", "3"]);

    // One live entry per id, but four ledger writes in total.
    assert_eq!(store.entry_count(TABLE).await.unwrap(), 3);
    let history = store.history(TABLE).await.unwrap();
    assert_eq!(ledger_writes(&history).len(), 4);

    let second_stamp = runner.ledger().find("2").await.unwrap().unwrap().timestamp;
    assert!(second_stamp > first_stamp);
    assert_eq!(*calls.lock().unwrap(), vec!["1", "2", "3", "2"]);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let store = InMemoryStore::with_table(TABLE).await.unwrap();
    let runner = runner_on(Arc::new(store.clone()), "host-a", LockPolicy::no_wait());
    let calls = CallLog::default();
    let descriptors = vec![logged("a", &calls), logged("b", &calls)];

    runner.execute(&descriptors).await.unwrap();
    let again = runner.execute(&descriptors).await.unwrap();

    assert!(again.invoked.is_empty());
    assert_eq!(again.skipped, vec!["a", "b"]);
    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_run_always_timestamps_strictly_increase() {
    let store = recording_store().await;
    let runner = runner_on(Arc::new(store.clone()), "host-a", LockPolicy::no_wait());
    let calls = CallLog::default();
    let descriptors = vec![logged("refresh", &calls).run_always(true)];

    for _ in 0..5 {
        runner.execute(&descriptors).await.unwrap();
    }

    let history = store.history(TABLE).await.unwrap();
    let stamps: Vec<_> = ledger_writes(&history).iter().map(|e| e.timestamp).collect();
    assert_eq!(stamps.len(), 5);
    assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn test_failure_halts_and_rerun_resumes() {
    let store = InMemoryStore::with_table(TABLE).await.unwrap();
    let runner = runner_on(Arc::new(store.clone()), "host-a", LockPolicy::no_wait());
    let calls = CallLog::default();
    let broken = Arc::new(AtomicBool::new(true));

    let flaky = {
        let calls = calls.clone();
        let broken = broken.clone();
        ChangeDescriptor::new("2", "tester", move || {
            let calls = calls.clone();
            let broken = broken.clone();
            async move {
                calls.lock().unwrap().push("2".to_string());
                if broken.load(Ordering::SeqCst) {
                    anyhow::bail!("column already exists");
                }
                Ok(())
            }
        })
    };
    let descriptors = vec![logged("1", &calls), flaky, logged("3", &calls)];

    let err = runner.execute(&descriptors).await.unwrap_err();
    match &err {
        MigrationError::ChangeExecutionFailed { id, source } => {
            assert_eq!(id, "2");
            assert!(source.to_string().contains("column already exists"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(*calls.lock().unwrap(), vec!["1", "2"]);
    assert!(!runner.ledger().is_new("1").await.unwrap());
    assert!(runner.ledger().is_new("2").await.unwrap());
    assert!(runner.ledger().is_new("3").await.unwrap());
    assert!(!runner.lock().is_held().await.unwrap());

    broken.store(false, Ordering::SeqCst);
    let report = runner.execute(&descriptors).await.unwrap();
    assert_eq!(report.skipped, vec!["1"]);
    assert_eq!(report.invoked, vec!["2", "3"]);
}

#[tokio::test]
async fn test_lock_unobtainable_when_configured() {
    let store: Arc<dyn ChangelogStore> = Arc::new(InMemoryStore::with_table(TABLE).await.unwrap());
    let policy = LockPolicy::waiting(Duration::from_millis(80), Duration::from_millis(20))
        .fail_if_unobtainable(true);
    let runner = runner_on(store.clone(), "host-b", policy);
    assert!(DistributedLock::new(store, TABLE).try_acquire("host-a").await.unwrap());
    let calls = CallLog::default();

    let err = runner.execute(&[logged("1", &calls)]).await.unwrap_err();

    assert!(matches!(err, MigrationError::LockUnobtainable(_)));
    assert!(calls.lock().unwrap().is_empty());
    // The foreign lock survives a failed attempt.
    assert_eq!(runner.lock().holder().await.unwrap().unwrap().author, "host-a");
}

#[tokio::test]
async fn test_concurrent_runs_are_mutually_exclusive() {
    let store: Arc<dyn ChangelogStore> = Arc::new(InMemoryStore::with_table(TABLE).await.unwrap());
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let invocations = Arc::new(AtomicUsize::new(0));

    let descriptors: Vec<ChangeDescriptor> = ["1", "2", "3"]
        .into_iter()
        .map(|id| {
            let active = active.clone();
            let max_active = max_active.clone();
            let invocations = invocations.clone();
            ChangeDescriptor::new(id, "tester", move || {
                let active = active.clone();
                let max_active = max_active.clone();
                let invocations = invocations.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    invocations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            })
        })
        .collect();
    let descriptors = Arc::new(descriptors);

    let policy = LockPolicy::waiting(Duration::from_secs(10), Duration::from_millis(5));
    let mut handles = vec![];
    for holder in ["host-a", "host-b", "host-c"] {
        let runner = runner_on(store.clone(), holder, policy.clone());
        let descriptors = descriptors.clone();
        handles.push(tokio::spawn(async move { runner.execute(&descriptors).await }));
    }

    let mut total_invoked = 0;
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        total_invoked += report.invoked.len();
    }

    assert_eq!(max_active.load(Ordering::SeqCst), 1);
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    assert_eq!(total_invoked, 3);
}

#[tokio::test]
async fn test_file_store_runs_from_separate_instances() {
    let temp_dir = TempDir::new().unwrap();
    let config = MigratorConfig::new()
        .wait_for_lock(true)
        .lock_poll_interval_seconds(1)
        .lock_wait_timeout_minutes(1);

    let first = Migrator::new(Arc::new(FileStore::open(temp_dir.path()).unwrap()), config.clone())
        .unwrap()
        .with_holder("process-1");
    first.provision().await.unwrap();

    let calls = CallLog::default();
    let descriptors = vec![logged("001", &calls), logged("002", &calls)];
    let report = first.execute(&descriptors).await.unwrap();
    assert_eq!(report.invoked, vec!["001", "002"]);

    let second = Migrator::new(Arc::new(FileStore::open(temp_dir.path()).unwrap()), config)
        .unwrap()
        .with_holder("process-2");
    let report = second.execute(&descriptors).await.unwrap();
    assert_eq!(report.skipped, vec!["001", "002"]);
    assert_eq!(second.ledger().entries().await.unwrap().len(), 2);
    assert!(!second.is_lock_held().await.unwrap());
}

#[tokio::test]
async fn test_file_store_applies_long_change_set_ids() {
    let temp_dir = TempDir::new().unwrap();
    let migrator = Migrator::new(
        Arc::new(FileStore::open(temp_dir.path()).unwrap()),
        MigratorConfig::default(),
    )
    .unwrap()
    .with_holder("process-1");
    migrator.provision().await.unwrap();

    let long_id = format!("2024-01-01-{}", "backfill-customer-records-".repeat(5));
    assert!(long_id.len() > 121);
    let calls = CallLog::default();
    let descriptors = vec![logged(&long_id, &calls)];

    let first = migrator.execute(&descriptors).await.unwrap();
    let second = migrator.execute(&descriptors).await.unwrap();

    assert_eq!(first.invoked, vec![long_id.clone()]);
    assert_eq!(second.skipped, vec![long_id.clone()]);
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(migrator.ledger().find(&long_id).await.unwrap().unwrap().id, long_id);
}

/// Store wrapper that can fail writes on demand.
struct FaultyStore {
    inner: InMemoryStore,
    fail_puts: AtomicBool,
    fail_conditional_puts: AtomicBool,
}

impl FaultyStore {
    async fn new() -> Self {
        Self {
            inner: InMemoryStore::with_table(TABLE).await.unwrap(),
            fail_puts: AtomicBool::new(false),
            fail_conditional_puts: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ChangelogStore for FaultyStore {
    async fn get(&self, table: &str, id: &str) -> runonce::Result<Option<ChangeEntry>> {
        self.inner.get(table, id).await
    }

    async fn put(&self, table: &str, entry: ChangeEntry) -> runonce::Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(MigrationError::StoreUnavailable("connection reset".to_string()));
        }
        self.inner.put(table, entry).await
    }

    async fn put_if_absent(&self, table: &str, entry: ChangeEntry) -> runonce::Result<ConditionalPut> {
        if self.fail_conditional_puts.load(Ordering::SeqCst) {
            return Err(MigrationError::StoreUnavailable("throttled".to_string()));
        }
        self.inner.put_if_absent(table, entry).await
    }

    async fn delete(&self, table: &str, id: &str) -> runonce::Result<()> {
        self.inner.delete(table, id).await
    }

    async fn scan(&self, table: &str) -> runonce::Result<Vec<ChangeEntry>> {
        self.inner.scan(table).await
    }

    async fn table_exists(&self, table: &str) -> runonce::Result<bool> {
        self.inner.table_exists(table).await
    }

    async fn create_table(&self, table: &str) -> runonce::Result<()> {
        self.inner.create_table(table).await
    }
}

#[tokio::test]
async fn test_record_failure_propagates_and_releases_lock() {
    let store = Arc::new(FaultyStore::new().await);
    store.fail_puts.store(true, Ordering::SeqCst);
    let runner = runner_on(store.clone(), "host-a", LockPolicy::no_wait());
    let calls = CallLog::default();

    let err = runner
        .execute(&[logged("1", &calls), logged("2", &calls)])
        .await
        .unwrap_err();

    assert!(matches!(err, MigrationError::StoreUnavailable(_)));
    assert_eq!(*calls.lock().unwrap(), vec!["1"]);
    assert!(!runner.lock().is_held().await.unwrap());
}

#[tokio::test]
async fn test_lock_store_failure_is_not_contention() {
    let store = Arc::new(FaultyStore::new().await);
    store.fail_conditional_puts.store(true, Ordering::SeqCst);
    let runner = runner_on(
        store.clone(),
        "host-a",
        LockPolicy::waiting(Duration::from_secs(5), Duration::from_millis(10)),
    );
    let calls = CallLog::default();

    let started = std::time::Instant::now();
    let err = runner.execute(&[logged("1", &calls)]).await.unwrap_err();

    // Surfaces at once instead of polling out the wait window.
    assert!(matches!(err, MigrationError::StoreUnavailable(_)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(calls.lock().unwrap().is_empty());
}
