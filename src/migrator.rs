use crate::config::MigratorConfig;
use crate::core::Result;
use crate::discovery::{Discovery, ProfileFilter};
use crate::ledger::ChangeLedger;
use crate::lock::DistributedLock;
use crate::runner::{ChangeDescriptor, ChangeRunner, ExecutionReport};
use crate::storage::{ChangelogStore, find_or_create_table};
use std::sync::Arc;
use tracing::{Level, event};

/// Entry point for applications: one store, one configuration.
///
/// # Examples
///
/// ```
/// use runonce::{ChangeLog, ChangeSet, InMemoryStore, Migrator, MigratorConfig};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> runonce::Result<()> {
/// let migrator = Migrator::new(Arc::new(InMemoryStore::new()), MigratorConfig::default())?;
/// migrator.provision().await?;
///
/// let discovery = migrator.discovery().with_change_log(
///     ChangeLog::new("InitialSchema")
///         .order("001")
///         .change_set(ChangeSet::new("001", "alice", "1", || async { anyhow::Ok(()) })),
/// );
///
/// let report = migrator.execute_discovered(&discovery).await?;
/// assert_eq!(report.invoked, vec!["001"]);
/// # Ok(())
/// # }
/// ```
pub struct Migrator {
    config: MigratorConfig,
    store: Arc<dyn ChangelogStore>,
    runner: ChangeRunner,
}

impl Migrator {
    /// Validates `config` and wires ledger, lock and runner onto `store`.
    pub fn new(store: Arc<dyn ChangelogStore>, config: MigratorConfig) -> Result<Self> {
        config.validate()?;

        let table = config.ledger_table_name.clone();
        let runner = ChangeRunner::new(
            ChangeLedger::new(store.clone(), table.clone()),
            DistributedLock::new(store.clone(), table),
            config.lock_policy(),
        );

        Ok(Self {
            config,
            store,
            runner,
        })
    }

    /// Overrides the identity written into the lock record.
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.runner = self.runner.with_holder(holder);
        self
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    pub fn ledger(&self) -> &ChangeLedger {
        self.runner.ledger()
    }

    pub fn lock(&self) -> &DistributedLock {
        self.runner.lock()
    }

    /// Profile filter built from the configured active profiles.
    pub fn profile_filter(&self) -> ProfileFilter {
        ProfileFilter::new(self.config.active_profiles.clone())
    }

    /// Discovery preloaded with this configuration's active profiles.
    pub fn discovery(&self) -> Discovery {
        Discovery::new(self.profile_filter())
    }

    /// Creates the ledger table when it does not exist yet.
    pub async fn provision(&self) -> Result<()> {
        find_or_create_table(self.store.as_ref(), &self.config.ledger_table_name).await
    }

    /// Runs already ordered descriptors.
    pub async fn execute(&self, descriptors: &[ChangeDescriptor]) -> Result<ExecutionReport> {
        if !self.config.enabled {
            event!(Level::INFO, "migrator is disabled; exiting");
            return Ok(ExecutionReport::disabled());
        }
        self.runner.execute(descriptors).await
    }

    /// Resolves `discovery` under the configured active profiles and runs the
    /// result. The discovery's own filter is not consulted.
    pub async fn execute_discovered(&self, discovery: &Discovery) -> Result<ExecutionReport> {
        if !self.config.enabled {
            event!(Level::INFO, "migrator is disabled; exiting");
            return Ok(ExecutionReport::disabled());
        }
        let descriptors = discovery.resolve_with(&self.profile_filter())?;
        self.runner.execute(&descriptors).await
    }

    /// Acquires the lock under the configured policy, outside a full run.
    pub async fn acquire_lock(&self) -> Result<bool> {
        self.runner
            .lock()
            .acquire_with_policy(self.runner.holder(), self.runner.policy())
            .await
    }

    /// Releases the lock whoever holds it. Also the way to clear a stale lock.
    pub async fn release_lock(&self) -> Result<()> {
        self.runner.lock().release().await
    }

    pub async fn is_lock_held(&self) -> Result<bool> {
        self.runner.lock().is_held().await
    }
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("config", &self.config)
            .field("runner", &self.runner)
            .finish()
    }
}
