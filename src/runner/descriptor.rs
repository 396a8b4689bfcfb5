use crate::core::ChangeEntry;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Future produced by one invocation of a change set.
pub type ChangeFuture = BoxFuture<'static, anyhow::Result<()>>;

/// The change logic itself. Called once per invocation.
pub type ChangeFn = Arc<dyn Fn() -> ChangeFuture + Send + Sync>;

/// A change set ready to run: identity, provenance and the logic to invoke.
#[derive(Clone)]
pub struct ChangeDescriptor {
    pub id: String,
    pub author: String,
    /// Name of the change log this change set belongs to.
    pub origin: String,
    /// Name of the change set within its change log.
    pub unit: String,
    /// Invoke on every run, whatever the ledger says.
    pub run_always: bool,
    invoke: ChangeFn,
}

impl ChangeDescriptor {
    pub fn new<F, Fut>(id: impl Into<String>, author: impl Into<String>, invoke: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::from_fn(id, author, Arc::new(move || Box::pin(invoke()) as ChangeFuture))
    }

    /// Builds a descriptor around an already boxed change function.
    pub fn from_fn(id: impl Into<String>, author: impl Into<String>, invoke: ChangeFn) -> Self {
        let id = id.into();
        Self {
            unit: id.clone(),
            id,
            author: author.into(),
            origin: String::new(),
            run_always: false,
            invoke,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn run_always(mut self, run_always: bool) -> Self {
        self.run_always = run_always;
        self
    }

    /// Starts one invocation of the change logic.
    pub fn invoke(&self) -> ChangeFuture {
        (self.invoke)()
    }

    /// Ledger entry for a successful invocation, stamped now.
    pub fn to_entry(&self) -> ChangeEntry {
        ChangeEntry::new(&self.id, &self.author)
            .with_origin(&self.origin)
            .with_unit(&self.unit)
    }
}

impl fmt::Debug for ChangeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeDescriptor")
            .field("id", &self.id)
            .field("author", &self.author)
            .field("origin", &self.origin)
            .field("unit", &self.unit)
            .field("run_always", &self.run_always)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_invoke_calls_logic_each_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let descriptor = ChangeDescriptor::new("001", "alice", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });

        descriptor.invoke().await.unwrap();
        descriptor.clone().invoke().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_entry_carries_provenance() {
        let descriptor = ChangeDescriptor::new("001", "alice", || async { anyhow::Ok(()) })
            .with_origin("InitialSchema")
            .with_unit("create_users")
            .run_always(true);

        let entry = descriptor.to_entry();
        assert_eq!(entry.id, "001");
        assert_eq!(entry.author, "alice");
        assert_eq!(entry.origin_name, "InitialSchema");
        assert_eq!(entry.unit_name, "create_users");
        assert!(format!("{:?}", descriptor).contains("run_always: true"));
    }
}
