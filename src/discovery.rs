//! Turns registered change logs into the ordered descriptor list the runner
//! consumes.
//!
//! Change logs run in `order`, and change sets within a log run in their own
//! `order`; both compare as strings, ties broken by name. Profile filtering
//! happens here, so the runner only ever sees change sets that apply.

use crate::config::DEFAULT_PROFILE;
use crate::core::{LOCK_ID, MigrationError, Result};
use crate::runner::{ChangeDescriptor, ChangeFn, ChangeFuture};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

/// Active profiles and the matching rule for profile lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileFilter {
    active: Vec<String>,
}

impl ProfileFilter {
    /// Falls back to the `default` profile when `active` is empty.
    pub fn new<I, S>(active: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let active: Vec<String> = active.into_iter().map(Into::into).collect();
        if active.is_empty() {
            Self::default()
        } else {
            Self { active }
        }
    }

    pub fn active(&self) -> &[String] {
        &self.active
    }

    /// An empty list always matches. Otherwise any single match is enough:
    /// `name` matches when active, `!name` matches when not active.
    pub fn matches(&self, profiles: &[String]) -> bool {
        if profiles.is_empty() {
            return true;
        }

        profiles.iter().any(|profile| match profile.strip_prefix('!') {
            Some(negated) => !self.is_active(negated),
            None => self.is_active(profile),
        })
    }

    fn is_active(&self, profile: &str) -> bool {
        self.active.iter().any(|active| active == profile)
    }
}

impl Default for ProfileFilter {
    fn default() -> Self {
        Self {
            active: vec![DEFAULT_PROFILE.to_string()],
        }
    }
}

/// One change to apply, as registered by the application.
#[derive(Clone)]
pub struct ChangeSet {
    id: String,
    author: String,
    order: String,
    name: String,
    run_always: bool,
    profiles: Vec<String>,
    invoke: ChangeFn,
}

impl ChangeSet {
    pub fn new<F, Fut>(
        id: impl Into<String>,
        author: impl Into<String>,
        order: impl Into<String>,
        invoke: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            author: author.into(),
            order: order.into(),
            run_always: false,
            profiles: Vec::new(),
            invoke: Arc::new(move || Box::pin(invoke()) as ChangeFuture),
        }
    }

    /// Name recorded as the entry's unit; defaults to the id.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn run_always(mut self, run_always: bool) -> Self {
        self.run_always = run_always;
        self
    }

    pub fn profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn to_descriptor(&self, origin: &str) -> ChangeDescriptor {
        ChangeDescriptor::from_fn(&self.id, &self.author, self.invoke.clone())
            .with_origin(origin)
            .with_unit(&self.name)
            .run_always(self.run_always)
    }
}

impl std::fmt::Debug for ChangeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSet")
            .field("id", &self.id)
            .field("author", &self.author)
            .field("order", &self.order)
            .field("name", &self.name)
            .field("run_always", &self.run_always)
            .field("profiles", &self.profiles)
            .finish()
    }
}

/// A named, ordered group of change sets.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    name: String,
    order: String,
    profiles: Vec<String>,
    change_sets: Vec<ChangeSet>,
}

impl ChangeLog {
    /// A change log ordered by its name until [`order`](Self::order) is set.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            order: name.clone(),
            name,
            profiles: Vec::new(),
            change_sets: Vec::new(),
        }
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = order.into();
        self
    }

    pub fn profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    pub fn change_set(mut self, change_set: ChangeSet) -> Self {
        self.change_sets.push(change_set);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Change sets of this log that apply under `filter`, in run order.
    ///
    /// Duplicate ids are checked before filtering, so a clash hidden behind
    /// an inactive profile is still reported.
    fn resolve(&self, filter: &ProfileFilter) -> Result<Vec<&ChangeSet>> {
        let mut seen = HashSet::new();
        for change_set in &self.change_sets {
            if !seen.insert(change_set.id.as_str()) {
                return Err(MigrationError::DuplicateChangeId(change_set.id.clone()));
            }
        }

        let mut active: Vec<&ChangeSet> = self
            .change_sets
            .iter()
            .filter(|change_set| filter.matches(&change_set.profiles))
            .collect();
        active.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        Ok(active)
    }
}

/// Registry of change logs for one migrator.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    filter: ProfileFilter,
    change_logs: Vec<ChangeLog>,
}

impl Discovery {
    pub fn new(filter: ProfileFilter) -> Self {
        Self {
            filter,
            change_logs: Vec::new(),
        }
    }

    pub fn register(&mut self, change_log: ChangeLog) -> &mut Self {
        self.change_logs.push(change_log);
        self
    }

    pub fn with_change_log(mut self, change_log: ChangeLog) -> Self {
        self.register(change_log);
        self
    }

    pub fn filter(&self) -> &ProfileFilter {
        &self.filter
    }

    /// The descriptors to run under this registry's own profiles.
    pub fn resolve(&self) -> Result<Vec<ChangeDescriptor>> {
        self.resolve_with(&self.filter)
    }

    /// The descriptors to run under `filter`, in run order.
    ///
    /// Fails with `DuplicateChangeId` when an id repeats, within a log or
    /// across active logs, and with `ReservedChangeId` for the lock id.
    pub fn resolve_with(&self, filter: &ProfileFilter) -> Result<Vec<ChangeDescriptor>> {
        let mut change_logs: Vec<&ChangeLog> = self
            .change_logs
            .iter()
            .filter(|change_log| filter.matches(&change_log.profiles))
            .collect();
        change_logs.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));

        let mut seen = HashSet::new();
        let mut descriptors = Vec::new();
        for change_log in change_logs {
            for change_set in change_log.resolve(filter)? {
                if change_set.id == LOCK_ID {
                    return Err(MigrationError::ReservedChangeId(change_set.id.clone()));
                }
                if !seen.insert(change_set.id.clone()) {
                    return Err(MigrationError::DuplicateChangeId(change_set.id.clone()));
                }
                descriptors.push(change_set.to_descriptor(&change_log.name));
            }
        }
        Ok(descriptors)
    }
}
