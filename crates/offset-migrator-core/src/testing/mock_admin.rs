//! In-memory admin interface for engine tests.
//!
//! Holds committed offsets per group, applies writes to that state, and
//! records every call so tests can assert on exactly what reached the
//! "broker".

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::admin::{GroupOffsets, OffsetAdmin};
use crate::error::{AdminError, AdminResult};

/// A recorded `write_committed_offsets` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    /// Target group.
    pub group: String,
    /// Offsets sent in the call.
    pub offsets: GroupOffsets,
}

#[derive(Debug, Default)]
struct State {
    groups: BTreeMap<String, GroupOffsets>,
    writes: Vec<WriteCall>,
    fetch_stability: Vec<bool>,
    failing_writes: BTreeSet<String>,
    fail_listing: bool,
    fail_fetch: bool,
}

/// In-memory [`OffsetAdmin`].
#[derive(Debug, Default)]
pub struct MockAdmin {
    state: Mutex<State>,
}

impl MockAdmin {
    /// Create an admin with no groups.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a group with no committed offsets.
    pub fn add_group(&self, group: &str) {
        self.state().groups.entry(group.to_string()).or_default();
    }

    /// Replace the committed offsets of `group`, creating it if needed.
    pub fn set_offsets(&self, group: &str, offsets: GroupOffsets) {
        self.state().groups.insert(group.to_string(), offsets);
    }

    /// Committed offsets of `group`, if it exists.
    #[must_use]
    pub fn committed(&self, group: &str) -> Option<GroupOffsets> {
        self.state().groups.get(group).cloned()
    }

    /// Every write call so far, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<WriteCall> {
        self.state().writes.clone()
    }

    /// Write calls made for `group`.
    #[must_use]
    pub fn writes_for(&self, group: &str) -> Vec<WriteCall> {
        self.state()
            .writes
            .iter()
            .filter(|w| w.group == group)
            .cloned()
            .collect()
    }

    /// The `require_stable` flag of every fetch so far.
    #[must_use]
    pub fn fetch_stability(&self) -> Vec<bool> {
        self.state().fetch_stability.clone()
    }

    /// Make writes for `group` fail until [`MockAdmin::clear_failures`].
    pub fn fail_writes_for(&self, group: &str) {
        self.state().failing_writes.insert(group.to_string());
    }

    /// Make `list_consumer_groups` fail.
    pub fn fail_listing(&self) {
        self.state().fail_listing = true;
    }

    /// Make `list_committed_offsets` fail.
    pub fn fail_fetch(&self) {
        self.state().fail_fetch = true;
    }

    /// Remove every injected failure.
    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing_writes.clear();
        state.fail_listing = false;
        state.fail_fetch = false;
    }
}

#[async_trait]
impl OffsetAdmin for MockAdmin {
    async fn list_consumer_groups(&self) -> AdminResult<Vec<String>> {
        let state = self.state();
        if state.fail_listing {
            return Err(AdminError::Other("injected listing failure".to_string()));
        }
        Ok(state.groups.keys().cloned().collect())
    }

    async fn list_committed_offsets(
        &self,
        groups: &BTreeSet<String>,
        require_stable: bool,
    ) -> AdminResult<HashMap<String, GroupOffsets>> {
        let mut state = self.state();
        state.fetch_stability.push(require_stable);
        if state.fail_fetch {
            return Err(AdminError::Other("injected fetch failure".to_string()));
        }
        Ok(groups
            .iter()
            .filter_map(|g| {
                state
                    .groups
                    .get(g)
                    .filter(|offsets| !offsets.is_empty())
                    .map(|offsets| (g.clone(), offsets.clone()))
            })
            .collect())
    }

    async fn write_committed_offsets(&self, group: &str, offsets: &GroupOffsets) -> AdminResult<()> {
        let mut state = self.state();
        state.writes.push(WriteCall {
            group: group.to_string(),
            offsets: offsets.clone(),
        });
        if state.failing_writes.contains(group) {
            return Err(AdminError::Kafka {
                api: "OffsetCommit",
                code: 25,
                context: format!("group {group}"),
            });
        }
        state
            .groups
            .entry(group.to_string())
            .or_default()
            .extend(offsets.iter().map(|(tp, o)| (tp.clone(), *o)));
        Ok(())
    }
}
