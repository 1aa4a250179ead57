// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! In-memory dependency index between SecretTemplates and their inputs.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;

/// Namespaced identity of a tracked or tracking object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Bidirectional many-to-many map between tracking keys (SecretTemplates)
/// and tracked keys (input objects). Both directions are updated under one
/// write lock so observers never see a partial edge set.
#[derive(Default)]
pub struct Tracker {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    tracked_by: HashMap<ResourceKey, HashSet<ResourceKey>>,
    tracking: HashMap<ResourceKey, HashSet<ResourceKey>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add edges from `tracking` to every key in `tracked`. Existing edges
    /// to other keys are left in place.
    pub fn track(&self, tracking: &ResourceKey, tracked: &[ResourceKey]) {
        if tracked.is_empty() {
            return;
        }
        let mut state = self.state.write().expect("tracker lock poisoned");
        for key in tracked {
            state
                .tracking
                .entry(tracking.clone())
                .or_default()
                .insert(key.clone());
            state
                .tracked_by
                .entry(key.clone())
                .or_default()
                .insert(tracking.clone());
        }
    }

    /// Remove every outgoing edge from `tracking`.
    pub fn untrack_all(&self, tracking: &ResourceKey) {
        let mut state = self.state.write().expect("tracker lock poisoned");
        let Some(tracked) = state.tracking.remove(tracking) else {
            return;
        };
        for key in tracked {
            if let Some(set) = state.tracked_by.get_mut(&key) {
                set.remove(tracking);
                if set.is_empty() {
                    state.tracked_by.remove(&key);
                }
            }
        }
    }

    /// Reverse lookup: every tracking key whose last reconcile observed
    /// `tracked` as an input.
    pub fn get_tracking(&self, tracked: &ResourceKey) -> Vec<ResourceKey> {
        let state = self.state.read().expect("tracker lock poisoned");
        state
            .tracked_by
            .get(tracked)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}
