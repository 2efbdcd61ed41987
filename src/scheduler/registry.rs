//! Registered actions and their specs.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::action::{ActionId, PeriodicAction};
use crate::condition::Condition;
use crate::spec::{self, UpdateSpec};

/// An action together with its ordered specs.
#[derive(Clone)]
pub(crate) struct Registration {
    pub action: Arc<dyn PeriodicAction>,
    pub specs: Vec<UpdateSpec>,
}

impl Registration {
    pub fn matching_spec(&self, active: &HashSet<Condition>) -> Option<&UpdateSpec> {
        spec::first_matching(&self.specs, active)
    }
}

/// Action id to registration. Ordered so passes run in a stable order.
#[derive(Default)]
pub(crate) struct ActionRegistry {
    actions: BTreeMap<ActionId, Registration>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns true if an action with this id existed.
    pub fn register(&mut self, action: Arc<dyn PeriodicAction>, specs: Vec<UpdateSpec>) -> bool {
        let id = action.id().to_string();
        self.actions.insert(id, Registration { action, specs }).is_some()
    }

    pub fn unregister(&mut self, id: &str) -> bool {
        self.actions.remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&Registration> {
        self.actions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.actions.contains_key(id)
    }

    pub fn ids(&self) -> Vec<ActionId> {
        self.actions.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ActionId, &Registration)> {
        self.actions.iter()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Union of the conditions referenced by any spec.
    pub fn all_conditions(&self) -> HashSet<Condition> {
        self.actions
            .values()
            .flat_map(|registration| registration.specs.iter())
            .flat_map(|spec| spec.conditions().iter().cloned())
            .collect()
    }

    /// Referenced conditions that are true right now.
    pub fn active_conditions(&self) -> HashSet<Condition> {
        self.all_conditions().into_iter().filter(Condition::is_active).collect()
    }
}
