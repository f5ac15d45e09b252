//! Field Value Store - the observable FormValues mapping.
//!
//! Values are addressed by [`FieldIndex`]; a parallel name map serves
//! `$name` lookups. Every mutation is a single-key replacement applied
//! through `watch::Sender::send_if_modified`, so readers only ever see
//! committed snapshots and unchanged writes wake nobody.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tokio::sync::watch;

use crate::layout::FormLayout;
use crate::types::{Environment, FieldIndex};

/// Snapshot of every field value plus the active environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormValues {
    by_index: BTreeMap<FieldIndex, Value>,
    by_name: HashMap<String, Value>,
    names: HashMap<FieldIndex, String>,
    environment: Option<Environment>,
    revision: u64,
}

impl FormValues {
    pub fn get(&self, index: FieldIndex) -> Option<&Value> {
        self.by_index.get(&index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.by_name.get(name)
    }

    pub fn environment(&self) -> Option<&Environment> {
        self.environment.as_ref()
    }

    /// Bumped on every committed change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldIndex, &Value)> {
        self.by_index.iter().map(|(index, value)| (*index, value))
    }

    pub fn by_index(&self) -> &BTreeMap<FieldIndex, Value> {
        &self.by_index
    }

    pub fn by_name(&self) -> &HashMap<String, Value> {
        &self.by_name
    }

    pub fn name_of(&self, index: FieldIndex) -> Option<&str> {
        self.names.get(&index).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty() && self.by_name.is_empty()
    }
}

/// Shared owner of [`FormValues`]; clones of the receiver observe changes.
pub struct FieldValueStore {
    tx: watch::Sender<FormValues>,
}

impl Default for FieldValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldValueStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(FormValues::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<FormValues> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> FormValues {
        self.tx.borrow().clone()
    }

    pub fn get(&self, index: FieldIndex) -> Option<Value> {
        self.tx.borrow().get(index).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Value> {
        self.tx.borrow().get_by_name(name).cloned()
    }

    /// The single entry point for index-addressed edits.
    pub fn update_value(&self, index: FieldIndex, value: Value) -> bool {
        self.tx.send_if_modified(|values| {
            if values.by_index.get(&index) == Some(&value) {
                return false;
            }
            if let Some(name) = values.names.get(&index).cloned() {
                values.by_name.insert(name, value.clone());
            }
            values.by_index.insert(index, value);
            values.revision += 1;
            true
        })
    }

    /// Edit by field name; updates every index bound to that name.
    pub fn update_named(&self, name: &str, value: Value) -> bool {
        self.tx.send_if_modified(|values| {
            let unchanged = values.by_name.get(name) == Some(&value);
            let indices: Vec<FieldIndex> = values
                .names
                .iter()
                .filter(|(_, bound)| bound.as_str() == name)
                .map(|(index, _)| *index)
                .collect();
            if unchanged
                && indices
                    .iter()
                    .all(|index| values.by_index.get(index) == Some(&value))
            {
                return false;
            }
            for index in indices {
                values.by_index.insert(index, value.clone());
            }
            values.by_name.insert(name.to_string(), value);
            values.revision += 1;
            true
        })
    }

    pub fn remove_value(&self, index: FieldIndex) -> bool {
        self.tx.send_if_modified(|values| {
            if values.by_index.remove(&index).is_none() {
                return false;
            }
            if let Some(name) = values.names.get(&index) {
                values.by_name.remove(name);
            }
            values.revision += 1;
            true
        })
    }

    pub fn set_environment(&self, environment: Option<Environment>) {
        self.tx.send_if_modified(|values| {
            if values.environment == environment {
                return false;
            }
            values.environment = environment;
            values.revision += 1;
            true
        });
    }

    /// Replace all values with the layout's name bindings and initial values.
    /// The environment is kept.
    pub fn bind_layout(&self, layout: &FormLayout) {
        let names = layout.name_bindings();
        let initial = layout.initial_values();
        self.tx.send_modify(|values| {
            values.by_index.clear();
            values.by_name.clear();
            for (index, value) in initial {
                if let Some(name) = names.get(&index) {
                    values.by_name.insert(name.clone(), value.clone());
                }
                values.by_index.insert(index, value);
            }
            values.names = names;
            values.revision += 1;
        });
    }

    /// Drop every value and binding, keeping the environment.
    pub fn clear(&self) {
        self.tx.send_modify(|values| {
            values.by_index.clear();
            values.by_name.clear();
            values.names.clear();
            values.revision += 1;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use serde_json::json;

    fn layout() -> FormLayout {
        let schema = Schema::from_value(json!({
            "region": {"type": "select", "name": "region", "value": "eu"},
            "row": {"type": "rowContainer", "elements": {
                "cores": {"type": "number", "name": "cores", "value": 4},
                "notes": {"type": "text", "name": "notes"}
            }}
        }))
        .expect("schema");
        FormLayout::new(&schema)
    }

    #[test]
    fn test_bind_layout_seeds_initial_values() {
        let store = FieldValueStore::new();
        store.bind_layout(&layout());
        let values = store.snapshot();
        assert_eq!(values.get(0), Some(&json!("eu")));
        assert_eq!(values.get(2), Some(&json!(4)));
        assert_eq!(values.get(3), None);
        assert_eq!(values.get_by_name("cores"), Some(&json!(4)));
        assert_eq!(values.name_of(3), Some("notes"));
    }

    #[test]
    fn test_update_value_mirrors_to_name_and_bumps_revision() {
        let store = FieldValueStore::new();
        store.bind_layout(&layout());
        let before = store.snapshot().revision();
        assert!(store.update_value(3, json!("hello")));
        let values = store.snapshot();
        assert_eq!(values.get_by_name("notes"), Some(&json!("hello")));
        assert_eq!(values.revision(), before + 1);
    }

    #[test]
    fn test_unchanged_update_does_not_notify() {
        tokio_test::block_on(async {
            let store = FieldValueStore::new();
            store.bind_layout(&layout());
            let mut rx = store.subscribe();
            rx.borrow_and_update();
            assert!(!store.update_value(0, json!("eu")));
            assert!(!rx.has_changed().expect("sender alive"));
            assert!(store.update_value(0, json!("us")));
            assert!(rx.has_changed().expect("sender alive"));
        });
    }

    #[test]
    fn test_update_named_reaches_bound_index() {
        let store = FieldValueStore::new();
        store.bind_layout(&layout());
        assert!(store.update_named("cores", json!(16)));
        assert_eq!(store.get(2), Some(json!(16)));
        assert!(!store.update_named("cores", json!(16)));
    }

    #[test]
    fn test_update_named_without_binding_only_sets_name() {
        let store = FieldValueStore::new();
        assert!(store.update_named("computed", json!("x")));
        assert_eq!(store.get_by_name("computed"), Some(json!("x")));
        assert!(store.snapshot().by_index().is_empty());
    }

    #[test]
    fn test_environment_survives_rebinding() {
        let store = FieldValueStore::new();
        store.set_environment(Some(Environment::new("vasp", "/sw")));
        store.bind_layout(&layout());
        store.clear();
        assert_eq!(
            store.snapshot().environment(),
            Some(&Environment::new("vasp", "/sw"))
        );
    }
}
