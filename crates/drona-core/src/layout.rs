//! Field Index Allocator.
//!
//! Indices are assigned depth-first in document order. A leaf takes one
//! slot; a container takes one placeholder slot followed by the slots of
//! its children, so its span is `1 + sum(child spans)`. Allocation never
//! looks at visibility: a hidden subtree keeps its whole range.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::condition::is_visible;
use crate::schema::{Schema, SchemaEntry, SchemaNode};
use crate::store::FormValues;
use crate::types::FieldIndex;

/// Number of index slots a node consumes.
pub fn span_of(node: &SchemaNode) -> usize {
    if node.kind.is_container() {
        1 + node.children().iter().map(|c| span_of(&c.node)).sum::<usize>()
    } else {
        1
    }
}

/// Allocation result for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub index: FieldIndex,
    pub span: usize,
    pub children: Vec<Slot>,
}

/// Allocate `entries` starting at `start`.
pub fn allocate(entries: &[SchemaEntry], start: FieldIndex) -> Vec<Slot> {
    let mut next = start;
    entries
        .iter()
        .map(|entry| {
            let index = next;
            let children = if entry.node.kind.is_container() {
                allocate(entry.node.children(), index + 1)
            } else {
                Vec::new()
            };
            let span = 1 + children.iter().map(|c| c.span).sum::<usize>();
            next += span;
            Slot {
                index,
                span,
                children,
            }
        })
        .collect()
}

/// One allocated node in pre-order.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    pub index: FieldIndex,
    pub span: usize,
    pub key: String,
    pub depth: usize,
    pub parent: Option<FieldIndex>,
    pub node: SchemaNode,
}

impl FieldRef {
    pub fn is_leaf(&self) -> bool {
        !self.node.kind.is_container()
    }

    pub fn name(&self) -> Option<&str> {
        self.node.name.as_deref()
    }
}

/// Flattened, indexed view of a schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormLayout {
    start: FieldIndex,
    entries: Vec<SchemaEntry>,
    fields: Vec<FieldRef>,
}

impl FormLayout {
    pub fn new(schema: &Schema) -> Self {
        Self::from_entries(&schema.entries, 0)
    }

    pub fn from_entries(entries: &[SchemaEntry], start: FieldIndex) -> Self {
        let slots = allocate(entries, start);
        let mut fields = Vec::new();
        collect_fields(entries, &slots, 0, None, &mut fields);
        Self {
            start,
            entries: entries.to_vec(),
            fields,
        }
    }

    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    pub fn start(&self) -> FieldIndex {
        self.start
    }

    /// Every node, containers included, in pre-order.
    pub fn fields(&self) -> &[FieldRef] {
        &self.fields
    }

    pub fn field(&self, index: FieldIndex) -> Option<&FieldRef> {
        self.fields
            .binary_search_by_key(&index, |f| f.index)
            .ok()
            .map(|position| &self.fields[position])
    }

    pub fn leaves(&self) -> impl Iterator<Item = &FieldRef> {
        self.fields.iter().filter(|f| f.is_leaf())
    }

    pub fn total_span(&self) -> usize {
        self.entries.iter().map(|e| span_of(&e.node)).sum()
    }

    pub fn span(&self, index: FieldIndex) -> Option<usize> {
        self.field(index).map(|f| f.span)
    }

    /// First leaf bound to `name`.
    pub fn index_of(&self, name: &str) -> Option<FieldIndex> {
        self.leaves()
            .find(|f| f.name() == Some(name))
            .map(|f| f.index)
    }

    pub fn leaf_indices(&self) -> Vec<FieldIndex> {
        self.leaves().map(|f| f.index).collect()
    }

    /// Leaves whose own condition and every ancestor's condition hold.
    pub fn visible_leaf_indices(&self, values: &FormValues) -> Vec<FieldIndex> {
        let mut out = Vec::new();
        collect_visible(&self.entries, self.start, values, &mut out);
        out
    }

    pub fn name_bindings(&self) -> HashMap<FieldIndex, String> {
        self.leaves()
            .filter_map(|f| f.name().map(|name| (f.index, name.to_string())))
            .collect()
    }

    /// Initial values declared in the schema, keyed by leaf index.
    pub fn initial_values(&self) -> BTreeMap<FieldIndex, Value> {
        self.leaves()
            .filter_map(|f| f.node.value.clone().map(|value| (f.index, value)))
            .collect()
    }

    /// Rebuild the schema tree with `values` written into each leaf's
    /// `value`. Leaves absent from `values` keep their declared value.
    pub fn with_values(&self, values: &BTreeMap<FieldIndex, Value>) -> Vec<SchemaEntry> {
        let slots = allocate(&self.entries, self.start);
        rebuild(&self.entries, &slots, values)
    }
}

fn collect_fields(
    entries: &[SchemaEntry],
    slots: &[Slot],
    depth: usize,
    parent: Option<FieldIndex>,
    out: &mut Vec<FieldRef>,
) {
    for (entry, slot) in entries.iter().zip(slots) {
        let mut node = entry.node.clone();
        node.elements = None;
        out.push(FieldRef {
            index: slot.index,
            span: slot.span,
            key: entry.key.clone(),
            depth,
            parent,
            node,
        });
        if entry.node.kind.is_container() {
            collect_fields(
                entry.node.children(),
                &slot.children,
                depth + 1,
                Some(slot.index),
                out,
            );
        }
    }
}

fn collect_visible(
    entries: &[SchemaEntry],
    start: FieldIndex,
    values: &FormValues,
    out: &mut Vec<FieldIndex>,
) {
    let mut index = start;
    for entry in entries {
        let span = span_of(&entry.node);
        if is_visible(entry.node.condition.as_deref(), values) {
            if entry.node.kind.is_container() {
                collect_visible(entry.node.children(), index + 1, values, out);
            } else {
                out.push(index);
            }
        }
        index += span;
    }
}

fn rebuild(
    entries: &[SchemaEntry],
    slots: &[Slot],
    values: &BTreeMap<FieldIndex, Value>,
) -> Vec<SchemaEntry> {
    entries
        .iter()
        .zip(slots)
        .map(|(entry, slot)| {
            let mut node = entry.node.clone();
            if node.kind.is_container() {
                let children = rebuild(entry.node.children(), &slot.children, values);
                node.elements = Some(crate::schema::SchemaEntries(children));
            } else if let Some(value) = values.get(&slot.index) {
                node.value = Some(value.clone());
            }
            SchemaEntry {
                key: entry.key.clone(),
                node,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldValueStore;
    use serde_json::json;

    fn nested() -> Schema {
        Schema::from_value(json!({
            "job": {"type": "text", "name": "job"},
            "outer": {"type": "collapsibleRowContainer", "title": "Resources", "elements": {
                "cores": {"type": "number", "name": "cores"},
                "inner": {"type": "container", "elements": {
                    "gpu": {"type": "checkbox", "name": "gpu"},
                    "kind": {"type": "select", "name": "kind", "condition": "gpu"}
                }},
                "mem": {"type": "text", "name": "mem"}
            }},
            "after": {"type": "text", "name": "after"}
        }))
        .expect("schema")
    }

    #[test]
    fn test_allocate_nested_indices_are_contiguous() {
        let slots = allocate(&nested().entries, 0);
        let starts: Vec<usize> = slots.iter().map(|s| s.index).collect();
        assert_eq!(starts, vec![0, 1, 7]);
        assert_eq!(slots[1].span, 6);
        let inner = &slots[1].children[1];
        assert_eq!(inner.index, 3);
        let inner_children: Vec<usize> = inner.children.iter().map(|s| s.index).collect();
        assert_eq!(inner_children, vec![4, 5]);
        assert_eq!(slots[1].children[2].index, 6);
    }

    #[test]
    fn test_allocate_honours_start() {
        let slots = allocate(&nested().entries, 10);
        assert_eq!(slots[0].index, 10);
        assert_eq!(slots[2].index, 17);
    }

    #[test]
    fn test_layout_queries() {
        let layout = FormLayout::new(&nested());
        assert_eq!(layout.total_span(), 8);
        assert_eq!(layout.leaf_indices(), vec![0, 2, 4, 5, 6, 7]);
        assert_eq!(layout.index_of("kind"), Some(5));
        assert_eq!(layout.index_of("outer"), None);
        assert_eq!(layout.span(1), Some(6));
        assert_eq!(layout.field(4).map(|f| f.parent), Some(Some(3)));
        assert_eq!(layout.field(4).map(|f| f.depth), Some(2));
    }

    #[test]
    fn test_hidden_subtree_keeps_following_indices() {
        let layout = FormLayout::new(&nested());
        let store = FieldValueStore::new();
        store.bind_layout(&layout);
        assert_eq!(
            layout.visible_leaf_indices(&store.snapshot()),
            vec![0, 2, 4, 6, 7]
        );
        store.update_named("gpu", json!(true));
        assert_eq!(
            layout.visible_leaf_indices(&store.snapshot()),
            vec![0, 2, 4, 5, 6, 7]
        );
    }

    #[test]
    fn test_with_values_roundtrips_through_a_fresh_layout() {
        let layout = FormLayout::new(&nested());
        let mut values = BTreeMap::new();
        values.insert(0, json!("relax"));
        values.insert(5, json!({"value": "a100", "label": "A100"}));
        values.insert(7, json!("x"));
        let rebuilt = FormLayout::new(&Schema::new(layout.with_values(&values)));
        assert_eq!(rebuilt.initial_values(), values);
    }
}
