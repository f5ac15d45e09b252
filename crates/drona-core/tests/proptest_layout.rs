use std::collections::{BTreeMap, BTreeSet};

use drona_core::prelude::*;
use proptest::prelude::*;
use proptest::test_runner::Config;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
enum Shape {
    Leaf(Option<u8>),
    Container(u8, Option<u8>, Vec<Shape>),
}

fn shape() -> impl Strategy<Value = Shape> {
    let leaf = proptest::option::of(0_u8..12).prop_map(Shape::Leaf);
    leaf.prop_recursive(4, 48, 5, |inner| {
        (
            0_u8..4,
            proptest::option::of(0_u8..12),
            prop::collection::vec(inner, 0..5),
        )
            .prop_map(|(kind, cond, children)| Shape::Container(kind, cond, children))
    })
}

const CONTAINERS: [FieldKind; 4] = [
    FieldKind::RowContainer,
    FieldKind::Container,
    FieldKind::CollapsibleRowContainer,
    FieldKind::CollapsibleColContainer,
];

fn build(shapes: &[Shape], counter: &mut usize) -> Vec<SchemaEntry> {
    shapes
        .iter()
        .map(|shape| {
            *counter += 1;
            let key = format!("f{counter}");
            let (node, condition) = match shape {
                Shape::Leaf(cond) => (SchemaNode::new(FieldKind::Text).with_name(&key), cond),
                Shape::Container(kind, cond, children) => (
                    SchemaNode::new(CONTAINERS[*kind as usize].clone())
                        .with_elements(build(children, counter)),
                    cond,
                ),
            };
            let node = match condition {
                Some(target) => node.with_condition(format!("f{target}")),
                None => node,
            };
            SchemaEntry::new(key, node)
        })
        .collect()
}

fn schema_from(shapes: &[Shape]) -> Schema {
    let mut counter = 0;
    Schema::new(build(shapes, &mut counter))
}

proptest! {
    #![proptest_config(Config::with_cases(128))]
    #[test]
    fn visible_leaf_indices_are_subset_of_all_visible_assignment(
        shapes in prop::collection::vec(shape(), 1..6),
        truthy in prop::collection::vec(any::<bool>(), 64)
    ) {
        let schema = schema_from(&shapes);
        let layout = FormLayout::new(&schema);
        let store = FieldValueStore::new();
        store.bind_layout(&layout);
        for (position, leaf) in layout.leaf_indices().into_iter().enumerate() {
            store.update_value(leaf, json!(truthy[position % truthy.len()]));
        }
        let values = store.snapshot();

        let all: BTreeSet<FieldIndex> = layout.leaf_indices().into_iter().collect();
        let visible: BTreeSet<FieldIndex> =
            layout.visible_leaf_indices(&values).into_iter().collect();
        prop_assert!(visible.is_subset(&all));

        let tree = render(&visible_entries(&schema.entries, &values), 0, &values, &NoLiveFields);
        let rendered: BTreeSet<FieldIndex> =
            rendered_fields(&tree).iter().map(|f| f.index()).collect();
        prop_assert_eq!(rendered, visible);
    }

    #[test]
    fn flatten_then_reconstruct_roundtrips_values(
        shapes in prop::collection::vec(shape(), 1..6),
        seeds in prop::collection::vec(any::<i32>(), 64)
    ) {
        let layout = FormLayout::new(&schema_from(&shapes));
        let values: BTreeMap<FieldIndex, Value> = layout
            .leaf_indices()
            .into_iter()
            .enumerate()
            .map(|(position, index)| (index, json!(seeds[position % seeds.len()])))
            .collect();

        let rebuilt = FormLayout::new(&Schema::new(layout.with_values(&values)));
        prop_assert_eq!(rebuilt.leaf_indices(), layout.leaf_indices());
        prop_assert_eq!(rebuilt.initial_values(), values);
    }
}
