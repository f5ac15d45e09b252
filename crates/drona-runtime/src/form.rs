//! A loaded form: layout, value bindings and the mounted dynamic fields.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use tracing::{debug, info};

use drona_core::layout::FormLayout;
use drona_core::render::{self, LiveFieldSource, LiveView, RenderedNode};
use drona_core::schema::{Schema, SchemaNode};
use drona_core::store::FormValues;
use drona_core::types::FieldIndex;

use crate::controller::{ControllerContext, DynamicFieldController};

/// Keeps controllers mounted for exactly the visible dynamic leaves.
pub struct FormSession {
    context: ControllerContext,
    schema: Option<Schema>,
    layout: FormLayout,
    controllers: BTreeMap<FieldIndex, DynamicFieldController>,
}

impl FormSession {
    pub fn new(context: ControllerContext) -> Self {
        Self {
            context,
            schema: None,
            layout: FormLayout::default(),
            controllers: BTreeMap::new(),
        }
    }

    pub fn context(&self) -> &ControllerContext {
        &self.context
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn layout(&self) -> &FormLayout {
        &self.layout
    }

    /// Install a schema and reset the store to its declared values.
    /// Returns false when the schema is unchanged.
    pub fn load_schema(&mut self, schema: Schema) -> bool {
        if self.schema.as_ref() == Some(&schema) {
            return false;
        }
        self.unmount_all();
        self.layout = FormLayout::new(&schema);
        self.context.store.bind_layout(&self.layout);
        info!(
            fields = self.layout.fields().len(),
            span = self.layout.total_span(),
            "form schema installed"
        );
        self.schema = Some(schema);
        self.sync();
        true
    }

    /// Mount controllers for visible dynamic leaves; unmount the rest.
    pub fn sync(&mut self) {
        let values = self.context.store.snapshot();
        let visible: BTreeSet<FieldIndex> =
            self.layout.visible_leaf_indices(&values).into_iter().collect();

        self.controllers.retain(|index, controller| {
            let keep = visible.contains(index);
            if !keep {
                controller.unmount();
            }
            keep
        });

        for field in self.layout.leaves() {
            if !field.node.kind.is_dynamic()
                || !visible.contains(&field.index)
                || self.controllers.contains_key(&field.index)
            {
                continue;
            }
            if let Some(controller) = DynamicFieldController::spawn(
                field.index,
                &field.node,
                true,
                self.context.clone(),
            ) {
                self.controllers.insert(field.index, controller);
            }
        }
    }

    pub fn render(&mut self) -> Vec<RenderedNode> {
        self.sync();
        let values = self.context.store.snapshot();
        let entries = render::visible_entries(self.layout.entries(), &values);
        render::render(&entries, self.layout.start(), &values, &*self)
    }

    /// The change handler shared by every field. Dynamic fields go through
    /// their controller so stale choices get pruned.
    pub fn update_value(&mut self, index: FieldIndex, value: Value) {
        match self.controllers.get(&index) {
            Some(controller) => controller.select(value),
            None => {
                self.context.store.update_value(index, value);
            }
        }
        self.sync();
    }

    /// Write values by field name; names without a bound field are kept in
    /// the store for `$name` lookups.
    pub fn set_values_by_name(&mut self, values: &Map<String, Value>) {
        for (name, value) in values {
            if self.layout.index_of(name).is_none() {
                debug!(field = %name, "no field bound to stored value");
            }
            self.context.store.update_named(name, value.clone());
        }
        self.sync();
    }

    pub fn values(&self) -> FormValues {
        self.context.store.snapshot()
    }

    pub fn controller(&self, index: FieldIndex) -> Option<&DynamicFieldController> {
        self.controllers.get(&index)
    }

    pub fn controller_by_name(&self, name: &str) -> Option<&DynamicFieldController> {
        self.layout
            .index_of(name)
            .and_then(|index| self.controllers.get(&index))
    }

    pub fn mounted(&self) -> Vec<FieldIndex> {
        self.controllers.keys().copied().collect()
    }

    /// Drop the schema, every controller and every value.
    pub fn clear(&mut self) {
        self.unmount_all();
        self.schema = None;
        self.layout = FormLayout::default();
        self.context.store.clear();
    }

    fn unmount_all(&mut self) {
        for controller in self.controllers.values() {
            controller.unmount();
        }
        self.controllers.clear();
    }
}

impl LiveFieldSource for FormSession {
    fn live_view(&self, index: FieldIndex, _node: &SchemaNode) -> Option<LiveView> {
        self.controllers.get(&index).map(DynamicFieldController::live_view)
    }
}

impl Drop for FormSession {
    fn drop(&mut self) {
        self.unmount_all();
    }
}
