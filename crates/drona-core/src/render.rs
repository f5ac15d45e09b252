//! Schema Tree Renderer.
//!
//! Produces a headless view tree. Invisible nodes are skipped but still
//! advance the running index by their full span; containers recurse with
//! `start = own index + 1` and emit exactly one wrapper; unknown kinds
//! become an isolated diagnostic.

use serde::Serialize;
use serde_json::Value;

use crate::condition::is_visible;
use crate::error::ErrorReport;
use crate::layout::span_of;
use crate::schema::{FieldKind, SchemaEntry, SchemaNode};
use crate::store::{FieldValueStore, FormValues};
use crate::types::{FieldIndex, OptionItem};

/// A node paired with its visibility for one render pass.
#[derive(Debug, Clone, Copy)]
pub struct VisibleEntry<'a> {
    pub key: &'a str,
    pub node: &'a SchemaNode,
    pub visible: bool,
}

pub fn visible_entries<'a>(entries: &'a [SchemaEntry], values: &FormValues) -> Vec<VisibleEntry<'a>> {
    entries
        .iter()
        .map(|entry| VisibleEntry {
            key: &entry.key,
            node: &entry.node,
            visible: is_visible(entry.node.condition.as_deref(), values),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LivePhase {
    #[default]
    Idle,
    Loading,
    Evaluated,
}

/// Snapshot of a dynamic field's controller, attached to its rendered field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveView {
    pub phase: LivePhase,
    pub options: Vec<OptionItem>,
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LiveView {
    pub fn is_loading(&self) -> bool {
        self.phase == LivePhase::Loading
    }

    pub fn is_evaluated(&self) -> bool {
        self.phase == LivePhase::Evaluated
    }
}

/// Supplies controller state for dynamic fields during a render pass.
pub trait LiveFieldSource {
    fn live_view(&self, index: FieldIndex, node: &SchemaNode) -> Option<LiveView>;
}

/// Render with no controllers mounted.
pub struct NoLiveFields;

impl LiveFieldSource for NoLiveFields {
    fn live_view(&self, _index: FieldIndex, _node: &SchemaNode) -> Option<LiveView> {
        None
    }
}

/// The change handler of a rendered field: writes go to its own index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldBinding {
    pub index: FieldIndex,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl FieldBinding {
    pub fn apply(&self, store: &FieldValueStore, value: Value) -> bool {
        store.update_value(self.index, value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedField {
    pub key: String,
    pub kind: FieldKind,
    pub binding: FieldBinding,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live: Option<LiveView>,
    #[serde(skip)]
    pub node: SchemaNode,
}

impl RenderedField {
    pub fn index(&self) -> FieldIndex {
        self.binding.index
    }

    pub fn name(&self) -> Option<&str> {
        self.binding.name.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Row,
    Column,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collapsible {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub collapsed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum RenderedNode {
    Field(RenderedField),
    Container {
        key: String,
        index: FieldIndex,
        direction: Direction,
        #[serde(skip_serializing_if = "Option::is_none")]
        collapsible: Option<Collapsible>,
        children: Vec<RenderedNode>,
    },
    Diagnostic {
        key: String,
        index: FieldIndex,
        type_name: String,
        message: String,
    },
}

impl RenderedNode {
    pub fn index(&self) -> FieldIndex {
        match self {
            Self::Field(field) => field.index(),
            Self::Container { index, .. } | Self::Diagnostic { index, .. } => *index,
        }
    }
}

/// Render `entries` with the first one at `start`.
pub fn render(
    entries: &[VisibleEntry<'_>],
    start: FieldIndex,
    values: &FormValues,
    live: &dyn LiveFieldSource,
) -> Vec<RenderedNode> {
    let mut out = Vec::new();
    let mut index = start;
    for entry in entries {
        let span = span_of(entry.node);
        if entry.visible {
            out.push(render_one(entry, index, values, live));
        }
        index += span;
    }
    out
}

fn render_one(
    entry: &VisibleEntry<'_>,
    index: FieldIndex,
    values: &FormValues,
    live: &dyn LiveFieldSource,
) -> RenderedNode {
    let node = entry.node;
    if node.kind.is_container() {
        let children = visible_entries(node.children(), values);
        return RenderedNode::Container {
            key: entry.key.to_string(),
            index,
            direction: direction_of(&node.kind),
            collapsible: collapsible_of(node),
            children: render(&children, index + 1, values, live),
        };
    }
    if !node.kind.is_known() {
        return RenderedNode::Diagnostic {
            key: entry.key.to_string(),
            index,
            type_name: node.kind.as_str().to_string(),
            message: format!("Unknown field type: {}", node.kind.as_str()),
        };
    }

    let live_view = if node.kind.is_dynamic() {
        live.live_view(index, node)
    } else {
        None
    };
    // A mounted controller owns the options, empty or not.
    let options = match &live_view {
        Some(view) => view.options.clone(),
        None => node.options.clone().unwrap_or_default(),
    };
    let mut leaf = node.clone();
    leaf.elements = None;

    RenderedNode::Field(RenderedField {
        key: entry.key.to_string(),
        kind: node.kind.clone(),
        binding: FieldBinding {
            index,
            name: node.name.clone(),
        },
        label: node.label.clone(),
        value: values.get(index).cloned().or_else(|| node.value.clone()),
        options,
        live: live_view,
        node: leaf,
    })
}

fn direction_of(kind: &FieldKind) -> Direction {
    match kind {
        FieldKind::RowContainer | FieldKind::CollapsibleRowContainer => Direction::Row,
        _ => Direction::Column,
    }
}

fn collapsible_of(node: &SchemaNode) -> Option<Collapsible> {
    match node.kind {
        FieldKind::CollapsibleRowContainer | FieldKind::CollapsibleColContainer => {
            Some(Collapsible {
                title: node.title.clone().or_else(|| node.label.clone()),
                collapsed: node
                    .extra_bool("collapsed")
                    .or_else(|| node.extra_bool("defaultCollapsed"))
                    .unwrap_or(false),
            })
        }
        _ => None,
    }
}

/// Every rendered field in document order, descending into containers.
pub fn rendered_fields(nodes: &[RenderedNode]) -> Vec<&RenderedField> {
    let mut out = Vec::new();
    for node in nodes {
        match node {
            RenderedNode::Field(field) => out.push(field),
            RenderedNode::Container { children, .. } => out.extend(rendered_fields(children)),
            RenderedNode::Diagnostic { .. } => {}
        }
    }
    out
}
