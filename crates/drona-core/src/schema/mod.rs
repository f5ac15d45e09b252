//! Schema model: the JSON description of a form's fields and layout.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::SchemaError;
use crate::params::RetrieverParams;
use crate::types::OptionItem;

/// The fixed field-type vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldKind {
    RowContainer,
    Container,
    CollapsibleRowContainer,
    CollapsibleColContainer,
    Text,
    TextArea,
    Number,
    Checkbox,
    Select,
    RadioGroup,
    CheckboxGroup,
    Picker,
    Uploader,
    Time,
    Module,
    Unit,
    StaticText,
    JobNameLocation,
    DynamicSelect,
    DynamicRadioGroup,
    DynamicCheckboxGroup,
    AutocompleteSelect,
    Hidden,
    DynamicViewer,
    /// Tag outside the vocabulary; rendered as a diagnostic placeholder.
    Unknown(String),
}

impl FieldKind {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "rowContainer" => Self::RowContainer,
            "container" => Self::Container,
            "collapsibleRowContainer" => Self::CollapsibleRowContainer,
            "collapsibleColContainer" => Self::CollapsibleColContainer,
            "text" => Self::Text,
            "textarea" => Self::TextArea,
            "number" => Self::Number,
            "checkbox" => Self::Checkbox,
            "select" => Self::Select,
            "radioGroup" => Self::RadioGroup,
            "checkboxGroup" => Self::CheckboxGroup,
            "picker" => Self::Picker,
            "uploader" => Self::Uploader,
            "time" => Self::Time,
            "module" => Self::Module,
            "unit" => Self::Unit,
            "staticText" => Self::StaticText,
            "jobNameLocation" => Self::JobNameLocation,
            "dynamicSelect" => Self::DynamicSelect,
            "dynamicRadioGroup" => Self::DynamicRadioGroup,
            "dynamicCheckboxGroup" => Self::DynamicCheckboxGroup,
            "autocompleteSelect" => Self::AutocompleteSelect,
            "hidden" => Self::Hidden,
            "dynamicViewer" => Self::DynamicViewer,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::RowContainer => "rowContainer",
            Self::Container => "container",
            Self::CollapsibleRowContainer => "collapsibleRowContainer",
            Self::CollapsibleColContainer => "collapsibleColContainer",
            Self::Text => "text",
            Self::TextArea => "textarea",
            Self::Number => "number",
            Self::Checkbox => "checkbox",
            Self::Select => "select",
            Self::RadioGroup => "radioGroup",
            Self::CheckboxGroup => "checkboxGroup",
            Self::Picker => "picker",
            Self::Uploader => "uploader",
            Self::Time => "time",
            Self::Module => "module",
            Self::Unit => "unit",
            Self::StaticText => "staticText",
            Self::JobNameLocation => "jobNameLocation",
            Self::DynamicSelect => "dynamicSelect",
            Self::DynamicRadioGroup => "dynamicRadioGroup",
            Self::DynamicCheckboxGroup => "dynamicCheckboxGroup",
            Self::AutocompleteSelect => "autocompleteSelect",
            Self::Hidden => "hidden",
            Self::DynamicViewer => "dynamicViewer",
            Self::Unknown(tag) => tag,
        }
    }

    /// Only these kinds carry `elements`.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Self::RowContainer
                | Self::Container
                | Self::CollapsibleRowContainer
                | Self::CollapsibleColContainer
        )
    }

    /// Kinds driven by a dynamic field controller.
    pub fn is_dynamic(&self) -> bool {
        matches!(
            self,
            Self::DynamicSelect
                | Self::DynamicRadioGroup
                | Self::DynamicCheckboxGroup
                | Self::AutocompleteSelect
                | Self::Hidden
                | Self::DynamicViewer
        )
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<String> for FieldKind {
    fn from(tag: String) -> Self {
        Self::parse(&tag)
    }
}

impl From<FieldKind> for String {
    fn from(kind: FieldKind) -> Self {
        kind.as_str().to_string()
    }
}

/// One node of the schema tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaNode {
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Initial value; scalar, array or object depending on the kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<SchemaEntries>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<OptionItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retriever: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retriever_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retriever_params: Option<RetrieverParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Seconds between periodic refetches (hidden fields).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<f64>,
    /// Kind-specific attributes not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SchemaNode {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            name: None,
            label: None,
            value: None,
            elements: None,
            condition: None,
            options: None,
            retriever: None,
            retriever_path: None,
            retriever_params: None,
            placeholder: None,
            help: None,
            title: None,
            refresh_interval: None,
            extra: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_options(mut self, options: Vec<OptionItem>) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_retriever(mut self, path: impl Into<String>) -> Self {
        self.retriever = Some(path.into());
        self
    }

    pub fn with_retriever_params(mut self, params: RetrieverParams) -> Self {
        self.retriever_params = Some(params);
        self
    }

    pub fn with_elements(mut self, elements: Vec<SchemaEntry>) -> Self {
        self.elements = Some(SchemaEntries(elements));
        self
    }

    /// `retrieverPath` wins over `retriever`; blank values count as unset.
    pub fn retriever_path(&self) -> Option<&str> {
        self.retriever_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| self.retriever.as_deref().filter(|p| !p.trim().is_empty()))
    }

    pub fn children(&self) -> &[SchemaEntry] {
        self.elements
            .as_ref()
            .map(|entries| entries.0.as_slice())
            .unwrap_or(&[])
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    pub fn extra_bool(&self, key: &str) -> Option<bool> {
        self.extra.get(key).and_then(Value::as_bool)
    }
}

/// A node together with the key it was declared under.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaEntry {
    pub key: String,
    pub node: SchemaNode,
}

impl SchemaEntry {
    pub fn new(key: impl Into<String>, node: SchemaNode) -> Self {
        Self {
            key: key.into(),
            node,
        }
    }
}

/// Ordered child list. Accepts either an object keyed by element key
/// (declaration order preserved) or an array of nodes keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaEntries(pub Vec<SchemaEntry>);

#[derive(Deserialize)]
#[serde(untagged)]
enum EntriesRepr {
    Keyed(IndexMap<String, SchemaNode>),
    Listed(Vec<SchemaNode>),
}

impl<'de> Deserialize<'de> for SchemaEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = match EntriesRepr::deserialize(deserializer)? {
            EntriesRepr::Keyed(map) => map
                .into_iter()
                .map(|(key, node)| SchemaEntry { key, node })
                .collect(),
            EntriesRepr::Listed(nodes) => nodes
                .into_iter()
                .enumerate()
                .map(|(position, node)| SchemaEntry {
                    key: node
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("element{}", position + 1)),
                    node,
                })
                .collect(),
        };
        Ok(Self(entries))
    }
}

impl Serialize for SchemaEntries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let map: IndexMap<&str, &SchemaNode> = self
            .0
            .iter()
            .map(|entry| (entry.key.as_str(), &entry.node))
            .collect();
        map.serialize(serializer)
    }
}

/// A parsed form schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub entries: Vec<SchemaEntry>,
}

impl Schema {
    pub fn new(entries: Vec<SchemaEntry>) -> Self {
        let mut schema = Self { entries };
        normalize_entries(&mut schema.entries);
        schema
    }

    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        if !value.is_object() && !value.is_array() {
            return Err(SchemaError::Invalid(
                "schema must be a JSON object or array".to_string(),
            ));
        }
        let SchemaEntries(entries) = serde_json::from_value(value)?;
        Ok(Self::new(entries))
    }

    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(SchemaEntries(self.entries.clone())).unwrap_or(Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Drops `elements` declared on leaf kinds.
fn normalize_entries(entries: &mut [SchemaEntry]) {
    for entry in entries.iter_mut() {
        if entry.node.kind.is_container() {
            if let Some(children) = entry.node.elements.as_mut() {
                normalize_entries(&mut children.0);
            }
        } else if entry.node.elements.take().is_some() {
            warn!(
                key = %entry.key,
                kind = entry.node.kind.as_str(),
                "dropping elements declared on a leaf field"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_keyed_schema_preserves_declaration_order() {
        let schema = Schema::from_value(json!({
            "zeta": {"type": "text", "name": "zeta"},
            "alpha": {"type": "rowContainer", "elements": {
                "b": {"type": "number", "name": "b"},
                "a": {"type": "checkbox", "name": "a"}
            }},
            "mid": {"type": "select", "name": "mid", "options": [{"value": "x", "label": "X"}]}
        }))
        .expect("schema");

        let keys: Vec<&str> = schema.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        let children: Vec<&str> = schema.entries[1]
            .node
            .children()
            .iter()
            .map(|e| e.key.as_str())
            .collect();
        assert_eq!(children, vec!["b", "a"]);
    }

    #[test]
    fn test_parse_listed_elements_key_by_name() {
        let schema = Schema::from_value(json!([
            {"type": "text", "name": "job"},
            {"type": "staticText", "value": "note"}
        ]))
        .expect("schema");
        assert_eq!(schema.entries[0].key, "job");
        assert_eq!(schema.entries[1].key, "element2");
    }

    #[test]
    fn test_unknown_kind_is_preserved_not_rejected() {
        let schema = Schema::from_value(json!({
            "weird": {"type": "sparkline", "name": "weird"}
        }))
        .expect("schema");
        assert_eq!(
            schema.entries[0].node.kind,
            FieldKind::Unknown("sparkline".to_string())
        );
        assert_eq!(schema.entries[0].node.kind.as_str(), "sparkline");
    }

    #[test]
    fn test_leaf_elements_are_dropped() {
        let schema = Schema::from_value(json!({
            "t": {"type": "text", "name": "t", "elements": {"x": {"type": "text"}}}
        }))
        .expect("schema");
        assert!(schema.entries[0].node.elements.is_none());
    }

    #[test]
    fn test_retriever_path_prefers_explicit_path() {
        let node: SchemaNode = serde_json::from_value(json!({
            "type": "dynamicSelect",
            "retriever": "old.sh",
            "retrieverPath": "new.sh",
            "retrieverParams": {"region": "$region"},
            "showAddMore": true
        }))
        .expect("node");
        assert_eq!(node.retriever_path(), Some("new.sh"));
        assert_eq!(node.extra_bool("showAddMore"), Some(true));
        assert_eq!(
            node.retriever_params.as_ref().and_then(|p| p.get("region")),
            Some(&json!("$region"))
        );
    }

    #[test]
    fn test_blank_retriever_counts_as_unset() {
        let node = SchemaNode::new(FieldKind::DynamicSelect).with_retriever("  ");
        assert_eq!(node.retriever_path(), None);
    }

    #[test]
    fn test_schema_rejects_scalar_document() {
        assert!(matches!(
            Schema::from_value(json!("nope")),
            Err(SchemaError::Invalid(_))
        ));
    }

    #[test]
    fn test_schema_value_roundtrip_keeps_keys() {
        let original = json!({
            "row": {"type": "rowContainer", "elements": {
                "n": {"type": "number", "name": "n", "value": 4}
            }}
        });
        let schema = Schema::from_value(original.clone()).expect("schema");
        assert_eq!(schema.to_value(), original);
    }
}
