//! Shared value types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Position of a field in the depth-first flattened schema tree.
pub type FieldIndex = usize;

/// Selected runtime and the directory it was loaded from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Environment {
    pub env: String,
    pub src: String,
}

impl Environment {
    pub fn new(env: impl Into<String>, src: impl Into<String>) -> Self {
        Self {
            env: env.into(),
            src: src.into(),
        }
    }

    /// Both parts are set; only then is the environment sent to retrievers.
    pub fn is_complete(&self) -> bool {
        !self.env.is_empty() && !self.src.is_empty()
    }

    /// `DRONA_ENV_DIR` value.
    pub fn env_dir(&self) -> String {
        format!("{}/{}", self.src, self.env)
    }
}

/// One choice offered by a select, radio or checkbox field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionItem {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OptionItem {
    pub fn new(value: impl Into<Value>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: Some(label.into()),
            extra: Map::new(),
        }
    }

    /// Lenient conversion from retriever output. Objects need a `value`
    /// member; bare scalars become their own label.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => {
                let inner = map.get("value")?.clone();
                let label = map.get("label").and_then(|l| match l {
                    Value::String(s) => Some(s.clone()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                });
                let extra = map
                    .iter()
                    .filter(|(k, _)| k.as_str() != "value" && k.as_str() != "label")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Some(Self {
                    value: inner,
                    label,
                    extra,
                })
            }
            Value::String(s) => Some(Self::new(s.clone(), s.clone())),
            Value::Number(n) => Some(Self::new(Value::Number(n.clone()), n.to_string())),
            Value::Bool(b) => Some(Self::new(*b, b.to_string())),
            _ => None,
        }
    }

    /// Options from a retriever payload; anything but an array yields none.
    pub fn list_from_value(value: &Value) -> Vec<Self> {
        value
            .as_array()
            .map(|items| items.iter().filter_map(Self::from_value).collect())
            .unwrap_or_default()
    }

    pub fn display_label(&self) -> String {
        match (&self.label, &self.value) {
            (Some(label), _) => label.clone(),
            (None, Value::String(s)) => s.clone(),
            (None, other) => other.to_string(),
        }
    }

    /// The `{value, label}` object emitted for single-select fields.
    pub fn to_selection(&self) -> Value {
        let mut map = Map::new();
        map.insert("value".to_string(), self.value.clone());
        map.insert("label".to_string(), Value::String(self.display_label()));
        Value::Object(map)
    }
}

/// Comparable key of a selected value: the `value` member of option
/// objects, the value itself otherwise.
pub fn selection_key(selection: &Value) -> &Value {
    match selection {
        Value::Object(map) => map.get("value").unwrap_or(selection),
        other => other,
    }
}

/// Whether a value counts as "set" for conditions and submission.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => map.get("value").map(is_truthy).unwrap_or(true),
    }
}

/// Plain string form of a value as a form post would carry it.
pub fn value_to_form_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("value")
            .map(value_to_form_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}
