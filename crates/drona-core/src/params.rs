//! Retriever parameter maps and `$fieldName` references.

use indexmap::IndexMap;
use serde_json::Value;

/// Ordered parameter map as written in the schema (`retrieverParams`).
pub type RetrieverParams = IndexMap<String, Value>;

/// Field name referenced by a parameter value, if it is a `$name` string.
pub fn field_reference(value: &Value) -> Option<&str> {
    value.as_str().and_then(|s| s.strip_prefix('$'))
}

/// Names of the fields a parameter map depends on, in declaration order,
/// without duplicates.
pub fn dependency_names(params: &RetrieverParams) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for value in params.values() {
        if let Some(name) = field_reference(value) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}
