//! Visibility conditions.
//!
//! Grammar: `[!]name[.value]`. A bare name tests truthiness of the field's
//! value; `name.value` tests equality with the field's value, the `value`
//! member of an option object, or any element of an array value.

use serde_json::Value;

use crate::store::FormValues;
use crate::types::{is_truthy, selection_key};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub field: String,
    pub expected: Option<String>,
    pub negated: bool,
}

impl Condition {
    /// Parse an expression; blank expressions yield `None` (always visible).
    pub fn parse(expression: &str) -> Option<Self> {
        let trimmed = expression.trim();
        let (negated, body) = match trimmed.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, trimmed),
        };
        if body.is_empty() {
            return None;
        }
        let (field, expected) = match body.split_once('.') {
            Some((field, expected)) => (field.trim(), Some(expected.trim().to_string())),
            None => (body, None),
        };
        if field.is_empty() {
            return None;
        }
        Some(Self {
            field: field.to_string(),
            expected,
            negated,
        })
    }

    pub fn evaluate(&self, values: &FormValues) -> bool {
        let current = values.get_by_name(&self.field);
        let matched = match (&self.expected, current) {
            (None, Some(value)) => is_truthy(value),
            (None, None) => false,
            (Some(expected), Some(value)) => matches_expected(value, expected),
            (Some(_), None) => false,
        };
        matched != self.negated
    }
}

fn matches_expected(value: &Value, expected: &str) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|item| matches_expected(item, expected)),
        other => match selection_key(other) {
            Value::String(s) => s == expected,
            Value::Null => false,
            scalar => scalar.to_string() == expected,
        },
    }
}

/// Whether a node with this optional condition is visible.
pub fn is_visible(condition: Option<&str>, values: &FormValues) -> bool {
    condition
        .and_then(Condition::parse)
        .map(|c| c.evaluate(values))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldValueStore;
    use serde_json::json;

    fn values_with(pairs: &[(&str, Value)]) -> FormValues {
        let store = FieldValueStore::new();
        for (name, value) in pairs {
            store.update_named(name, value.clone());
        }
        store.snapshot()
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            Condition::parse("!gpu.yes"),
            Some(Condition {
                field: "gpu".to_string(),
                expected: Some("yes".to_string()),
                negated: true,
            })
        );
        assert_eq!(Condition::parse("   "), None);
        assert_eq!(Condition::parse("!"), None);
        assert_eq!(Condition::parse(".x"), None);
    }

    #[test]
    fn test_bare_name_tests_truthiness() {
        let values = values_with(&[("use_gpu", json!(true)), ("notes", json!(""))]);
        assert!(is_visible(Some("use_gpu"), &values));
        assert!(!is_visible(Some("notes"), &values));
        assert!(!is_visible(Some("missing"), &values));
        assert!(is_visible(Some("!missing"), &values));
    }

    #[test]
    fn test_expected_value_matches_scalars_options_and_arrays() {
        let values = values_with(&[
            ("queue", json!("gpu")),
            ("node", json!({"value": "a100", "label": "A100"})),
            ("mods", json!(["gcc", "cuda"])),
            ("cores", json!(8)),
        ]);
        assert!(is_visible(Some("queue.gpu"), &values));
        assert!(!is_visible(Some("queue.cpu"), &values));
        assert!(is_visible(Some("node.a100"), &values));
        assert!(is_visible(Some("mods.cuda"), &values));
        assert!(is_visible(Some("cores.8"), &values));
        assert!(is_visible(Some("!queue.cpu"), &values));
    }

    #[test]
    fn test_no_condition_is_visible() {
        assert!(is_visible(None, &FormValues::default()));
    }
}
