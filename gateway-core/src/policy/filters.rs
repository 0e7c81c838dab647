//! Response filter application (§4.2): redact, truncate, block — applied by
//! walking the serialized JSON response tree so the filter logic never
//! couples to an adapter's native result type (§9 REDESIGN FLAGS).

use serde_json::Value;

use crate::registry::ResponseFilters;

const REDACTED_SENTINEL: &str = "***";

/// Applies `filters` to `data`, returning either the (possibly mutated)
/// value or a `{blocked: true, reason}` replacement if a block pattern
/// matched anywhere in the serialized tree.
pub fn apply_response_filters(mut data: Value, filters: &ResponseFilters) -> Value {
    if let Some(patterns) = &filters.block_patterns {
        let serialized = data.to_string();
        for pattern in patterns {
            if let Ok(re) = regex::Regex::new(pattern) {
                if re.is_match(&serialized) {
                    return serde_json::json!({
                        "blocked": true,
                        "reason": format!("matched block pattern '{pattern}'"),
                    });
                }
            }
        }
    }

    if let Some(fields) = &filters.redact_fields {
        redact_fields(&mut data, fields);
    }

    if let Some(truncations) = &filters.truncate_fields {
        for t in truncations {
            truncate_field(&mut data, &t.field, t.max_length);
        }
    }

    data
}

fn redact_fields(value: &mut Value, fields: &[String]) {
    match value {
        Value::Object(map) => {
            for (k, v) in map.iter_mut() {
                if fields.iter().any(|f| f == k) {
                    *v = Value::String(REDACTED_SENTINEL.to_string());
                } else {
                    redact_fields(v, fields);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_fields(item, fields);
            }
        }
        _ => {}
    }
}

fn truncate_field(value: &mut Value, field: &str, max_length: usize) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get_mut(field) {
                if s.len() > max_length {
                    s.truncate(max_length);
                }
            }
            for (_, v) in map.iter_mut() {
                truncate_field(v, field, max_length);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                truncate_field(item, field, max_length);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_matching_field_anywhere_in_tree() {
        let data = serde_json::json!({"user": {"ssn": "123-45-6789", "name": "Ada"}});
        let filters = ResponseFilters {
            redact_fields: Some(vec!["ssn".into()]),
            truncate_fields: None,
            block_patterns: None,
        };
        let out = apply_response_filters(data, &filters);
        assert_eq!(out["user"]["ssn"], "***");
        assert_eq!(out["user"]["name"], "Ada");
    }

    #[test]
    fn truncates_long_strings() {
        let data = serde_json::json!({"summary": "a very long summary field indeed"});
        let filters = ResponseFilters {
            redact_fields: None,
            truncate_fields: Some(vec![crate::registry::TruncateField {
                field: "summary".into(),
                max_length: 10,
            }]),
            block_patterns: None,
        };
        let out = apply_response_filters(data, &filters);
        assert_eq!(out["summary"].as_str().unwrap().len(), 10);
    }

    #[test]
    fn block_pattern_replaces_entire_response() {
        let data = serde_json::json!({"body": "contains secret-token-xyz"});
        let filters = ResponseFilters {
            redact_fields: None,
            truncate_fields: None,
            block_patterns: Some(vec!["secret-token".into()]),
        };
        let out = apply_response_filters(data, &filters);
        assert_eq!(out["blocked"], true);
    }
}
