//! Rough per-shape size estimation.
//!
//! Estimates deliberately over-count: the governor uses them to refuse work,
//! and refusing slightly early is the safe direction. String lengths are
//! doubled (UTF-16 worst case in the codecs clients commonly pair with this
//! store); containers pay a fixed base plus per-entry overhead.

use serde_json::Value;

/// Fixed overhead carried by any heap-allocated payload or container.
const BASE_OVERHEAD: usize = 24;

/// Per-map-entry overhead beyond the key text.
const ENTRY_OVERHEAD: usize = 16;

/// Estimated resident size of an opaque stored payload.
pub fn estimate_payload(bytes: &[u8]) -> usize {
    BASE_OVERHEAD + bytes.len()
}

/// Estimated resident size of a structured value.
pub fn estimate_value(value: &Value) -> usize {
    match value {
        Value::Null => 8,
        Value::Bool(_) => 1,
        Value::Number(_) => 8,
        Value::String(s) => 2 * s.len(),
        Value::Array(items) => BASE_OVERHEAD + items.iter().map(estimate_value).sum::<usize>(),
        Value::Object(fields) => {
            BASE_OVERHEAD
                + fields
                    .iter()
                    .map(|(key, val)| 2 * key.len() + ENTRY_OVERHEAD + estimate_value(val))
                    .sum::<usize>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        assert_eq!(estimate_value(&json!(true)), 1);
        assert_eq!(estimate_value(&json!(42)), 8);
        assert_eq!(estimate_value(&json!(1.5)), 8);
        assert_eq!(estimate_value(&json!(null)), 8);
    }

    #[test]
    fn test_string_doubles_length() {
        assert_eq!(estimate_value(&json!("abcd")), 8);
        assert_eq!(estimate_value(&json!("")), 0);
    }

    #[test]
    fn test_object_counts_keys_and_values() {
        // 24 base + (2*3 + 16 + 8) for {"age": 29}
        assert_eq!(estimate_value(&json!({"age": 29})), 24 + 6 + 16 + 8);
    }

    #[test]
    fn test_nested_object_recurses() {
        let flat = estimate_value(&json!({"a": 1}));
        let nested = estimate_value(&json!({"outer": {"a": 1}}));
        assert!(nested > flat);
    }

    #[test]
    fn test_array_sums_elements() {
        assert_eq!(estimate_value(&json!([1, 2, 3])), 24 + 3 * 8);
    }

    #[test]
    fn test_payload_has_fixed_overhead() {
        assert_eq!(estimate_payload(b""), 24);
        assert_eq!(estimate_payload(&[0u8; 100]), 124);
    }
}
