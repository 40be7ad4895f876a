//! Storage key derivation and id validation
//!
//! A record lives at `"{namespace}:{id}"`. Neither part may contain `:`.

use crate::codec::Value;
use crate::error::{EntityError, ErrorCode};

/// Separator between namespace and id.
pub const KEY_SEPARATOR: char = ':';

/// Build the storage key for a record id.
pub fn storage_key(namespace: &str, id: &str) -> String {
    format!("{}{}{}", namespace, KEY_SEPARATOR, id)
}

/// Check that a namespace is usable as a key prefix.
pub fn is_valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty() && !namespace.contains(KEY_SEPARATOR)
}

/// Validate the `id` column of a record and return it as a string.
///
/// Fails with [`ErrorCode::InvalidId`] before any store interaction.
pub fn validate_id<'a>(entity: &str, id: &'a Value) -> Result<&'a str, EntityError> {
    let id = match id {
        Value::Undefined | Value::Null => {
            return Err(EntityError::operation(
                ErrorCode::InvalidId,
                entity,
                "id is empty.",
            ))
        }
        Value::String(s) if s.is_empty() => {
            return Err(EntityError::operation(
                ErrorCode::InvalidId,
                entity,
                "id is empty.",
            ))
        }
        Value::String(s) => s.as_str(),
        _ => {
            return Err(EntityError::operation(
                ErrorCode::InvalidId,
                entity,
                "id is not in the type of string.",
            ))
        }
    };

    if id.contains(KEY_SEPARATOR) {
        return Err(EntityError::operation(
            ErrorCode::InvalidId,
            entity,
            "id must not contains \":\".",
        ));
    }

    Ok(id)
}

/// The SCAN match pattern for a namespace and optional id prefix.
pub fn scan_pattern(namespace: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        format!("{}*", namespace)
    } else {
        format!("{}{}{}*", namespace, KEY_SEPARATOR, prefix)
    }
}

/// Strip the `"{namespace}:"` prefix from a scanned key.
pub fn strip_namespace(namespace: &str, key: &str) -> String {
    key.strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix(KEY_SEPARATOR))
        .unwrap_or(key)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key() {
        assert_eq!(storage_key("Player", "p-1"), "Player:p-1");
    }

    #[test]
    fn test_validate_id_accepts_plain_strings() {
        let id = Value::from("abc-1");
        assert_eq!(validate_id("Player", &id).unwrap(), "abc-1");
    }

    #[test]
    fn test_validate_id_rejections() {
        let cases = [
            (Value::from(""), "id is empty."),
            (Value::Undefined, "id is empty."),
            (Value::from(42), "id is not in the type of string."),
            (Value::from("a:b"), "id must not contains \":\"."),
        ];
        for (id, message) in cases {
            let err = validate_id("Player", &id).unwrap_err();
            assert!(err.is(ErrorCode::InvalidId));
            assert_eq!(err.to_string(), format!("(Player) {}", message));
        }
    }

    #[test]
    fn test_scan_pattern() {
        assert_eq!(scan_pattern("Player", "p-"), "Player:p-*");
        assert_eq!(scan_pattern("Player", ""), "Player*");
    }

    #[test]
    fn test_strip_namespace() {
        assert_eq!(strip_namespace("Player", "Player:p-1"), "p-1");
        assert_eq!(strip_namespace("Player", "Other:p-1"), "Other:p-1");
    }

    #[test]
    fn test_namespace_validity() {
        assert!(is_valid_namespace("Player"));
        assert!(!is_valid_namespace(""));
        assert!(!is_valid_namespace("a:b"));
    }
}
