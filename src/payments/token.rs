//! Request token computation for the T-Bank acquiring API.
//!
//! The provider's documented canonicalization is ambiguous and implemented
//! inconsistently across deployments, so three modes exist. Callers try them
//! in [`MODE_ORDER`] and fall back deterministically instead of failing hard.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Name of the signature field itself; always excluded from the digest input.
pub const TOKEN_FIELD: &str = "Token";

/// Fields excluded from signing by default. Some provider deployments sign
/// the nested receipt object and some do not; excluding it matches the
/// deployments we integrate with.
pub const DEFAULT_EXCLUDED: &[&str] = &["Receipt", "Data"];

/// Canonicalization strategies, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenMode {
    /// Insert the password as a synthetic `Password` field, sort by field
    /// name, concatenate values only.
    PasswordKey,
    /// Sort the original fields, concatenate values only, append the
    /// password as a raw suffix.
    AppendPassword,
    /// Like `PasswordKey` but concatenate `name + value` pairs.
    KeyValue,
}

pub const MODE_ORDER: [TokenMode; 3] = [
    TokenMode::PasswordKey,
    TokenMode::AppendPassword,
    TokenMode::KeyValue,
];

/// Scalar rendering of a JSON value for canonicalization. Nested objects and
/// arrays never participate (the receipt is excluded wholesale); nulls are
/// skipped entirely.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
        _ => None,
    }
}

fn signable_entries(fields: &Map<String, Value>, exclude: &[&str]) -> Vec<(String, String)> {
    fields
        .iter()
        .filter(|(name, _)| name.as_str() != TOKEN_FIELD && !exclude.contains(&name.as_str()))
        .filter_map(|(name, value)| scalar(value).map(|v| (name.clone(), v)))
        .collect()
}

/// Compute the hex-encoded SHA-256 token for a field set under one mode.
pub fn sign(fields: &Map<String, Value>, password: &str, mode: TokenMode, exclude: &[&str]) -> String {
    let mut entries = signable_entries(fields, exclude);

    let input = match mode {
        TokenMode::PasswordKey => {
            entries.push(("Password".to_string(), password.to_string()));
            entries.sort();
            entries.into_iter().map(|(_, v)| v).collect::<String>()
        }
        TokenMode::AppendPassword => {
            entries.sort();
            let mut joined: String = entries.into_iter().map(|(_, v)| v).collect();
            joined.push_str(password);
            joined
        }
        TokenMode::KeyValue => {
            entries.push(("Password".to_string(), password.to_string()));
            entries.sort();
            entries
                .into_iter()
                .map(|(name, value)| format!("{}{}", name, value))
                .collect::<String>()
        }
    };

    hex::encode(Sha256::digest(input.as_bytes()))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    // Length is not secret (64 hex chars for SHA-256), the content is.
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Verify an inbound token against every mode in fallback order.
pub fn verify(
    fields: &Map<String, Value>,
    password: &str,
    candidate: &str,
    exclude: &[&str],
) -> bool {
    MODE_ORDER
        .iter()
        .any(|mode| constant_time_eq(&sign(fields, password, *mode, exclude), candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields() -> Map<String, Value> {
        let Value::Object(map) = json!({
            "TerminalKey": "TermA",
            "Amount": 190000,
            "OrderId": "order-1",
            "Success": true,
        }) else {
            unreachable!()
        };
        map
    }

    fn sha256_hex(s: &str) -> String {
        hex::encode(Sha256::digest(s.as_bytes()))
    }

    #[test]
    fn test_password_key_vector() {
        // ASCII sort: Amount, OrderId, Password, Success, TerminalKey
        let expected = sha256_hex("190000order-1secrettrueTermA");
        assert_eq!(
            sign(&fields(), "secret", TokenMode::PasswordKey, DEFAULT_EXCLUDED),
            expected
        );
    }

    #[test]
    fn test_append_password_vector() {
        // Sorted original fields, password appended raw.
        let expected = sha256_hex("190000order-1trueTermAsecret");
        assert_eq!(
            sign(&fields(), "secret", TokenMode::AppendPassword, DEFAULT_EXCLUDED),
            expected
        );
    }

    #[test]
    fn test_key_value_vector() {
        let expected = sha256_hex(
            "Amount190000OrderIdorder-1PasswordsecretSuccesstrueTerminalKeyTermA",
        );
        assert_eq!(
            sign(&fields(), "secret", TokenMode::KeyValue, DEFAULT_EXCLUDED),
            expected
        );
    }

    #[test]
    fn test_token_and_receipt_excluded() {
        let mut with_extras = fields();
        with_extras.insert("Token".to_string(), json!("deadbeef"));
        with_extras.insert("Receipt".to_string(), json!({"Email": "x@example.com"}));
        with_extras.insert("Data".to_string(), json!({"Phone": "000"}));

        for mode in MODE_ORDER {
            assert_eq!(
                sign(&with_extras, "secret", mode, DEFAULT_EXCLUDED),
                sign(&fields(), "secret", mode, DEFAULT_EXCLUDED),
            );
        }
    }

    #[test]
    fn test_null_fields_skipped() {
        let mut with_null = fields();
        with_null.insert("RedirectDueDate".to_string(), Value::Null);
        assert_eq!(
            sign(&with_null, "secret", TokenMode::PasswordKey, DEFAULT_EXCLUDED),
            sign(&fields(), "secret", TokenMode::PasswordKey, DEFAULT_EXCLUDED),
        );
    }

    #[test]
    fn test_verify_accepts_any_mode() {
        for mode in MODE_ORDER {
            let token = sign(&fields(), "secret", mode, DEFAULT_EXCLUDED);
            assert!(verify(&fields(), "secret", &token, DEFAULT_EXCLUDED));
        }
    }

    #[test]
    fn test_verify_rejects_wrong_password_and_garbage() {
        let token = sign(&fields(), "secret", TokenMode::PasswordKey, DEFAULT_EXCLUDED);
        assert!(!verify(&fields(), "other", &token, DEFAULT_EXCLUDED));
        assert!(!verify(&fields(), "secret", "not-a-token", DEFAULT_EXCLUDED));
        assert!(!verify(&fields(), "secret", "", DEFAULT_EXCLUDED));
    }

    #[test]
    fn test_mode_order_is_fixed() {
        assert_eq!(
            MODE_ORDER,
            [
                TokenMode::PasswordKey,
                TokenMode::AppendPassword,
                TokenMode::KeyValue
            ]
        );
    }
}
