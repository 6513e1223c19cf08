//! Deduplication signature: a digest of `action ∥ callback ∥ payload`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::model::CallbackKey;

/// Computes the 64-bit dedupe signature for a job's identity.
///
/// The exact hash function is not part of the contract — only that equal
/// `(action, callback, payload)` triples produce equal signatures and the
/// store can index on the result. `DefaultHasher` (SipHash) is adequate
/// here since the signature is used for exact-match dedupe lookups, not as
/// a security boundary.
pub fn compute_signature(action: &str, callback: &CallbackKey, payload: &serde_json::Value) -> i64 {
    let mut hasher = DefaultHasher::new();
    action.hash(&mut hasher);
    0u8.hash(&mut hasher); // separator, avoids "ab"+"c" colliding with "a"+"bc"
    callback.as_wire_string().hash(&mut hasher);
    0u8.hash(&mut hasher);
    canonical_json(payload).hash(&mut hasher);
    hasher.finish() as i64
}

/// A stable string form of a JSON value for hashing purposes.
/// `serde_json::Value`'s `Display` already serializes maps by insertion
/// order; since payloads are built by us at dispatch time from a fixed
/// field order, this is stable across calls.
fn canonical_json(value: &serde_json::Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_inputs_produce_identical_signatures() {
        let cb = CallbackKey::Named("send_email".into());
        let payload = json!({"user_id": 42});
        let a = compute_signature("user.signup", &cb, &payload);
        let b = compute_signature("user.signup", &cb, &payload);
        assert_eq!(a, b);
    }

    #[test]
    fn different_actions_produce_different_signatures() {
        let cb = CallbackKey::Named("send_email".into());
        let payload = json!({"user_id": 42});
        let a = compute_signature("user.signup", &cb, &payload);
        let b = compute_signature("user.login", &cb, &payload);
        assert_ne!(a, b);
    }

    #[test]
    fn concatenation_boundary_does_not_collide() {
        let cb1 = CallbackKey::Named("ab".into());
        let cb2 = CallbackKey::Named("a".into());
        let a = compute_signature("x", &cb1, &json!("c"));
        let b = compute_signature("xa", &cb2, &json!("c"));
        assert_ne!(a, b);
    }
}
