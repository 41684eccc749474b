//! Node-local authorization endpoint logic.
//!
//! Callers sign the canonical JSON form of their payload with ed25519; the
//! node tracks a monotonic nonce per key so a captured request cannot be
//! replayed.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use jam_crypto::ed25519;
use jam_types::{PublicKey, Signature};

/// Authorization request body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    pub public_key: PublicKey,
    pub signature: Signature,
    /// Arbitrary JSON payload; must contain a numeric `nonce` field.
    pub payload: Value,
}

/// Authorization response body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_output: Option<Value>,
}

/// Canonical JSON bytes: serde_json with its default ordered maps, so equal
/// payloads serialize identically regardless of construction order.
pub fn canonical_json(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

/// Verifier with per-key monotonic nonces.
#[derive(Default)]
pub struct Authorizer {
    nonces: Mutex<BTreeMap<PublicKey, u64>>,
}

impl Authorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a request: signature over the canonical payload, then a
    /// strictly increasing nonce.
    pub fn authorize(&self, request: &AuthorizeRequest) -> AuthorizeResponse {
        let payload_bytes = canonical_json(&request.payload);
        if !ed25519::verify(&request.public_key, &payload_bytes, &request.signature) {
            return AuthorizeResponse {
                success: false,
                message: "signature verification failed".into(),
                auth_output: None,
            };
        }

        let Some(nonce) = request.payload.get("nonce").and_then(Value::as_u64) else {
            return AuthorizeResponse {
                success: false,
                message: "payload missing numeric nonce".into(),
                auth_output: None,
            };
        };

        let mut nonces = self.nonces.lock().expect("nonce table lock");
        let last = nonces.get(&request.public_key).copied();
        if last.is_some_and(|l| nonce <= l) {
            return AuthorizeResponse {
                success: false,
                message: format!("nonce {nonce} not greater than last seen {}", last.unwrap_or(0)),
                auth_output: None,
            };
        }
        nonces.insert(request.public_key, nonce);

        AuthorizeResponse {
            success: true,
            message: "authorized".into(),
            auth_output: Some(Value::String(format!(
                "auth:{}:{nonce}",
                jam_crypto::blake2b_256(payload_bytes).to_hex()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use serde_json::json;

    use super::*;

    fn signed_request(key: &SigningKey, payload: Value) -> AuthorizeRequest {
        let signature = ed25519::sign(key, &canonical_json(&payload));
        AuthorizeRequest {
            public_key: ed25519::verifying_key_bytes(key),
            signature,
            payload,
        }
    }

    #[test]
    fn valid_request_is_authorized() {
        let key = SigningKey::generate(&mut rand::thread_rng());
        let authorizer = Authorizer::new();
        let response = authorizer.authorize(&signed_request(&key, json!({"nonce": 1, "op": "x"})));
        assert!(response.success, "{}", response.message);
        assert!(response.auth_output.is_some());
    }

    #[test]
    fn canonical_json_sorts_keys() {
        // construction order differs, canonical bytes agree
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn replayed_nonce_rejected() {
        let key = SigningKey::generate(&mut rand::thread_rng());
        let authorizer = Authorizer::new();
        assert!(authorizer.authorize(&signed_request(&key, json!({"nonce": 5}))).success);
        assert!(!authorizer.authorize(&signed_request(&key, json!({"nonce": 5}))).success);
        assert!(!authorizer.authorize(&signed_request(&key, json!({"nonce": 4}))).success);
        assert!(authorizer.authorize(&signed_request(&key, json!({"nonce": 6}))).success);
    }

    #[test]
    fn tampered_payload_rejected() {
        let key = SigningKey::generate(&mut rand::thread_rng());
        let authorizer = Authorizer::new();
        let mut request = signed_request(&key, json!({"nonce": 1}));
        request.payload = json!({"nonce": 2});
        assert!(!authorizer.authorize(&request).success);
    }

    #[test]
    fn missing_nonce_rejected() {
        let key = SigningKey::generate(&mut rand::thread_rng());
        let authorizer = Authorizer::new();
        let response = authorizer.authorize(&signed_request(&key, json!({"op": "x"})));
        assert!(!response.success);
    }

    #[test]
    fn nonces_are_per_key() {
        let key_a = SigningKey::generate(&mut rand::thread_rng());
        let key_b = SigningKey::generate(&mut rand::thread_rng());
        let authorizer = Authorizer::new();
        assert!(authorizer.authorize(&signed_request(&key_a, json!({"nonce": 1}))).success);
        assert!(authorizer.authorize(&signed_request(&key_b, json!({"nonce": 1}))).success);
    }
}
