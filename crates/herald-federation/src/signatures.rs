//! Federation request signing.
//!
//! Every outbound transaction carries a signed Authorization header:
//!
//! ```text
//! Authorization: X-Matrix origin="a.example",destination="b.example",
//!                key="ed25519:3f9a2c…",sig="<base64url-encoded-signature>"
//! ```
//!
//! The signed content is the canonical JSON (sorted keys, no whitespace) of:
//!
//! ```json
//! {
//!   "method":      "PUT",
//!   "uri":         "/_matrix/federation/v1/send/1700000000000-0",
//!   "origin":      "a.example",
//!   "destination": "b.example",
//!   "content":     { ... }
//! }
//! ```

use std::collections::BTreeMap;

use serde_json::Value;

use crate::keys::ServerKeyPair;

/// A signed federation request authorization.
#[derive(Debug, Clone)]
pub struct FedAuth {
    pub origin: String,
    pub destination: String,
    pub key_id: String,
    pub sig: String,
}

impl FedAuth {
    /// Build the `Authorization: X-Matrix …` header value.
    pub fn to_header(&self) -> String {
        format!(
            r#"X-Matrix origin="{}",destination="{}",key="{}",sig="{}""#,
            self.origin, self.destination, self.key_id, self.sig,
        )
    }
}

/// Sign an outbound federation request.
///
/// * `method`  — HTTP method, uppercase (e.g. `"PUT"`)
/// * `uri`     — request path + query
/// * `content` — request body, `None` for bodiless requests
pub fn sign_request(
    kp: &ServerKeyPair,
    origin: &str,
    destination: &str,
    method: &str,
    uri: &str,
    content: Option<&Value>,
) -> FedAuth {
    let canonical = signing_object(origin, destination, method, uri, content);
    FedAuth {
        origin: origin.to_owned(),
        destination: destination.to_owned(),
        key_id: kp.key_id.clone(),
        sig: kp.sign_json(&canonical),
    }
}

/// Canonical JSON of the object signed for an HTTP request.
fn signing_object(
    origin: &str,
    destination: &str,
    method: &str,
    uri: &str,
    content: Option<&Value>,
) -> String {
    let mut map = serde_json::Map::new();
    map.insert("method".into(), Value::String(method.to_uppercase()));
    map.insert("uri".into(), Value::String(uri.to_owned()));
    map.insert("origin".into(), Value::String(origin.to_owned()));
    map.insert("destination".into(), Value::String(destination.to_owned()));
    if let Some(body) = content {
        map.insert("content".into(), body.clone());
    }
    canonical_json(&Value::Object(map))
}

/// Produce canonical JSON: keys sorted lexicographically at every depth, no
/// insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    sort_keys(value).to_string()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sort_keys(v)))
                .collect::<BTreeMap<_, _>>()
                .into_iter()
                .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
