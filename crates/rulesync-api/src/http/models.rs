// HTTP adapter wire types
//
// Every response is wrapped in the `Envelope<T>` shape. Request bodies are
// small batch objects keyed by the argument names of the remote operation.

use serde::{Deserialize, Serialize};

// ── Response Envelope ────────────────────────────────────────────────

/// Standard response envelope.
///
/// ```json
/// { "meta": { "rc": "ok", "msg": "optional", "code": "optional" }, "data": [...] }
/// ```
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub meta: Meta,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// Metadata from the envelope. `rc` == `"ok"` means success.
#[derive(Debug, Deserialize)]
pub struct Meta {
    pub rc: String,
    #[serde(default)]
    pub msg: Option<String>,
    /// Machine-readable fault code, e.g. `"unknown-object"`.
    #[serde(default)]
    pub code: Option<String>,
}

/// Fault code the device uses when a named object does not exist.
pub const UNKNOWN_OBJECT_CODE: &str = "unknown-object";

// ── Request bodies ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct NamesRequest<'a> {
    pub names: &'a [String],
}

#[derive(Debug, Serialize)]
pub struct NamesTextsRequest<'a> {
    pub names: &'a [String],
    pub texts: &'a [String],
}

#[derive(Debug, Serialize)]
pub struct RenameRequest<'a> {
    pub old_names: &'a [String],
    pub new_names: &'a [String],
}

#[derive(Debug, Serialize)]
pub struct TextsRequest<'a> {
    pub texts: &'a [String],
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn envelope_without_data_defaults_to_empty() {
        let env: Envelope<String> =
            serde_json::from_str(r#"{"meta":{"rc":"error","msg":"nope"}}"#).unwrap();
        assert_eq!(env.meta.rc, "error");
        assert_eq!(env.meta.msg.as_deref(), Some("nope"));
        assert!(env.meta.code.is_none());
        assert!(env.data.is_empty());
    }

    #[test]
    fn rename_request_uses_snake_case_keys() {
        let old = vec!["a".to_string()];
        let new = vec!["b".to_string()];
        let body = serde_json::to_value(RenameRequest {
            old_names: &old,
            new_names: &new,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"old_names": ["a"], "new_names": ["b"]}));
    }
}
