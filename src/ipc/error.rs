//! Response envelopes. Every stdout line is one of these objects.

use serde::Serialize;
use serde_json::{json, Value};

/// The `error` member of a failed response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

pub fn ok(id: &str, result: Value) -> Value {
    json!({ "id": id, "ok": true, "result": result })
}

/// `id` is `None` when the request line could not be parsed far enough to
/// read one.
pub fn err(id: Option<&str>, body: ErrorBody) -> Value {
    match id {
        Some(id) => json!({ "id": id, "ok": false, "error": body }),
        None => json!({ "ok": false, "error": body }),
    }
}

pub fn bad_json(message: impl Into<String>) -> Value {
    err(None, ErrorBody::new("bad_json", message))
}
