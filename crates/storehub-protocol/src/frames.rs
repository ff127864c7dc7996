use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server → Client pushed event. One frame per event per recipient.
/// Wire: `{ "type": "Product created", "payload": {...} }`
///
/// No versioning and no acknowledgement; `payload` is whatever the
/// publisher serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl EventFrame {
    pub fn new(kind: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            kind: kind.into(),
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    /// Like [`EventFrame::new`] but surfaces payload serialization errors
    /// instead of degrading to `null`.
    pub fn try_new(kind: impl Into<String>, payload: impl Serialize) -> serde_json::Result<Self> {
        Ok(Self {
            kind: kind.into(),
            payload: serde_json::to_value(payload)?,
        })
    }
}
