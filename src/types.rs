use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl ConversationId {
    pub fn short(&self) -> &str {
        crate::str_utils::prefix_chars(&self.0, 8)
    }

    /// Stable local anchor for exchanges the backend never assigned an id to.
    /// Derived from the question text so repeated log lines correlate; never
    /// sent back to the backend.
    pub fn anchor_from_question(question: &str) -> Self {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(question.as_bytes());
        let hex = format!("{:x}", digest);
        Self(format!("local-{}", &hex[..12]))
    }
}

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn short(&self) -> &str {
        crate::str_utils::prefix_chars(&self.0, 8)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum ArmatureError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error (status {0}): {1}")]
    Backend(reqwest::StatusCode, String),
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: ArmatureError,
    pub span_trace: SpanTrace,
}

impl fmt::Display for ObservedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n\nSpan Trace:\n{}", self.inner, self.span_trace)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<ArmatureError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;

/// One classified wire event. Closed vocabulary; unknown `type` values never
/// reach this enum (they classify as `FrameClass::Ignored`). Missing fields
/// default rather than fail so a sparse backend payload still classifies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Start {
        #[serde(rename = "conversationId", default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
    },
    Progress {
        #[serde(default)]
        message: String,
    },
    Chunk {
        #[serde(default)]
        content: String,
        #[serde(default)]
        index: u64,
    },
    Complete {
        #[serde(default)]
        message: String,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

/// Outcome of classifying one frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameClass {
    Event(StreamEvent),
    /// The literal `[DONE]` sentinel: stop reading, nothing further to render.
    Done,
    /// Valid JSON with an unrecognized or absent `type`; forward-compatible no-op.
    Ignored,
    /// Not valid JSON at all; the raw text is kept for diagnostics.
    Malformed { raw: String },
}

/// Total classification of a frame payload. Never panics and never errors:
/// every input maps to exactly one `FrameClass`.
pub fn classify(payload: &str) -> FrameClass {
    let data = payload.trim();
    if data.is_empty() {
        return FrameClass::Ignored;
    }
    if data == crate::constants::SSE_DONE_SENTINEL {
        return FrameClass::Done;
    }
    if let Ok(event) = serde_json::from_str::<StreamEvent>(data) {
        return FrameClass::Event(event);
    }
    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(value) => {
            let kind = match value.get("type").and_then(|t| t.as_str()) {
                Some(k) => k.to_string(),
                None => "<none>".to_string(),
            };
            tracing::debug!("[☁️  -> 🖥️ ] Ignoring event with unrecognized type: {}", kind);
            FrameClass::Ignored
        }
        Err(_) => {
            tracing::debug!(
                "[☁️  -> 🖥️ ] Unparseable frame payload: {}",
                crate::str_utils::snippet(data, 200)
            );
            FrameClass::Malformed {
                raw: data.to_string(),
            }
        }
    }
}

/// Body of the streaming analyze request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub question: String,
    pub content: String,
    #[serde(rename = "conversationId", default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// One persisted exchange as returned by the history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub response: String,
    #[serde(rename = "conversationId", default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryPage {
    #[serde(default)]
    pub messages: Vec<HistoryEntry>,
    #[serde(default)]
    pub count: usize,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ConnectionInfo {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl ConnectionInfo {
    pub fn is_ok(&self) -> bool {
        self.status == "ok" || self.status == "connected"
    }
}

/// Node snapshot the Blender plugin last pushed to the backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeContext {
    #[serde(default)]
    pub nodes: String,
}

/// One selectable model as surfaced by a provider listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelOption {
    pub label: String,
    pub value: String,
}


#[cfg(test)]
mod id_tests {
    use super::*;

    #[test]
    fn test_anchor_is_stable_and_distinct() {
        let a = ConversationId::anchor_from_question("why is my node tree slow?");
        let b = ConversationId::anchor_from_question("why is my node tree slow?");
        let c = ConversationId::anchor_from_question("a different question");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.0.starts_with("local-"));
    }

    #[test]
    fn test_session_id_short_is_prefix() {
        let id = SessionId::new();
        assert_eq!(id.short().len(), 8);
        assert!(id.0.starts_with(id.short()));
    }

    #[test]
    fn test_analyze_request_wire_names() {
        let body = AnalyzeRequest {
            question: "q".into(),
            content: "c".into(),
            conversation_id: Some("cid".into()),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["conversationId"], "cid");
        assert!(value.get("conversation_id").is_none());
    }
}
