use super::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    (nanos / 1_000_000).clamp(0, i128::from(u64::MAX)) as u64
}

/// Result envelope of a single execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default)]
    pub result: serde_json::Value,
}

impl Response {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result,
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            result: serde_json::json!({ "error": message.to_string() }),
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self {
            success: true,
            result: serde_json::Value::Null,
        }
    }
}

/// Record of one execution attempt. Created pending (`end = None`),
/// finalized exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activation {
    pub activation_id: Uuid,
    pub namespace: String,
    /// Fully-qualified action name.
    pub name: String,
    pub version: String,
    pub subject: String,
    /// Epoch milliseconds.
    pub start: u64,
    #[serde(default)]
    pub end: Option<u64>,
    #[serde(default)]
    pub duration: Option<u64>,
    pub status_code: i64,
    #[serde(default)]
    pub response: Response,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub annotations: params::Map,
    #[serde(default)]
    pub cause: Option<Uuid>,
    #[serde(default)]
    pub publish: bool,
}

impl Activation {
    pub fn is_terminal(&self) -> bool {
        self.end.is_some()
    }
}

/// Delta applied when an activation reaches its terminal state.
#[derive(Debug, Clone)]
pub struct ActivationUpdate {
    pub end: u64,
    pub duration: u64,
    pub status_code: i64,
    pub response: Response,
    pub logs: Vec<String>,
    /// Merged over the pending record's annotations.
    pub annotations: params::Map,
}

#[derive(Debug, Clone, Default)]
pub struct ActivationFilter {
    /// Substring match on the action name.
    pub name: Option<String>,
    /// Inclusive lower bound on `start`, epoch milliseconds.
    pub since: Option<u64>,
    /// Inclusive upper bound on `start`, epoch milliseconds.
    pub upto: Option<u64>,
    pub skip: usize,
    pub limit: usize,
}

impl ActivationFilter {
    pub fn matches(&self, activation: &Activation) -> bool {
        if let Some(name) = &self.name {
            if !activation.name.contains(name.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if activation.start < since {
                return false;
            }
        }
        if let Some(upto) = self.upto {
            if activation.start > upto {
                return false;
            }
        }
        true
    }
}
