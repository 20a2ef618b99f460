use super::*;
use std::collections::HashMap;

pub mod mem;
pub mod messages;

pub type Error = Box<dyn core::error::Error + Send + Sync>;
pub type Result<T> = core::result::Result<T, Error>;

pub const STREAM_INVOCATIONS: &str = "invocations";
pub const STREAM_RESULTS: &str = "activations_results";
pub const STREAM_HEARTBEATS: &str = "heartbeats";

pub const GROUP_INVOKERS: &str = "invokers";
pub const GROUP_CONTROLLERS: &str = "controllers";
pub const GROUP_MONITORS: &str = "monitors";

pub const DEFAULT_MAXLEN: usize = 10_000;

/// Stream entry id in `millis-seq` form. Ordering is numeric on both
/// components, never lexicographic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    /// The id that precedes every message.
    pub fn zero() -> Self {
        Self("0-0".into())
    }

    pub fn from_parts(ms: u64, seq: u64) -> Self {
        Self(format!("{ms}-{seq}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn parts(&self) -> (u64, u64) {
        let mut split = self.0.splitn(2, '-');
        let ms = split.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let seq = split.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        (ms, seq)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for MessageId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.parts().cmp(&other.parts())
    }
}

impl PartialOrd for MessageId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub fields: HashMap<String, String>,
}

/// Append-only, length-bounded message log with named streams.
///
/// Per-stream FIFO is guaranteed; nothing is assumed across streams.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Atomic append. Returned ids are monotonic per stream.
    async fn publish(&self, stream: &str, fields: &[(String, String)]) -> Result<MessageId>;

    /// Messages after `last_id`, waiting up to `block`. Returns within
    /// `block` even when empty.
    async fn read_blocking(
        &self,
        stream: &str,
        last_id: &MessageId,
        block: std::time::Duration,
        count: usize,
    ) -> Result<Vec<Message>>;

    /// Most recent messages, newest first.
    async fn read_recent(&self, stream: &str, count: usize) -> Result<Vec<Message>>;

    /// Idempotent consumer group creation.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_orders_numerically() {
        let a = MessageId::from_parts(99, 5);
        let b = MessageId::from_parts(100, 0);
        let c = MessageId::from_parts(100, 1);
        assert!(a < b && b < c);
        assert!(MessageId::zero() < a);
        // Lexicographic comparison would get this one wrong
        assert!(MessageId::from_parts(9, 0) < MessageId::from_parts(10, 0));
    }
}
