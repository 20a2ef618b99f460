use super::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub maxlen: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            maxlen: DEFAULT_MAXLEN,
        }
    }
}

#[derive(Default)]
struct Stream {
    entries: VecDeque<Message>,
    last_ms: u64,
    last_seq: u64,
    groups: HashSet<String>,
}

struct Broker {
    streams: Mutex<HashMap<String, Stream>>,
    notify: Notify,
    maxlen: usize,
}

impl Broker {
    fn read_after(&self, stream: &str, last_id: &MessageId, count: usize) -> Vec<Message> {
        self.streams
            .lock()
            .trace_expect("Failed to lock mutex")
            .get(stream)
            .map(|s| {
                s.entries
                    .iter()
                    .filter(|m| m.id > *last_id)
                    .take(count)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageBroker for Broker {
    async fn publish(&self, stream: &str, fields: &[(String, String)]) -> Result<MessageId> {
        let id = {
            let mut streams = self.streams.lock().trace_expect("Failed to lock mutex");
            let stream = streams.entry(stream.to_string()).or_default();

            // Same-millisecond appends get an incremented sequence part
            let now = activation::now_ms();
            if now > stream.last_ms {
                stream.last_ms = now;
                stream.last_seq = 0;
            } else {
                stream.last_seq += 1;
            }
            let id = MessageId::from_parts(stream.last_ms, stream.last_seq);

            stream.entries.push_back(Message {
                id: id.clone(),
                fields: fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            });
            while stream.entries.len() > self.maxlen {
                stream.entries.pop_front();
            }
            id
        };

        self.notify.notify_waiters();
        Ok(id)
    }

    async fn read_blocking(
        &self,
        stream: &str,
        last_id: &MessageId,
        block: std::time::Duration,
        count: usize,
    ) -> Result<Vec<Message>> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // Check after arming the waiter, so a concurrent publish cannot
            // slip between the check and the wait
            let messages = self.read_after(stream, last_id, count);
            if !messages.is_empty() {
                return Ok(messages);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
    }

    async fn read_recent(&self, stream: &str, count: usize) -> Result<Vec<Message>> {
        Ok(self
            .streams
            .lock()
            .trace_expect("Failed to lock mutex")
            .get(stream)
            .map(|s| s.entries.iter().rev().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        self.streams
            .lock()
            .trace_expect("Failed to lock mutex")
            .entry(stream.to_string())
            .or_default()
            .groups
            .insert(group.to_string());
        Ok(())
    }
}

pub fn new(config: &Config) -> Arc<dyn MessageBroker> {
    Arc::new(Broker {
        streams: Mutex::new(HashMap::new()),
        notify: Notify::new(),
        maxlen: config.maxlen.max(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(v: &str) -> Vec<(String, String)> {
        vec![("v".to_string(), v.to_string())]
    }

    #[tokio::test]
    async fn publish_preserves_fifo_order() {
        let broker = new(&Config::default());
        let a = broker.publish("s", &fields("a")).await.unwrap();
        let b = broker.publish("s", &fields("b")).await.unwrap();
        assert!(a < b);

        let messages = broker
            .read_blocking("s", &MessageId::zero(), std::time::Duration::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].fields["v"], "a");
        assert_eq!(messages[1].fields["v"], "b");

        // Bookmarked read skips what we have seen
        let tail = broker
            .read_blocking("s", &a, std::time::Duration::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].fields["v"], "b");
    }

    #[tokio::test]
    async fn blocking_read_returns_empty_on_timeout() {
        let broker = new(&Config::default());
        let start = tokio::time::Instant::now();
        let messages = broker
            .read_blocking(
                "empty",
                &MessageId::zero(),
                std::time::Duration::from_millis(50),
                10,
            )
            .await
            .unwrap();
        assert!(messages.is_empty());
        assert!(start.elapsed() >= std::time::Duration::from_millis(50));
    }

    #[tokio::test]
    async fn blocking_read_wakes_on_publish() {
        let broker = new(&Config::default());
        let reader = broker.clone();
        let handle = tokio::spawn(async move {
            reader
                .read_blocking(
                    "s",
                    &MessageId::zero(),
                    std::time::Duration::from_secs(5),
                    10,
                )
                .await
                .unwrap()
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        broker.publish("s", &fields("x")).await.unwrap();

        let messages = handle.await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn maxlen_trims_oldest() {
        let broker = new(&Config { maxlen: 3 });
        for i in 0..5 {
            broker.publish("s", &fields(&i.to_string())).await.unwrap();
        }
        let messages = broker.read_recent("s", 10).await.unwrap();
        assert_eq!(messages.len(), 3);
        // Newest first
        assert_eq!(messages[0].fields["v"], "4");
        assert_eq!(messages[2].fields["v"], "2");
    }
}
