use super::*;
use redis::AsyncCommands;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use whisk_controller::async_trait;
use whisk_controller::broker::{DEFAULT_MAXLEN, Message, MessageBroker, MessageId};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    /// Connection URL, `redis://host:port/db`.
    pub url: String,
    /// Prepended to every stream name, `{prefix}:{stream}`.
    pub stream_prefix: String,
    /// Approximate per-stream length bound applied on append.
    pub maxlen: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".into(),
            stream_prefix: "whisk".into(),
            maxlen: DEFAULT_MAXLEN,
        }
    }
}

struct Broker {
    connection: redis::aio::ConnectionManager,
    stream_prefix: String,
    maxlen: usize,
}

impl Broker {
    fn stream_key(&self, stream: &str) -> String {
        format!("{}:{stream}", self.stream_prefix)
    }
}

pub async fn new(config: &Config) -> Result<Arc<dyn MessageBroker>, Error> {
    let client = redis::Client::open(config.url.as_str())?;
    let mut connection = redis::aio::ConnectionManager::new(client).await?;

    // Fail fast on a dead endpoint rather than at first publish
    redis::cmd("PING").query_async::<()>(&mut connection).await?;
    info!("Connected to Redis at {}", config.url);

    Ok(Arc::new(Broker {
        connection,
        stream_prefix: config.stream_prefix.clone(),
        maxlen: config.maxlen.max(1),
    }))
}

fn fields_from_map(map: HashMap<String, redis::Value>) -> HashMap<String, String> {
    map.into_iter()
        .filter_map(|(key, value)| {
            redis::from_redis_value::<String>(&value)
                .ok()
                .map(|value| (key, value))
        })
        .collect()
}

#[async_trait]
impl MessageBroker for Broker {
    async fn publish(
        &self,
        stream: &str,
        fields: &[(String, String)],
    ) -> whisk_controller::broker::Result<MessageId> {
        let mut connection = self.connection.clone();
        let id: String = connection
            .xadd_maxlen(
                self.stream_key(stream),
                StreamMaxlen::Approx(self.maxlen),
                "*",
                fields,
            )
            .await
            .map_err(Error::Redis)?;
        debug!("Published to {stream}: {id}");
        Ok(MessageId::from(id))
    }

    async fn read_blocking(
        &self,
        stream: &str,
        last_id: &MessageId,
        block: std::time::Duration,
        count: usize,
    ) -> whisk_controller::broker::Result<Vec<Message>> {
        let mut options = StreamReadOptions::default().count(count);
        if !block.is_zero() {
            options = options.block(block.as_millis() as usize);
        }

        let mut connection = self.connection.clone();
        let reply: StreamReadReply = connection
            .xread_options(
                &[self.stream_key(stream)],
                &[last_id.as_str()],
                &options,
            )
            .await
            .map_err(Error::Redis)?;

        Ok(reply
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .map(|entry| Message {
                id: MessageId::from(entry.id),
                fields: fields_from_map(entry.map),
            })
            .collect())
    }

    async fn read_recent(
        &self,
        stream: &str,
        count: usize,
    ) -> whisk_controller::broker::Result<Vec<Message>> {
        let mut connection = self.connection.clone();
        let reply: redis::streams::StreamRangeReply = connection
            .xrevrange_count(self.stream_key(stream), "+", "-", count)
            .await
            .map_err(Error::Redis)?;

        Ok(reply
            .ids
            .into_iter()
            .map(|entry| Message {
                id: MessageId::from(entry.id),
                fields: fields_from_map(entry.map),
            })
            .collect())
    }

    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
    ) -> whisk_controller::broker::Result<()> {
        let mut connection = self.connection.clone();
        match connection
            .xgroup_create_mkstream::<_, _, _, String>(self.stream_key(stream), group, "0")
            .await
        {
            Ok(_) => {
                info!("Created consumer group {group} on {stream}");
                Ok(())
            }
            // The group surviving a restart is the expected case
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(Error::Redis(e).into()),
        }
    }
}
