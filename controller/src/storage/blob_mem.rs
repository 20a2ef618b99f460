use super::*;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Config {
    pub capacity: std::num::NonZeroUsize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: std::num::NonZero::new(1024).unwrap(),
        }
    }
}

struct Storage {
    blobs: Mutex<lru::LruCache<String, Bytes>>,
}

#[async_trait]
impl BlobStorage for Storage {
    async fn put(&self, key: &BlobKey, data: Bytes) -> Result<()> {
        self.blobs
            .lock()
            .trace_expect("Failed to lock mutex")
            .put(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Bytes>> {
        Ok(self
            .blobs
            .lock()
            .trace_expect("Failed to lock mutex")
            .get(&key.to_string())
            .cloned())
    }

    async fn remove(&self, key: &BlobKey) -> Result<bool> {
        Ok(self
            .blobs
            .lock()
            .trace_expect("Failed to lock mutex")
            .pop(&key.to_string())
            .is_some())
    }

    async fn presign_get(
        &self,
        _key: &BlobKey,
        _expires_in: std::time::Duration,
    ) -> Result<Option<String>> {
        // Nothing outside the process can address this store
        Ok(None)
    }
}

pub fn new(config: &Config) -> Arc<dyn BlobStorage> {
    Arc::new(Storage {
        blobs: Mutex::new(lru::LruCache::new(config.capacity)),
    })
}
