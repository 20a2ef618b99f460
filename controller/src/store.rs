use super::*;
use entity::{Action, EntityKey};
use sha2::{Digest, Sha256};
use storage::BlobKey;

const ACTION_CACHE_CAPACITY: usize = 256;

/// SHA-256 hex digest used as the code content address.
pub fn hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Storage façade over the pluggable entity and blob backends.
///
/// Owns the hot action-resolution cache, the blob retry policy and the
/// catalog semantics (validation, cascades, versioning) layered on top of
/// the raw [`storage`] traits.
pub struct Store {
    entity_storage: Arc<dyn storage::EntityStorage>,
    blob_storage: Arc<dyn storage::BlobStorage>,
    action_cache: std::sync::Mutex<lru::LruCache<EntityKey, Action>>,
    max_blob_retries: u32,
    presign_ttl: std::time::Duration,
}

impl Store {
    pub fn new(config: &config::Config) -> Self {
        // Init pluggable storage engines
        Self {
            entity_storage: config
                .entity_storage
                .as_ref()
                .map(|s| s.clone())
                .unwrap_or_else(storage::entity_mem::new),
            blob_storage: config
                .blob_storage
                .as_ref()
                .map(|s| s.clone())
                .unwrap_or_else(|| {
                    storage::blob_mem::new(&storage::blob_mem::Config::default())
                }),
            action_cache: std::sync::Mutex::new(lru::LruCache::new(
                std::num::NonZero::new(ACTION_CACHE_CAPACITY).unwrap(),
            )),
            max_blob_retries: config.max_blob_retries.max(1),
            presign_ttl: std::time::Duration::from_secs(config.presign_ttl_secs),
        }
    }

    pub fn entity_storage(&self) -> &Arc<dyn storage::EntityStorage> {
        &self.entity_storage
    }

    pub(crate) fn cache_get(&self, key: &EntityKey) -> Option<Action> {
        self.action_cache
            .lock()
            .trace_expect("LRU cache lock error")
            .get(key)
            .cloned()
    }

    pub(crate) fn cache_put(&self, key: EntityKey, action: Action) {
        self.action_cache
            .lock()
            .trace_expect("LRU cache lock error")
            .put(key, action);
    }

    pub(crate) fn cache_pop(&self, key: &EntityKey) {
        self.action_cache
            .lock()
            .trace_expect("LRU cache lock error")
            .pop(key);
    }

    pub(crate) fn cache_clear(&self) {
        self.action_cache
            .lock()
            .trace_expect("LRU cache lock error")
            .clear();
    }

    /// Validate, hash and persist action code. Returns the content address.
    #[instrument(skip(self, data))]
    pub async fn save_code(
        &self,
        namespace: &str,
        action: &str,
        data: Bytes,
    ) -> Result<String, Error> {
        if data.is_empty() {
            return Err(Error::validation(
                "action code cannot be empty",
                Some("exec.code"),
            ));
        }
        if data.len() > entity::MAX_CODE_SIZE {
            return Err(Error::validation(
                format!(
                    "action code size ({} bytes) exceeds maximum of {} bytes",
                    data.len(),
                    entity::MAX_CODE_SIZE
                ),
                Some("exec.code"),
            ));
        }

        let code_hash = hash(&data);
        let key = BlobKey::new(namespace, action, &code_hash);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.blob_storage.put(&key, data.clone()).await {
                Ok(()) => break,
                Err(e) if attempt < self.max_blob_retries => {
                    warn!(
                        "Blob store put failed (attempt {attempt}/{}): {e}",
                        self.max_blob_retries
                    );
                }
                Err(e) => {
                    return Err(Error::ServiceUnavailable(format!(
                        "blob store unavailable after {attempt} attempts: {e}"
                    )));
                }
            }
        }

        debug!("Stored action code {key} ({} bytes)", data.len());
        Ok(code_hash)
    }

    pub async fn load_code(&self, key: &BlobKey) -> Result<Bytes, Error> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.blob_storage.get(key).await {
                Ok(Some(data)) => return Ok(data),
                Ok(None) => return Err(Error::not_found(format!("code blob {key}"))),
                Err(e) if attempt < self.max_blob_retries => {
                    warn!(
                        "Blob store get failed (attempt {attempt}/{}): {e}",
                        self.max_blob_retries
                    );
                }
                Err(e) => {
                    return Err(Error::ServiceUnavailable(format!(
                        "blob store unavailable after {attempt} attempts: {e}"
                    )));
                }
            }
        }
    }

    pub async fn delete_code(&self, key: &BlobKey) -> Result<bool, Error> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.blob_storage.remove(key).await {
                Ok(found) => return Ok(found),
                Err(e) if attempt < self.max_blob_retries => {
                    warn!(
                        "Blob store delete failed (attempt {attempt}/{}): {e}",
                        self.max_blob_retries
                    );
                }
                Err(e) => {
                    return Err(Error::ServiceUnavailable(format!(
                        "blob store unavailable after {attempt} attempts: {e}"
                    )));
                }
            }
        }
    }

    /// Credential-free URL for invokers, when the blob backend supports it.
    pub async fn presign_code(&self, key: &BlobKey) -> Result<Option<String>, Error> {
        self.blob_storage
            .presign_get(key, self.presign_ttl)
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("blob store unavailable: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_store() -> Store {
        Store::new(&config::Config::default())
    }

    #[test]
    fn sha256_content_address() {
        // sha256("") and sha256("abc") are pinned by the standard
        assert_eq!(
            hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn code_round_trip_and_duplicate_put() {
        let store = mem_store();
        let code = Bytes::from_static(b"def main(args): return args");

        let h1 = store.save_code("ns1", "hello", code.clone()).await.unwrap();
        let h2 = store.save_code("ns1", "hello", code.clone()).await.unwrap();
        assert_eq!(h1, h2, "duplicate puts must be no-ops with equal hashes");

        let key = BlobKey::new("ns1", "hello", &h1);
        assert_eq!(store.load_code(&key).await.unwrap(), code);

        assert!(store.delete_code(&key).await.unwrap());
        assert!(matches!(
            store.load_code(&key).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn code_size_boundary() {
        let store = mem_store();

        let at_limit = Bytes::from(vec![b'x'; entity::MAX_CODE_SIZE]);
        assert!(store.save_code("ns1", "big", at_limit).await.is_ok());

        let over_limit = Bytes::from(vec![b'x'; entity::MAX_CODE_SIZE + 1]);
        assert!(matches!(
            store.save_code("ns1", "big", over_limit).await,
            Err(Error::Validation { .. })
        ));
    }
}
