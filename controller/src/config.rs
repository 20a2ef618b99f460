use super::*;

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Object-store bucket advertised to invokers in code references.
    pub code_bucket: String,

    /// Per-call retry budget for blob store operations.
    pub max_blob_retries: u32,

    /// Seconds a presigned code URL stays valid.
    pub presign_ttl_secs: u64,

    #[serde(skip)]
    pub entity_storage: Option<Arc<dyn storage::EntityStorage>>,

    #[serde(skip)]
    pub blob_storage: Option<Arc<dyn storage::BlobStorage>>,

    #[serde(skip)]
    pub broker: Option<Arc<dyn broker::MessageBroker>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            code_bucket: "whisk".into(),
            max_blob_retries: 3,
            presign_ttl_secs: 3600,
            entity_storage: None,
            blob_storage: None,
            broker: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("code_bucket", &self.code_bucket)
            .field("max_blob_retries", &self.max_blob_retries)
            .field("presign_ttl_secs", &self.presign_ttl_secs)
            .finish()
    }
}
