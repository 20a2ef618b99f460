use super::*;
use activation::{Activation, ActivationFilter, ActivationUpdate};
use entity::{Action, Entity, EntityKey, EntityKind, Namespace, Rule};
use uuid::Uuid;

pub mod blob_mem;
pub mod entity_mem;

pub type Error = Box<dyn core::error::Error + Send + Sync>;
pub type Result<T> = core::result::Result<T, Error>;

/// Outcome of an entity upsert against an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Replaced,
    /// Key exists and `overwrite` was false.
    Conflict,
}

/// Authoritative store for namespaces, catalog entities and activations.
///
/// Each call is atomic with respect to concurrent readers; no cross-entity
/// transaction is ever required of a backend. Cascade logic lives above, in
/// the store façade, and is expressed through the dependency queries here.
#[async_trait]
pub trait EntityStorage: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    /// Returns false if a namespace with this name already exists.
    async fn insert_namespace(&self, namespace: &Namespace) -> Result<bool>;

    /// Removes the namespace and everything it owns. Returns false if the
    /// namespace did not exist.
    async fn remove_namespace(&self, name: &str) -> Result<bool>;

    async fn list_namespaces(&self, owner: &str) -> Result<Vec<Namespace>>;

    async fn find_namespace_by_auth(&self, auth_uuid: &Uuid) -> Result<Option<Namespace>>;

    async fn get(&self, kind: EntityKind, key: &EntityKey) -> Result<Option<Entity>>;

    async fn upsert(&self, entity: &Entity, overwrite: bool) -> Result<Upsert>;

    /// Returns false if the entity did not exist.
    async fn remove(&self, kind: EntityKind, key: &EntityKey) -> Result<bool>;

    /// Catalog listing, ordered by name ascending.
    async fn list(
        &self,
        kind: EntityKind,
        namespace: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Entity>>;

    async fn actions_in_package(&self, namespace: &str, package: &str) -> Result<Vec<Action>>;

    /// Rules bound to the named trigger, ordered by rule name ascending.
    async fn rules_for_trigger(&self, namespace: &str, trigger: &str) -> Result<Vec<Rule>>;

    /// Rules whose action reference is the given action path.
    async fn rules_for_action(&self, namespace: &str, action_path: &str) -> Result<Vec<Rule>>;

    async fn create_activation(&self, record: &Activation) -> Result<()>;

    /// Applies the terminal update once. Returns false when the record is
    /// already terminal or unknown, making finalization idempotent.
    async fn update_activation(&self, id: &Uuid, update: &ActivationUpdate) -> Result<bool>;

    async fn get_activation(&self, namespace: &str, id: &Uuid) -> Result<Option<Activation>>;

    /// Lookup by id alone; activation ids are unique across namespaces.
    async fn find_activation(&self, id: &Uuid) -> Result<Option<Activation>>;

    /// Ordered by `start` descending.
    async fn list_activations(
        &self,
        namespace: &str,
        filter: &ActivationFilter,
    ) -> Result<Vec<Activation>>;
}

/// Object key of an action code blob: `actions/{namespace}/{action}/{sha256}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobKey {
    pub namespace: String,
    pub action: String,
    pub hash: String,
}

impl BlobKey {
    pub fn new(namespace: &str, action: &str, hash: &str) -> Self {
        Self {
            namespace: namespace.into(),
            action: action.into(),
            hash: hash.into(),
        }
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "actions/{}/{}/{}", self.namespace, self.action, self.hash)
    }
}

/// Content-addressed store for action code.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Duplicate puts of the same key are no-ops.
    async fn put(&self, key: &BlobKey, data: Bytes) -> Result<()>;

    async fn get(&self, key: &BlobKey) -> Result<Option<Bytes>>;

    /// Returns false if no such blob existed.
    async fn remove(&self, key: &BlobKey) -> Result<bool>;

    /// URL consumable without credentials for `expires_in`, or None when the
    /// backend cannot mint one.
    async fn presign_get(
        &self,
        key: &BlobKey,
        expires_in: std::time::Duration,
    ) -> Result<Option<String>>;
}
