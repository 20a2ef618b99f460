use super::*;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    namespaces: BTreeMap<String, Namespace>,
    entities: BTreeMap<(EntityKind, EntityKey), Entity>,
    activations: HashMap<Uuid, Activation>,
}

#[derive(Default)]
struct Storage {
    inner: RwLock<Inner>,
}

#[async_trait]
impl EntityStorage for Storage {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        Ok(self.inner.read().await.namespaces.get(name).cloned())
    }

    async fn insert_namespace(&self, namespace: &Namespace) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.namespaces.contains_key(&namespace.name) {
            return Ok(false);
        }
        inner
            .namespaces
            .insert(namespace.name.clone(), namespace.clone());
        Ok(true)
    }

    async fn remove_namespace(&self, name: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.namespaces.remove(name).is_none() {
            return Ok(false);
        }
        inner.entities.retain(|(_, key), _| key.namespace != name);
        inner.activations.retain(|_, a| a.namespace != name);
        Ok(true)
    }

    async fn list_namespaces(&self, owner: &str) -> Result<Vec<Namespace>> {
        Ok(self
            .inner
            .read()
            .await
            .namespaces
            .values()
            .filter(|ns| ns.owner == owner)
            .cloned()
            .collect())
    }

    async fn find_namespace_by_auth(&self, auth_uuid: &Uuid) -> Result<Option<Namespace>> {
        Ok(self
            .inner
            .read()
            .await
            .namespaces
            .values()
            .find(|ns| &ns.auth_uuid == auth_uuid)
            .cloned())
    }

    async fn get(&self, kind: EntityKind, key: &EntityKey) -> Result<Option<Entity>> {
        Ok(self
            .inner
            .read()
            .await
            .entities
            .get(&(kind, key.clone()))
            .cloned())
    }

    async fn upsert(&self, entity: &Entity, overwrite: bool) -> Result<Upsert> {
        let mut inner = self.inner.write().await;
        let slot = (entity.kind(), entity.key());
        if inner.entities.contains_key(&slot) {
            if !overwrite {
                return Ok(Upsert::Conflict);
            }
            inner.entities.insert(slot, entity.clone());
            Ok(Upsert::Replaced)
        } else {
            inner.entities.insert(slot, entity.clone());
            Ok(Upsert::Created)
        }
    }

    async fn remove(&self, kind: EntityKind, key: &EntityKey) -> Result<bool> {
        Ok(self
            .inner
            .write()
            .await
            .entities
            .remove(&(kind, key.clone()))
            .is_some())
    }

    async fn list(
        &self,
        kind: EntityKind,
        namespace: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let inner = self.inner.read().await;
        let mut entities = inner
            .entities
            .iter()
            .filter(|((k, key), _)| *k == kind && key.namespace == namespace)
            .map(|(_, e)| e.clone())
            .collect::<Vec<_>>();
        entities.sort_by(|a, b| a.key().name.cmp(&b.key().name));
        Ok(entities.into_iter().skip(skip).take(limit).collect())
    }

    async fn actions_in_package(&self, namespace: &str, package: &str) -> Result<Vec<Action>> {
        let inner = self.inner.read().await;
        Ok(inner
            .entities
            .iter()
            .filter_map(|((k, key), e)| match (k, e) {
                (EntityKind::Action, Entity::Action(a))
                    if key.namespace == namespace && key.package.as_deref() == Some(package) =>
                {
                    Some(a.clone())
                }
                _ => None,
            })
            .collect())
    }

    async fn rules_for_trigger(&self, namespace: &str, trigger: &str) -> Result<Vec<Rule>> {
        let inner = self.inner.read().await;
        Ok(inner
            .entities
            .values()
            .filter_map(|e| match e {
                Entity::Rule(r) if r.namespace == namespace && r.trigger == trigger => {
                    Some(r.clone())
                }
                _ => None,
            })
            .collect())
    }

    async fn rules_for_action(&self, namespace: &str, action_path: &str) -> Result<Vec<Rule>> {
        let inner = self.inner.read().await;
        Ok(inner
            .entities
            .values()
            .filter_map(|e| match e {
                Entity::Rule(r) if r.namespace == namespace && r.action == action_path => {
                    Some(r.clone())
                }
                _ => None,
            })
            .collect())
    }

    async fn create_activation(&self, record: &Activation) -> Result<()> {
        self.inner
            .write()
            .await
            .activations
            .insert(record.activation_id, record.clone());
        Ok(())
    }

    async fn update_activation(&self, id: &Uuid, update: &ActivationUpdate) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(activation) = inner.activations.get_mut(id) else {
            return Ok(false);
        };
        if activation.is_terminal() {
            return Ok(false);
        }
        activation.end = Some(update.end);
        activation.duration = Some(update.duration);
        activation.status_code = update.status_code;
        activation.response = update.response.clone();
        activation.logs = update.logs.clone();
        for (key, value) in &update.annotations {
            activation.annotations.insert(key.clone(), value.clone());
        }
        Ok(true)
    }

    async fn get_activation(&self, namespace: &str, id: &Uuid) -> Result<Option<Activation>> {
        Ok(self
            .inner
            .read()
            .await
            .activations
            .get(id)
            .filter(|a| a.namespace == namespace)
            .cloned())
    }

    async fn find_activation(&self, id: &Uuid) -> Result<Option<Activation>> {
        Ok(self.inner.read().await.activations.get(id).cloned())
    }

    async fn list_activations(
        &self,
        namespace: &str,
        filter: &ActivationFilter,
    ) -> Result<Vec<Activation>> {
        let inner = self.inner.read().await;
        let mut activations = inner
            .activations
            .values()
            .filter(|a| a.namespace == namespace && filter.matches(a))
            .cloned()
            .collect::<Vec<_>>();
        // Newest first, activation id as the deterministic tie-break
        activations.sort_by(|a, b| {
            b.start
                .cmp(&a.start)
                .then_with(|| a.activation_id.cmp(&b.activation_id))
        });
        Ok(activations
            .into_iter()
            .skip(filter.skip)
            .take(filter.limit)
            .collect())
    }
}

pub fn new() -> Arc<dyn EntityStorage> {
    Arc::new(Storage::default())
}
