use super::*;
use activation::{Activation, ActivationFilter};
use entity::{
    Action, Entity, EntityKey, EntityKind, Exec, Namespace, Package, Rule, RuleStatus, Trigger,
};
use storage::{BlobKey, Upsert};
use store::Store;
use uuid::Uuid;

/// Bindings are resolved on read with a bounded walk; anything deeper than
/// this (including a cycle) fails the read.
const MAX_BINDING_DEPTH: usize = 8;

fn assign_version(requested: &str, existing: Option<&str>) -> String {
    if !requested.is_empty() {
        return requested.to_string();
    }
    match existing {
        Some(version) => entity::bump_patch(version),
        None => entity::INITIAL_VERSION.to_string(),
    }
}

impl Store {
    async fn require_namespace(&self, name: &str) -> Result<Namespace, Error> {
        self.entity_storage()
            .get_namespace(name)
            .await
            .map_err(Error::Storage)?
            .ok_or_else(|| Error::not_found(format!("namespace {name}")))
    }

    async fn get_entity(&self, kind: EntityKind, key: &EntityKey) -> Result<Option<Entity>, Error> {
        self.entity_storage()
            .get(kind, key)
            .await
            .map_err(Error::Storage)
    }

    async fn upsert_entity(&self, entity: &Entity, overwrite: bool) -> Result<(), Error> {
        match self
            .entity_storage()
            .upsert(entity, overwrite)
            .await
            .map_err(Error::Storage)?
        {
            Upsert::Created | Upsert::Replaced => Ok(()),
            Upsert::Conflict => Err(Error::Conflict(format!(
                "{} {} already exists, use overwrite",
                entity.kind(),
                entity.key().name
            ))),
        }
    }

    // --- Namespaces ---

    pub async fn create_namespace(&self, namespace: Namespace) -> Result<Namespace, Error> {
        fqn::validate_name(&namespace.name, "namespace")?;
        if !self
            .entity_storage()
            .insert_namespace(&namespace)
            .await
            .map_err(Error::Storage)?
        {
            return Err(Error::Conflict(format!(
                "namespace {} already exists",
                namespace.name
            )));
        }
        info!("Created namespace: {}", namespace.name);
        Ok(namespace)
    }

    pub async fn namespace(&self, name: &str) -> Result<Namespace, Error> {
        self.require_namespace(name).await
    }

    pub async fn list_namespaces(&self, owner: &str) -> Result<Vec<Namespace>, Error> {
        self.entity_storage()
            .list_namespaces(owner)
            .await
            .map_err(Error::Storage)
    }

    pub async fn delete_namespace(&self, name: &str) -> Result<(), Error> {
        // Code blobs are content-addressed per action, remove them before
        // the rows that reference them go away
        for action in self
            .entity_storage()
            .list(EntityKind::Action, name, 0, usize::MAX)
            .await
            .map_err(Error::Storage)?
        {
            if let Entity::Action(action) = action {
                if let Some(code_hash) = &action.code_hash {
                    _ = self
                        .delete_code(&BlobKey::new(name, &action.name, code_hash))
                        .await
                        .inspect_err(|e| warn!("Failed to delete code blob: {e}"));
                }
            }
        }

        if !self
            .entity_storage()
            .remove_namespace(name)
            .await
            .map_err(Error::Storage)?
        {
            return Err(Error::not_found(format!("namespace {name}")));
        }
        self.cache_clear();
        info!("Deleted namespace: {name}");
        Ok(())
    }

    /// Resolve Basic-auth credentials to the namespace they belong to.
    pub async fn authenticate(&self, auth_uuid: &Uuid, auth_key: &str) -> Result<Namespace, Error> {
        let namespace = self
            .entity_storage()
            .find_namespace_by_auth(auth_uuid)
            .await
            .map_err(Error::Storage)?
            .ok_or_else(|| Error::Auth("invalid API key".into()))?;
        if namespace.auth_key != auth_key {
            return Err(Error::Auth("invalid API key".into()));
        }
        Ok(namespace)
    }

    // --- Packages ---

    /// An empty `version` on the incoming entity means "unspecified": new
    /// entities get the initial version, overwrites get a patch bump.
    pub async fn put_package(&self, mut package: Package, overwrite: bool) -> Result<Package, Error> {
        fqn::validate_name(&package.name, "name")?;
        params::validate_size(&package.parameters, "parameters")?;
        params::validate_size(&package.annotations, "annotations")?;
        self.require_namespace(&package.namespace).await?;

        // A binding must point at an existing package at creation time
        if let Some(binding) = &package.binding {
            let key = EntityKey::new(&binding.namespace, None, &binding.name);
            if self.get_entity(EntityKind::Package, &key).await?.is_none() {
                return Err(Error::not_found(format!(
                    "bound package /{}/{}",
                    binding.namespace, binding.name
                )));
            }
        }

        let key = EntityKey::new(&package.namespace, None, &package.name);
        let existing = self.get_entity(EntityKind::Package, &key).await?;
        package.version = assign_version(
            &package.version,
            existing.as_ref().map(|e| e.version()),
        );

        self.upsert_entity(&Entity::Package(package.clone()), overwrite)
            .await?;
        Ok(package)
    }

    /// Read a package with its binding chain resolved: parameters inherit
    /// from the bound package, nearer packages winning.
    pub async fn package(&self, namespace: &str, name: &str) -> Result<Package, Error> {
        let mut package = self.raw_package(namespace, name).await?;

        let mut merged = package.parameters.clone();
        let mut binding = package.binding.clone();
        let mut depth = 0;
        while let Some(target) = binding {
            depth += 1;
            if depth > MAX_BINDING_DEPTH {
                return Err(Error::validation(
                    format!("package binding chain exceeds depth {MAX_BINDING_DEPTH}"),
                    Some("binding"),
                ));
            }
            let target = self.raw_package(&target.namespace, &target.name).await?;
            merged = params::merge(&target.parameters, &merged);
            binding = target.binding;
        }

        package.parameters = merged;
        Ok(package)
    }

    async fn raw_package(&self, namespace: &str, name: &str) -> Result<Package, Error> {
        match self
            .get_entity(EntityKind::Package, &EntityKey::new(namespace, None, name))
            .await?
        {
            Some(Entity::Package(package)) => Ok(package),
            _ => Err(Error::not_found(format!("package /{namespace}/{name}"))),
        }
    }

    pub async fn delete_package(&self, namespace: &str, name: &str, force: bool) -> Result<(), Error> {
        self.raw_package(namespace, name).await?;

        let contained = self
            .entity_storage()
            .actions_in_package(namespace, name)
            .await
            .map_err(Error::Storage)?;

        if !contained.is_empty() {
            if !force {
                return Err(Error::Conflict(format!(
                    "package {name} is not empty, use force to delete its {} actions",
                    contained.len()
                )));
            }
            for action in contained {
                self.delete_action(namespace, &action.fqn().path()).await?;
            }
        }

        self.entity_storage()
            .remove(EntityKind::Package, &EntityKey::new(namespace, None, name))
            .await
            .map_err(Error::Storage)?;
        info!("Deleted package: /{namespace}/{name}");
        Ok(())
    }

    pub async fn list_packages(
        &self,
        namespace: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Package>, Error> {
        Ok(self
            .entity_storage()
            .list(EntityKind::Package, namespace, skip, limit)
            .await
            .map_err(Error::Storage)?
            .into_iter()
            .filter_map(|e| match e {
                Entity::Package(p) => Some(p),
                _ => None,
            })
            .collect())
    }

    // --- Actions ---

    /// Create or overwrite an action. `code` is required when creating a
    /// code-bearing action and ignored for sequences; an overwrite without
    /// code keeps the existing blob.
    #[instrument(skip(self, action, code), fields(action = %action.fqn()))]
    pub async fn put_action(
        &self,
        mut action: Action,
        code: Option<Bytes>,
        overwrite: bool,
    ) -> Result<Action, Error> {
        fqn::validate_name(&action.name, "name")?;
        action.exec.validate()?;
        action.limits.validate()?;
        params::validate_size(&action.parameters, "parameters")?;
        params::validate_size(&action.annotations, "annotations")?;
        self.require_namespace(&action.namespace).await?;
        if let Some(package) = &action.package {
            self.raw_package(&action.namespace, package).await?;
        }

        let key = EntityKey::new(&action.namespace, action.package.as_deref(), &action.name);
        let existing = match self.get_entity(EntityKind::Action, &key).await? {
            Some(Entity::Action(existing)) => Some(existing),
            _ => None,
        };

        // Refuse before the code blob gets written
        if existing.is_some() && !overwrite {
            return Err(Error::Conflict(format!(
                "action {} already exists, use overwrite",
                action.name
            )));
        }

        match &action.exec {
            Exec::Sequence { .. } => {
                action.code_hash = None;
            }
            Exec::Code { .. } => {
                action.code_hash = match code {
                    Some(code) => Some(
                        self.save_code(&action.namespace, &action.name, code)
                            .await?,
                    ),
                    None => match existing.as_ref().and_then(|e| e.code_hash.clone()) {
                        Some(code_hash) => Some(code_hash),
                        None => {
                            return Err(Error::validation(
                                "action code is required",
                                Some("exec.code"),
                            ));
                        }
                    },
                };
            }
        }

        action.version = assign_version(
            &action.version,
            existing.as_ref().map(|e| e.version.as_str()),
        );

        self.upsert_entity(&Entity::Action(action.clone()), overwrite)
            .await?;
        self.cache_pop(&key);
        Ok(action)
    }

    /// Resolve `name` or `package/name` within a namespace.
    pub async fn resolve_action(&self, namespace: &str, path: &str) -> Result<Action, Error> {
        let (package, name) = fqn::Fqn::split_path(path)?;
        let key = EntityKey::new(namespace, package, name);

        if let Some(action) = self.cache_get(&key) {
            return Ok(action);
        }

        match self.get_entity(EntityKind::Action, &key).await? {
            Some(Entity::Action(action)) => {
                self.cache_put(key, action.clone());
                Ok(action)
            }
            _ => Err(Error::not_found(format!("action /{namespace}/{path}"))),
        }
    }

    pub async fn action_code(&self, action: &Action) -> Result<Bytes, Error> {
        let code_hash = action.code_hash.as_ref().ok_or_else(|| {
            Error::validation("sequences carry no code", Some("exec.code"))
        })?;
        self.load_code(&BlobKey::new(&action.namespace, &action.name, code_hash))
            .await
    }

    pub async fn delete_action(&self, namespace: &str, path: &str) -> Result<(), Error> {
        let action = self.resolve_action(namespace, path).await?;

        // Rules bound to a vanished action are useless, take them along
        for rule in self
            .entity_storage()
            .rules_for_action(namespace, path)
            .await
            .map_err(Error::Storage)?
        {
            self.entity_storage()
                .remove(EntityKind::Rule, &EntityKey::new(namespace, None, &rule.name))
                .await
                .map_err(Error::Storage)?;
            debug!("Deleted rule {} referencing action {path}", rule.name);
        }

        if let Some(code_hash) = &action.code_hash {
            _ = self
                .delete_code(&BlobKey::new(namespace, &action.name, code_hash))
                .await
                .inspect_err(|e| warn!("Failed to delete code blob: {e}"));
        }

        let key = EntityKey::new(namespace, action.package.as_deref(), &action.name);
        self.entity_storage()
            .remove(EntityKind::Action, &key)
            .await
            .map_err(Error::Storage)?;
        self.cache_pop(&key);
        info!("Deleted action: /{namespace}/{path}");
        Ok(())
    }

    pub async fn list_actions(
        &self,
        namespace: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Action>, Error> {
        Ok(self
            .entity_storage()
            .list(EntityKind::Action, namespace, skip, limit)
            .await
            .map_err(Error::Storage)?
            .into_iter()
            .filter_map(|e| match e {
                Entity::Action(a) => Some(a),
                _ => None,
            })
            .collect())
    }

    // --- Triggers ---

    pub async fn put_trigger(&self, mut trigger: Trigger, overwrite: bool) -> Result<Trigger, Error> {
        fqn::validate_name(&trigger.name, "name")?;
        params::validate_size(&trigger.parameters, "parameters")?;
        params::validate_size(&trigger.annotations, "annotations")?;
        self.require_namespace(&trigger.namespace).await?;

        let key = EntityKey::new(&trigger.namespace, None, &trigger.name);
        let existing = self.get_entity(EntityKind::Trigger, &key).await?;
        trigger.version = assign_version(
            &trigger.version,
            existing.as_ref().map(|e| e.version()),
        );

        self.upsert_entity(&Entity::Trigger(trigger.clone()), overwrite)
            .await?;
        Ok(trigger)
    }

    pub async fn trigger(&self, namespace: &str, name: &str) -> Result<Trigger, Error> {
        match self
            .get_entity(EntityKind::Trigger, &EntityKey::new(namespace, None, name))
            .await?
        {
            Some(Entity::Trigger(trigger)) => Ok(trigger),
            _ => Err(Error::not_found(format!("trigger /{namespace}/{name}"))),
        }
    }

    pub async fn delete_trigger(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.trigger(namespace, name).await?;

        for rule in self
            .entity_storage()
            .rules_for_trigger(namespace, name)
            .await
            .map_err(Error::Storage)?
        {
            self.entity_storage()
                .remove(EntityKind::Rule, &EntityKey::new(namespace, None, &rule.name))
                .await
                .map_err(Error::Storage)?;
            debug!("Deleted rule {} referencing trigger {name}", rule.name);
        }

        self.entity_storage()
            .remove(EntityKind::Trigger, &EntityKey::new(namespace, None, name))
            .await
            .map_err(Error::Storage)?;
        info!("Deleted trigger: /{namespace}/{name}");
        Ok(())
    }

    pub async fn list_triggers(
        &self,
        namespace: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Trigger>, Error> {
        Ok(self
            .entity_storage()
            .list(EntityKind::Trigger, namespace, skip, limit)
            .await
            .map_err(Error::Storage)?
            .into_iter()
            .filter_map(|e| match e {
                Entity::Trigger(t) => Some(t),
                _ => None,
            })
            .collect())
    }

    // --- Rules ---

    /// Trigger and action must both exist in the rule's namespace.
    pub async fn put_rule(&self, mut rule: Rule, overwrite: bool) -> Result<Rule, Error> {
        fqn::validate_name(&rule.name, "name")?;
        self.require_namespace(&rule.namespace).await?;
        self.trigger(&rule.namespace, &rule.trigger).await?;
        self.resolve_action(&rule.namespace, &rule.action).await?;

        let key = EntityKey::new(&rule.namespace, None, &rule.name);
        let existing = self.get_entity(EntityKind::Rule, &key).await?;
        rule.version = assign_version(&rule.version, existing.as_ref().map(|e| e.version()));

        self.upsert_entity(&Entity::Rule(rule.clone()), overwrite)
            .await?;
        Ok(rule)
    }

    pub async fn rule(&self, namespace: &str, name: &str) -> Result<Rule, Error> {
        match self
            .get_entity(EntityKind::Rule, &EntityKey::new(namespace, None, name))
            .await?
        {
            Some(Entity::Rule(rule)) => Ok(rule),
            _ => Err(Error::not_found(format!("rule /{namespace}/{name}"))),
        }
    }

    pub async fn delete_rule(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.rule(namespace, name).await?;
        self.entity_storage()
            .remove(EntityKind::Rule, &EntityKey::new(namespace, None, name))
            .await
            .map_err(Error::Storage)?;
        info!("Deleted rule: /{namespace}/{name}");
        Ok(())
    }

    pub async fn set_rule_status(
        &self,
        namespace: &str,
        name: &str,
        status: RuleStatus,
    ) -> Result<Rule, Error> {
        let mut rule = self.rule(namespace, name).await?;
        rule.status = status;
        self.upsert_entity(&Entity::Rule(rule.clone()), true).await?;
        Ok(rule)
    }

    pub async fn list_rules(
        &self,
        namespace: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Rule>, Error> {
        Ok(self
            .entity_storage()
            .list(EntityKind::Rule, namespace, skip, limit)
            .await
            .map_err(Error::Storage)?
            .into_iter()
            .filter_map(|e| match e {
                Entity::Rule(r) => Some(r),
                _ => None,
            })
            .collect())
    }

    /// Active rules for a trigger, ordered by rule name for deterministic
    /// fan-out.
    pub async fn active_rules_for_trigger(
        &self,
        namespace: &str,
        trigger: &str,
    ) -> Result<Vec<Rule>, Error> {
        let mut rules = self
            .entity_storage()
            .rules_for_trigger(namespace, trigger)
            .await
            .map_err(Error::Storage)?
            .into_iter()
            .filter(|r| r.status == RuleStatus::Active)
            .collect::<Vec<_>>();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rules)
    }

    // --- Activations ---

    pub async fn activation(&self, namespace: &str, id: &Uuid) -> Result<Activation, Error> {
        self.entity_storage()
            .get_activation(namespace, id)
            .await
            .map_err(Error::Storage)?
            .ok_or_else(|| Error::not_found(format!("activation {id}")))
    }

    pub async fn list_activations(
        &self,
        namespace: &str,
        filter: &ActivationFilter,
    ) -> Result<Vec<Activation>, Error> {
        self.entity_storage()
            .list_activations(namespace, filter)
            .await
            .map_err(Error::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity::Binding;

    fn test_namespace(name: &str) -> Namespace {
        Namespace {
            name: name.into(),
            uuid: Uuid::new_v4(),
            owner: "owner@example.com".into(),
            description: None,
            limits: params::Map::new(),
            auth_uuid: Uuid::new_v4(),
            auth_key: "secret".into(),
        }
    }

    fn test_package(namespace: &str, name: &str) -> Package {
        Package {
            namespace: namespace.into(),
            name: name.into(),
            version: String::new(),
            publish: false,
            parameters: params::Map::new(),
            annotations: params::Map::new(),
            binding: None,
        }
    }

    fn test_action(namespace: &str, name: &str) -> Action {
        Action {
            namespace: namespace.into(),
            package: None,
            name: name.into(),
            version: String::new(),
            publish: false,
            exec: Exec::Code {
                kind: "python:3.12".into(),
                main: Some("main".into()),
                binary: false,
                image: None,
            },
            limits: entity::Limits::default(),
            parameters: params::Map::new(),
            annotations: params::Map::new(),
            code_hash: None,
        }
    }

    fn test_trigger(namespace: &str, name: &str) -> Trigger {
        Trigger {
            namespace: namespace.into(),
            name: name.into(),
            version: String::new(),
            publish: false,
            parameters: params::Map::new(),
            annotations: params::Map::new(),
            feed: None,
        }
    }

    async fn store_with_namespace(name: &str) -> Store {
        let store = Store::new(&config::Config::default());
        store.create_namespace(test_namespace(name)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn overwrite_conflict_and_version_bump() {
        let store = store_with_namespace("ns1").await;

        let created = store
            .put_package(test_package("ns1", "p"), false)
            .await
            .unwrap();
        assert_eq!(created.version, "0.0.1");

        assert!(matches!(
            store.put_package(test_package("ns1", "p"), false).await,
            Err(Error::Conflict(_))
        ));

        let replaced = store
            .put_package(test_package("ns1", "p"), true)
            .await
            .unwrap();
        assert_eq!(replaced.version, "0.0.2");
    }

    #[tokio::test]
    async fn binding_resolves_and_inherits_parameters() {
        let store = store_with_namespace("ns1").await;

        let mut base = test_package("ns1", "base");
        base.parameters = params::from_list(&[
            params::KeyValue {
                key: "from_base".into(),
                value: serde_json::json!(1),
            },
            params::KeyValue {
                key: "shared".into(),
                value: serde_json::json!("base"),
            },
        ]);
        store.put_package(base, false).await.unwrap();

        let mut bound = test_package("ns1", "bound");
        bound.binding = Some(Binding {
            namespace: "ns1".into(),
            name: "base".into(),
        });
        bound.parameters = params::from_list(&[params::KeyValue {
            key: "shared".into(),
            value: serde_json::json!("bound"),
        }]);
        store.put_package(bound, false).await.unwrap();

        let resolved = store.package("ns1", "bound").await.unwrap();
        assert_eq!(resolved.parameters["from_base"], serde_json::json!(1));
        assert_eq!(resolved.parameters["shared"], serde_json::json!("bound"));

        // Binding to a missing package is rejected at creation
        let mut dangling = test_package("ns1", "dangling");
        dangling.binding = Some(Binding {
            namespace: "ns1".into(),
            name: "no-such".into(),
        });
        assert!(matches!(
            store.put_package(dangling, false).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn binding_cycle_fails_read() {
        let store = store_with_namespace("ns1").await;

        store
            .put_package(test_package("ns1", "a"), false)
            .await
            .unwrap();
        let mut b = test_package("ns1", "b");
        b.binding = Some(Binding {
            namespace: "ns1".into(),
            name: "a".into(),
        });
        store.put_package(b, false).await.unwrap();

        // Close the loop a -> b -> a
        let mut a = test_package("ns1", "a");
        a.binding = Some(Binding {
            namespace: "ns1".into(),
            name: "b".into(),
        });
        store.put_package(a, true).await.unwrap();

        assert!(matches!(
            store.package("ns1", "a").await,
            Err(Error::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn package_delete_requires_force_when_not_empty() {
        let store = store_with_namespace("ns1").await;
        store
            .put_package(test_package("ns1", "p"), false)
            .await
            .unwrap();

        let mut action = test_action("ns1", "inner");
        action.package = Some("p".into());
        store
            .put_action(action, Some(Bytes::from_static(b"code")), false)
            .await
            .unwrap();

        assert!(matches!(
            store.delete_package("ns1", "p", false).await,
            Err(Error::Conflict(_))
        ));

        store.delete_package("ns1", "p", true).await.unwrap();
        assert!(store.resolve_action("ns1", "p/inner").await.is_err());
    }

    #[tokio::test]
    async fn action_delete_cascades_rules() {
        let store = store_with_namespace("ns1").await;
        store
            .put_action(
                test_action("ns1", "a"),
                Some(Bytes::from_static(b"code")),
                false,
            )
            .await
            .unwrap();
        store
            .put_trigger(test_trigger("ns1", "t"), false)
            .await
            .unwrap();
        store
            .put_rule(
                Rule {
                    namespace: "ns1".into(),
                    name: "r".into(),
                    version: String::new(),
                    trigger: "t".into(),
                    action: "a".into(),
                    status: RuleStatus::Active,
                },
                false,
            )
            .await
            .unwrap();

        store.delete_action("ns1", "a").await.unwrap();
        assert!(matches!(store.rule("ns1", "r").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn rule_requires_trigger_and_action() {
        let store = store_with_namespace("ns1").await;
        store
            .put_trigger(test_trigger("ns1", "t"), false)
            .await
            .unwrap();

        let rule = Rule {
            namespace: "ns1".into(),
            name: "r".into(),
            version: String::new(),
            trigger: "t".into(),
            action: "missing".into(),
            status: RuleStatus::Active,
        };
        assert!(matches!(
            store.put_rule(rule, false).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn create_action_without_code_fails() {
        let store = store_with_namespace("ns1").await;
        assert!(matches!(
            store.put_action(test_action("ns1", "a"), None, false).await,
            Err(Error::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn overwrite_without_code_keeps_blob() {
        let store = store_with_namespace("ns1").await;
        let created = store
            .put_action(
                test_action("ns1", "a"),
                Some(Bytes::from_static(b"original")),
                false,
            )
            .await
            .unwrap();

        let replaced = store
            .put_action(test_action("ns1", "a"), None, true)
            .await
            .unwrap();
        assert_eq!(replaced.code_hash, created.code_hash);
        assert_eq!(
            store.action_code(&replaced).await.unwrap(),
            Bytes::from_static(b"original")
        );
    }

    #[tokio::test]
    async fn authenticate_checks_key() {
        let store = Store::new(&config::Config::default());
        let namespace = test_namespace("ns1");
        let auth_uuid = namespace.auth_uuid;
        store.create_namespace(namespace).await.unwrap();

        assert!(store.authenticate(&auth_uuid, "secret").await.is_ok());
        assert!(matches!(
            store.authenticate(&auth_uuid, "wrong").await,
            Err(Error::Auth(_))
        ));
        assert!(matches!(
            store.authenticate(&Uuid::new_v4(), "secret").await,
            Err(Error::Auth(_))
        ));
    }
}
