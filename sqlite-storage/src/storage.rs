use super::*;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use whisk_controller::activation::{Activation, ActivationFilter, ActivationUpdate};
use whisk_controller::async_trait;
use whisk_controller::entity::{Action, Entity, EntityKey, EntityKind, Namespace, Rule};
use whisk_controller::storage::{EntityStorage, Upsert};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("database schema v{0} is newer than this build")]
    SchemaTooNew(u32),

    #[error("database schema v{0} requires an upgrade run")]
    UpgradeRequired(u32),

    #[error("failed to resolve local store directory")]
    NoDirectory,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub db_dir: Option<PathBuf>,
    pub db_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_dir: None,
            db_name: "entities.db".into(),
        }
    }
}

struct Storage {
    connection: Mutex<rusqlite::Connection>,
}

fn package_column(package: Option<&str>) -> &str {
    // '' stands for "no package" so the column can be part of the key
    package.unwrap_or("")
}

fn db_path(config: &Config) -> Result<PathBuf, Error> {
    let dir = match &config.db_dir {
        Some(dir) => dir.clone(),
        None => directories::ProjectDirs::from("dev", "whisk", "whisk-controller")
            .map(|dirs| dirs.data_local_dir().to_path_buf())
            .or_else(|| {
                cfg!(unix).then(|| std::path::Path::new("/var/spool").join("whisk-controller"))
            })
            .ok_or(Error::NoDirectory)?,
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join(&config.db_name))
}

pub fn new(
    config: &Config,
    upgrade: bool,
) -> Result<Arc<dyn EntityStorage>, Error> {
    let file_path = db_path(config)?;
    info!("Using database: {}", file_path.display());

    let mut connection = rusqlite::Connection::open_with_flags(
        &file_path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
            | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
            | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    connection.pragma_update(None, "journal_mode", "WAL")?;
    connection.pragma_update(None, "foreign_keys", "ON")?;

    migrate::migrate(&mut connection, upgrade)?;

    Ok(Arc::new(Storage {
        connection: Mutex::new(connection),
    }))
}

impl Storage {
    fn namespace_from_row(row: &rusqlite::Row) -> rusqlite::Result<Namespace> {
        let parse_uuid = |idx: usize| -> rusqlite::Result<Uuid> {
            row.get::<_, String>(idx)?.parse().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        };
        let limits: String = row.get(4)?;
        Ok(Namespace {
            name: row.get(0)?,
            uuid: parse_uuid(1)?,
            owner: row.get(2)?,
            description: row.get(3)?,
            limits: serde_json::from_str(&limits).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            auth_uuid: parse_uuid(5)?,
            auth_key: row.get(6)?,
        })
    }
}

#[async_trait]
impl EntityStorage for Storage {
    async fn get_namespace(
        &self,
        name: &str,
    ) -> whisk_controller::storage::Result<Option<Namespace>> {
        let connection = self.connection.lock().trace_expect("Failed to lock mutex");
        let mut stmt = connection.prepare_cached(
            "SELECT name, uuid, owner, description, limits, auth_uuid, auth_key \
             FROM namespaces WHERE name = ?1",
        )?;
        Ok(stmt
            .query_row([name], Self::namespace_from_row)
            .optional()?)
    }

    async fn insert_namespace(
        &self,
        namespace: &Namespace,
    ) -> whisk_controller::storage::Result<bool> {
        let connection = self.connection.lock().trace_expect("Failed to lock mutex");
        let mut stmt = connection.prepare_cached(
            "INSERT OR IGNORE INTO namespaces \
             (name, uuid, owner, description, limits, auth_uuid, auth_key) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        let inserted = stmt.execute(rusqlite::params![
            namespace.name,
            namespace.uuid.to_string(),
            namespace.owner,
            namespace.description,
            serde_json::to_string(&namespace.limits)?,
            namespace.auth_uuid.to_string(),
            namespace.auth_key,
        ])?;
        Ok(inserted > 0)
    }

    async fn remove_namespace(&self, name: &str) -> whisk_controller::storage::Result<bool> {
        let mut connection = self.connection.lock().trace_expect("Failed to lock mutex");
        let tx = connection.transaction()?;
        let removed = tx.execute("DELETE FROM namespaces WHERE name = ?1", [name])?;
        if removed > 0 {
            tx.execute("DELETE FROM entities WHERE namespace = ?1", [name])?;
            tx.execute("DELETE FROM activations WHERE namespace = ?1", [name])?;
        }
        tx.commit()?;
        Ok(removed > 0)
    }

    async fn list_namespaces(
        &self,
        owner: &str,
    ) -> whisk_controller::storage::Result<Vec<Namespace>> {
        let connection = self.connection.lock().trace_expect("Failed to lock mutex");
        let mut stmt = connection.prepare_cached(
            "SELECT name, uuid, owner, description, limits, auth_uuid, auth_key \
             FROM namespaces WHERE owner = ?1 ORDER BY name ASC",
        )?;
        let namespaces = stmt
            .query_map([owner], Self::namespace_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(namespaces)
    }

    async fn find_namespace_by_auth(
        &self,
        auth_uuid: &Uuid,
    ) -> whisk_controller::storage::Result<Option<Namespace>> {
        let connection = self.connection.lock().trace_expect("Failed to lock mutex");
        let mut stmt = connection.prepare_cached(
            "SELECT name, uuid, owner, description, limits, auth_uuid, auth_key \
             FROM namespaces WHERE auth_uuid = ?1",
        )?;
        Ok(stmt
            .query_row([auth_uuid.to_string()], Self::namespace_from_row)
            .optional()?)
    }

    async fn get(
        &self,
        kind: EntityKind,
        key: &EntityKey,
    ) -> whisk_controller::storage::Result<Option<Entity>> {
        let connection = self.connection.lock().trace_expect("Failed to lock mutex");
        let mut stmt = connection.prepare_cached(
            "SELECT document FROM entities \
             WHERE kind = ?1 AND namespace = ?2 AND package = ?3 AND name = ?4",
        )?;
        let document: Option<String> = stmt
            .query_row(
                rusqlite::params![
                    kind.to_string(),
                    key.namespace,
                    package_column(key.package.as_deref()),
                    key.name,
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(document.map(|d| serde_json::from_str(&d)).transpose()?)
    }

    async fn upsert(
        &self,
        entity: &Entity,
        overwrite: bool,
    ) -> whisk_controller::storage::Result<Upsert> {
        let key = entity.key();
        let kind = entity.kind().to_string();
        let package = package_column(key.package.as_deref()).to_string();
        let document = serde_json::to_string(entity)?;

        let connection = self.connection.lock().trace_expect("Failed to lock mutex");
        let exists: bool = connection
            .prepare_cached(
                "SELECT 1 FROM entities \
                 WHERE kind = ?1 AND namespace = ?2 AND package = ?3 AND name = ?4",
            )?
            .query_row(
                rusqlite::params![kind, key.namespace, package, key.name],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        if exists && !overwrite {
            return Ok(Upsert::Conflict);
        }

        connection
            .prepare_cached(
                "INSERT OR REPLACE INTO entities (kind, namespace, package, name, document) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?
            .execute(rusqlite::params![
                kind,
                key.namespace,
                package,
                key.name,
                document
            ])?;

        Ok(if exists {
            Upsert::Replaced
        } else {
            Upsert::Created
        })
    }

    async fn remove(
        &self,
        kind: EntityKind,
        key: &EntityKey,
    ) -> whisk_controller::storage::Result<bool> {
        let connection = self.connection.lock().trace_expect("Failed to lock mutex");
        let removed = connection
            .prepare_cached(
                "DELETE FROM entities \
                 WHERE kind = ?1 AND namespace = ?2 AND package = ?3 AND name = ?4",
            )?
            .execute(rusqlite::params![
                kind.to_string(),
                key.namespace,
                package_column(key.package.as_deref()),
                key.name,
            ])?;
        Ok(removed > 0)
    }

    async fn list(
        &self,
        kind: EntityKind,
        namespace: &str,
        skip: usize,
        limit: usize,
    ) -> whisk_controller::storage::Result<Vec<Entity>> {
        let limit = if limit == usize::MAX {
            -1
        } else {
            limit as i64
        };

        let connection = self.connection.lock().trace_expect("Failed to lock mutex");
        let mut stmt = connection.prepare_cached(
            "SELECT document FROM entities WHERE kind = ?1 AND namespace = ?2 \
             ORDER BY name ASC LIMIT ?3 OFFSET ?4",
        )?;
        let documents = stmt
            .query_map(
                rusqlite::params![kind.to_string(), namespace, limit, skip as i64],
                |row| row.get::<_, String>(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entities = Vec::with_capacity(documents.len());
        for document in documents {
            entities.push(serde_json::from_str(&document)?);
        }
        Ok(entities)
    }

    async fn actions_in_package(
        &self,
        namespace: &str,
        package: &str,
    ) -> whisk_controller::storage::Result<Vec<Action>> {
        let connection = self.connection.lock().trace_expect("Failed to lock mutex");
        let mut stmt = connection.prepare_cached(
            "SELECT document FROM entities \
             WHERE kind = 'action' AND namespace = ?1 AND package = ?2 ORDER BY name ASC",
        )?;
        let documents = stmt
            .query_map(rusqlite::params![namespace, package], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut actions = Vec::with_capacity(documents.len());
        for document in documents {
            if let Entity::Action(action) = serde_json::from_str(&document)? {
                actions.push(action);
            }
        }
        Ok(actions)
    }

    async fn rules_for_trigger(
        &self,
        namespace: &str,
        trigger: &str,
    ) -> whisk_controller::storage::Result<Vec<Rule>> {
        Ok(self
            .all_rules(namespace)?
            .into_iter()
            .filter(|r| r.trigger == trigger)
            .collect())
    }

    async fn rules_for_action(
        &self,
        namespace: &str,
        action_path: &str,
    ) -> whisk_controller::storage::Result<Vec<Rule>> {
        Ok(self
            .all_rules(namespace)?
            .into_iter()
            .filter(|r| r.action == action_path)
            .collect())
    }

    async fn create_activation(
        &self,
        record: &Activation,
    ) -> whisk_controller::storage::Result<()> {
        let connection = self.connection.lock().trace_expect("Failed to lock mutex");
        connection
            .prepare_cached(
                "INSERT OR REPLACE INTO activations \
                 (activation_id, namespace, name, start, end, document) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?
            .execute(rusqlite::params![
                record.activation_id.to_string(),
                record.namespace,
                record.name,
                record.start as i64,
                record.end.map(|e| e as i64),
                serde_json::to_string(record)?,
            ])?;
        Ok(())
    }

    async fn update_activation(
        &self,
        id: &Uuid,
        update: &ActivationUpdate,
    ) -> whisk_controller::storage::Result<bool> {
        let mut connection = self.connection.lock().trace_expect("Failed to lock mutex");
        let tx = connection.transaction()?;

        let document: Option<String> = tx
            .prepare_cached("SELECT document FROM activations WHERE activation_id = ?1")?
            .query_row([id.to_string()], |row| row.get(0))
            .optional()?;
        let Some(document) = document else {
            return Ok(false);
        };

        let mut record: Activation = serde_json::from_str(&document)?;
        if record.is_terminal() {
            return Ok(false);
        }

        record.end = Some(update.end);
        record.duration = Some(update.duration);
        record.status_code = update.status_code;
        record.response = update.response.clone();
        record.logs = update.logs.clone();
        for (key, value) in &update.annotations {
            record.annotations.insert(key.clone(), value.clone());
        }

        tx.prepare_cached(
            "UPDATE activations SET end = ?2, document = ?3 WHERE activation_id = ?1",
        )?
        .execute(rusqlite::params![
            id.to_string(),
            update.end as i64,
            serde_json::to_string(&record)?,
        ])?;
        tx.commit()?;
        Ok(true)
    }

    async fn get_activation(
        &self,
        namespace: &str,
        id: &Uuid,
    ) -> whisk_controller::storage::Result<Option<Activation>> {
        let connection = self.connection.lock().trace_expect("Failed to lock mutex");
        let document: Option<String> = connection
            .prepare_cached(
                "SELECT document FROM activations \
                 WHERE activation_id = ?1 AND namespace = ?2",
            )?
            .query_row(rusqlite::params![id.to_string(), namespace], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(document.map(|d| serde_json::from_str(&d)).transpose()?)
    }

    async fn find_activation(
        &self,
        id: &Uuid,
    ) -> whisk_controller::storage::Result<Option<Activation>> {
        let connection = self.connection.lock().trace_expect("Failed to lock mutex");
        let document: Option<String> = connection
            .prepare_cached("SELECT document FROM activations WHERE activation_id = ?1")?
            .query_row([id.to_string()], |row| row.get(0))
            .optional()?;
        Ok(document.map(|d| serde_json::from_str(&d)).transpose()?)
    }

    async fn list_activations(
        &self,
        namespace: &str,
        filter: &ActivationFilter,
    ) -> whisk_controller::storage::Result<Vec<Activation>> {
        let limit = if filter.limit == usize::MAX {
            -1
        } else {
            filter.limit as i64
        };

        let connection = self.connection.lock().trace_expect("Failed to lock mutex");
        let mut stmt = connection.prepare_cached(
            "SELECT document FROM activations WHERE namespace = ?1 \
             AND (?2 IS NULL OR start >= ?2) \
             AND (?3 IS NULL OR start <= ?3) \
             AND (?4 IS NULL OR instr(name, ?4) > 0) \
             ORDER BY start DESC, activation_id ASC LIMIT ?5 OFFSET ?6",
        )?;
        let documents = stmt
            .query_map(
                rusqlite::params![
                    namespace,
                    filter.since.map(|s| s as i64),
                    filter.upto.map(|u| u as i64),
                    filter.name,
                    limit,
                    filter.skip as i64,
                ],
                |row| row.get::<_, String>(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut activations = Vec::with_capacity(documents.len());
        for document in documents {
            activations.push(serde_json::from_str(&document)?);
        }
        Ok(activations)
    }
}

impl Storage {
    fn all_rules(&self, namespace: &str) -> Result<Vec<Rule>, Error> {
        let connection = self.connection.lock().trace_expect("Failed to lock mutex");
        let mut stmt = connection.prepare_cached(
            "SELECT document FROM entities \
             WHERE kind = 'rule' AND namespace = ?1 ORDER BY name ASC",
        )?;
        let documents = stmt
            .query_map([namespace], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut rules = Vec::with_capacity(documents.len());
        for document in documents {
            if let Entity::Rule(rule) = serde_json::from_str(&document)? {
                rules.push(rule);
            }
        }
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whisk_controller::activation::Response;
    use whisk_controller::params;

    fn test_storage() -> (tempfile::TempDir, Arc<dyn EntityStorage>) {
        let dir = tempfile::tempdir().unwrap();
        let storage = new(
            &Config {
                db_dir: Some(dir.path().to_path_buf()),
                ..Config::default()
            },
            true,
        )
        .unwrap();
        (dir, storage)
    }

    fn test_namespace(name: &str) -> Namespace {
        Namespace {
            name: name.into(),
            uuid: Uuid::new_v4(),
            owner: "owner@example.com".into(),
            description: Some("test".into()),
            limits: params::Map::new(),
            auth_uuid: Uuid::new_v4(),
            auth_key: "secret".into(),
        }
    }

    fn test_activation(namespace: &str, name: &str, start: u64) -> Activation {
        Activation {
            activation_id: Uuid::new_v4(),
            namespace: namespace.into(),
            name: format!("/{namespace}/{name}"),
            version: "0.0.1".into(),
            subject: "owner@example.com".into(),
            start,
            end: None,
            duration: None,
            status_code: 0,
            response: Response::default(),
            logs: Vec::new(),
            annotations: params::Map::new(),
            cause: None,
            publish: false,
        }
    }

    #[tokio::test]
    async fn namespace_round_trip() {
        let (_dir, storage) = test_storage();
        let namespace = test_namespace("ns1");

        assert!(storage.insert_namespace(&namespace).await.unwrap());
        assert!(!storage.insert_namespace(&namespace).await.unwrap());

        let loaded = storage.get_namespace("ns1").await.unwrap().unwrap();
        assert_eq!(loaded.uuid, namespace.uuid);
        assert_eq!(loaded.auth_uuid, namespace.auth_uuid);

        let by_auth = storage
            .find_namespace_by_auth(&namespace.auth_uuid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_auth.name, "ns1");

        assert!(storage.remove_namespace("ns1").await.unwrap());
        assert!(!storage.remove_namespace("ns1").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_conflict_and_listing_order() {
        let (_dir, storage) = test_storage();
        storage
            .insert_namespace(&test_namespace("ns1"))
            .await
            .unwrap();

        for name in ["zeta", "alpha", "mid"] {
            let trigger = Entity::Trigger(whisk_controller::entity::Trigger {
                namespace: "ns1".into(),
                name: name.into(),
                version: "0.0.1".into(),
                publish: false,
                parameters: params::Map::new(),
                annotations: params::Map::new(),
                feed: None,
            });
            assert_eq!(
                storage.upsert(&trigger, false).await.unwrap(),
                Upsert::Created
            );
            assert_eq!(
                storage.upsert(&trigger, false).await.unwrap(),
                Upsert::Conflict
            );
            assert_eq!(
                storage.upsert(&trigger, true).await.unwrap(),
                Upsert::Replaced
            );
        }

        let listed = storage
            .list(EntityKind::Trigger, "ns1", 0, 10)
            .await
            .unwrap();
        let names = listed
            .iter()
            .map(|e| e.key().name.clone())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn activation_update_is_terminal_once() {
        let (_dir, storage) = test_storage();
        let record = test_activation("ns1", "hello", 1000);
        storage.create_activation(&record).await.unwrap();

        let update = ActivationUpdate {
            end: 1500,
            duration: 500,
            status_code: 200,
            response: Response::ok(serde_json::json!({"ok": true})),
            logs: vec!["line".into()],
            annotations: params::Map::new(),
        };
        assert!(
            storage
                .update_activation(&record.activation_id, &update)
                .await
                .unwrap()
        );
        assert!(
            !storage
                .update_activation(&record.activation_id, &update)
                .await
                .unwrap()
        );

        let loaded = storage
            .get_activation("ns1", &record.activation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.end, Some(1500));
        assert_eq!(loaded.duration, Some(500));
    }

    #[tokio::test]
    async fn activation_listing_filters_and_orders() {
        let (_dir, storage) = test_storage();
        let a = test_activation("ns1", "first", 1000);
        let b = test_activation("ns1", "second", 2000);
        let c = test_activation("ns1", "third", 3000);
        for record in [&a, &b, &c] {
            storage.create_activation(record).await.unwrap();
        }

        let all = storage
            .list_activations(
                "ns1",
                &ActivationFilter {
                    limit: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].start, 3000, "newest first");

        let windowed = storage
            .list_activations(
                "ns1",
                &ActivationFilter {
                    since: Some(1500),
                    upto: Some(2500),
                    limit: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].start, 2000);

        let named = storage
            .list_activations(
                "ns1",
                &ActivationFilter {
                    name: Some("third".into()),
                    limit: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].activation_id, c.activation_id);
    }
}
