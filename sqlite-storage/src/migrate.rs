use super::*;

const SCHEMA_VERSION: u32 = 1;

const SCHEMA_V1: &str = r#"
CREATE TABLE namespaces (
    name TEXT PRIMARY KEY,
    uuid TEXT NOT NULL,
    owner TEXT NOT NULL,
    description TEXT,
    limits TEXT NOT NULL,
    auth_uuid TEXT NOT NULL UNIQUE,
    auth_key TEXT NOT NULL
) WITHOUT ROWID;

-- package is '' for entities outside a package, so it can take part in
-- the primary key
CREATE TABLE entities (
    kind TEXT NOT NULL,
    namespace TEXT NOT NULL,
    package TEXT NOT NULL DEFAULT '',
    name TEXT NOT NULL,
    document TEXT NOT NULL,
    PRIMARY KEY (kind, namespace, package, name)
) WITHOUT ROWID;

CREATE INDEX idx_entities_list ON entities (kind, namespace, name);

CREATE TABLE activations (
    activation_id TEXT PRIMARY KEY,
    namespace TEXT NOT NULL,
    name TEXT NOT NULL,
    start INTEGER NOT NULL,
    end INTEGER,
    document TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX idx_activations_ns_start ON activations (namespace, start DESC);
"#;

pub fn migrate(
    connection: &mut rusqlite::Connection,
    upgrade: bool,
) -> Result<(), storage::Error> {
    let version: u32 =
        connection.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version == SCHEMA_VERSION {
        return Ok(());
    }
    if version > SCHEMA_VERSION {
        return Err(storage::Error::SchemaTooNew(version));
    }
    if version != 0 && !upgrade {
        return Err(storage::Error::UpgradeRequired(version));
    }

    let tx = connection.transaction()?;
    if version == 0 {
        tx.execute_batch(SCHEMA_V1)?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;

    info!("Migrated database schema from v{version} to v{SCHEMA_VERSION}");
    Ok(())
}
