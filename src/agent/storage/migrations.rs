use rusqlite::{Connection, Transaction};
use tracing::info;

use super::error::{StorageError, StorageResult};

const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Brings the database up to [CURRENT_SCHEMA_VERSION] in a single transaction.
pub fn run_migrations(conn: &mut Connection) -> StorageResult<()> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(StorageError::InvalidData(format!(
            "database schema version {version} is newer than supported {CURRENT_SCHEMA_VERSION}"
        )));
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    while version < CURRENT_SCHEMA_VERSION {
        version += 1;
        apply_migration(&tx, version)?;
        info!("Applied schema migration {version}");
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> StorageResult<()> {
    match version {
        1 => Ok(tx.execute_batch(include_str!("schemas/schema_v1.sql"))?),
        v => Err(StorageError::InvalidData(format!("unknown schema version {v}"))),
    }
}
