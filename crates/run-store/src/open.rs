use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use crate::schema::MIG_0001_INIT;
use crate::{Result, StoreError};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the run store. Opened explicitly by the caller and passed down.
pub struct Db {
    pub conn: Connection,
}

impl Db {
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        apply_pragmas(&conn, true)?;
        migrate(&conn)?;
        debug!(path = %path.display(), "opened run store");
        Ok(Db { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn, false)?;
        migrate(&conn)?;
        Ok(Db { conn })
    }
}

fn apply_pragmas(conn: &Connection, on_disk: bool) -> Result<()> {
    if on_disk {
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

/// Schema steps in order. `PRAGMA user_version` holds how many are applied.
const MIGRATIONS: &[&str] = &[MIG_0001_INIT];

fn migrate(conn: &Connection) -> Result<()> {
    let mut version: i64 = conn.pragma_query_value(None, "user_version", |r| r.get(0))?;
    let latest = MIGRATIONS.len() as i64;
    if version > latest {
        return Err(StoreError::Corrupt(format!(
            "store schema version {version} is newer than supported {latest}"
        )));
    }
    if version == 0 && has_runs_table(conn)? {
        // stores written before versioning already carry the initial schema
        version = 1;
        conn.pragma_update(None, "user_version", version)?;
    }
    for (step, next) in MIGRATIONS.iter().skip(version as usize).zip(version + 1..) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(step)?;
        tx.pragma_update(None, "user_version", next)?;
        tx.commit()?;
        debug!(version = next, "applied schema migration");
    }
    Ok(())
}

fn has_runs_table(conn: &Connection) -> Result<bool> {
    let cnt: i64 = conn.query_row(
        "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name='runs'",
        [],
        |r| r.get(0),
    )?;
    Ok(cnt > 0)
}
