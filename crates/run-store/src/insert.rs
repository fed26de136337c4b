use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode};
use surface_core::codec;
use surface_core::{FileMonitorEvent, Record, ResultType};
use tracing::info;

use crate::models::{now_ms, ComparedRow, ComparisonStatus, RunMeta};
use crate::{Db, Result, StoreError};

impl Db {
    /// Inserts the `runs` row. With `overwrite`, an existing run of the same
    /// id is deleted first.
    pub fn register_run(&mut self, meta: &RunMeta, overwrite: bool) -> Result<()> {
        if self.run_exists(&meta.run_id)? {
            if !overwrite {
                return Err(StoreError::DuplicateRunId(meta.run_id.clone()));
            }
            info!(run_id = %meta.run_id, "overwriting existing run");
            self.delete_run(&meta.run_id)?;
        }
        let flag = |kind| i64::from(meta.collects(kind));
        self.conn
            .execute(
                "INSERT INTO runs(run_id,type,timestamp,version,file_system,ports,users,services,registry,certificates)
                 VALUES (?,?,?,?,?,?,?,?,?,?)",
                params![
                    meta.run_id,
                    meta.run_type.as_str(),
                    meta.timestamp,
                    meta.version,
                    flag(ResultType::File),
                    flag(ResultType::Port),
                    flag(ResultType::User),
                    flag(ResultType::Service),
                    flag(ResultType::Registry),
                    flag(ResultType::Certificate),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                    StoreError::DuplicateRunId(meta.run_id.clone())
                }
                other => other.into(),
            })?;
        Ok(())
    }

    pub fn finish_run(&self, run_id: &str) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE runs SET finished_at=? WHERE run_id=?",
            params![now_ms(), run_id],
        )?;
        if n == 0 {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }
        Ok(())
    }

    /// Clears the collected flag of `kind`, used when its collector failed.
    pub fn mark_collector_absent(&self, run_id: &str, kind: ResultType) -> Result<()> {
        self.conn.execute(
            &format!("UPDATE runs SET {}=0 WHERE run_id=?", kind.run_column()),
            [run_id],
        )?;
        Ok(())
    }

    /// Replaces the change-log rows for `(base, compare, kind)` in one transaction.
    pub fn replace_comparison(
        &mut self,
        base_run_id: &str,
        compare_run_id: &str,
        kind: ResultType,
        rows: &[ComparedRow],
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM compared WHERE base_run_id=? AND compare_run_id=? AND data_type=?",
            params![base_run_id, compare_run_id, kind.code()],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO compared(base_run_id,compare_run_id,base_row_key,compare_row_key,change_type,data_type)
                 VALUES (?,?,?,?,?,?)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.base_run_id,
                    row.compare_run_id,
                    row.base_row_key,
                    row.compare_row_key,
                    row.change_type.code(),
                    row.kind.code(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn set_comparison_status(
        &self,
        base_run_id: &str,
        compare_run_id: &str,
        status: ComparisonStatus,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO results(base_run_id,compare_run_id,status) VALUES (?,?,?)
             ON CONFLICT(base_run_id,compare_run_id) DO UPDATE SET status=excluded.status",
            params![base_run_id, compare_run_id, status.as_str()],
        )?;
        Ok(())
    }

    /// Appends monitor events after any already stored for the run.
    pub fn insert_monitor_events(&mut self, run_id: &str, events: &[FileMonitorEvent]) -> Result<usize> {
        let mut writer = self.begin_monitor_batch(run_id)?;
        for event in events {
            writer.write_event(event)?;
        }
        writer.commit()
    }
}

/// Encodes and inserts one record. Returns false when the row already existed.
pub(crate) fn insert_record(conn: &Connection, run_id: &str, record: &Record) -> Result<bool> {
    let serialized = codec::encode(&record.to_json()?)?;
    let (columns, identity) = identity_columns(record);
    let placeholders = vec!["?"; columns.len() + 3].join(",");
    let sql = format!(
        "INSERT OR IGNORE INTO {}(run_id,row_key,{},serialized) VALUES ({})",
        record.kind().table_name(),
        columns.join(","),
        placeholders
    );

    let mut values = Vec::with_capacity(columns.len() + 3);
    values.push(Value::Text(run_id.to_string()));
    values.push(Value::Text(record.row_key()));
    values.extend(identity);
    values.push(Value::Blob(serialized));

    let n = conn.prepare_cached(&sql)?.execute(params_from_iter(values))?;
    Ok(n > 0)
}

pub(crate) fn insert_monitor_event(
    conn: &Connection,
    run_id: &str,
    seq: i64,
    event: &FileMonitorEvent,
) -> Result<()> {
    let serialized = codec::encode(&serde_json::to_string(event)?)?;
    conn.prepare_cached(
        "INSERT OR IGNORE INTO file_system_monitored(run_id,row_key,seq,timestamp,change_type,path,old_path,serialized)
         VALUES (?,?,?,?,?,?,?,?)",
    )?
    .execute(params![
        run_id,
        event.row_key(run_id, seq),
        seq,
        event.timestamp,
        event.change_type.code(),
        event.path,
        event.old_path,
        serialized,
    ])?;
    Ok(())
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn opt_text(s: Option<&String>) -> Value {
    s.map_or(Value::Null, |s| Value::Text(s.clone()))
}

const FILE_COLUMNS: &[&str] = &["path", "permissions", "size", "hash"];
const PORT_COLUMNS: &[&str] = &["family", "address", "transport", "port", "process_name"];
const USER_COLUMNS: &[&str] = &["name", "uid", "account_type", "privileged"];
const SERVICE_COLUMNS: &[&str] = &["service_name", "display_name", "current_state"];
const REGISTRY_COLUMNS: &[&str] = &["key"];
const CERTIFICATE_COLUMNS: &[&str] =
    &["hash_plus_store", "store_location", "store_name", "hash", "subject", "pkcs12"];

/// Queryable columns stored next to the encoded payload.
fn identity_columns(record: &Record) -> (&'static [&'static str], Vec<Value>) {
    match record {
        Record::File(f) => (
            FILE_COLUMNS,
            vec![
                text(&f.path),
                opt_text(f.permissions.as_ref()),
                f.size.map_or(Value::Null, |s| Value::Integer(s as i64)),
                opt_text(f.content_hash.as_ref()),
            ],
        ),
        Record::Port(p) => (
            PORT_COLUMNS,
            vec![
                text(&p.family),
                text(&p.address),
                text(&p.transport),
                Value::Integer(i64::from(p.port)),
                opt_text(p.process_name.as_ref()),
            ],
        ),
        Record::User(u) => (
            USER_COLUMNS,
            vec![
                text(&u.name),
                text(&u.uid),
                text(&u.account_type),
                Value::Integer(i64::from(u.privileged)),
            ],
        ),
        Record::Service(s) => (
            SERVICE_COLUMNS,
            vec![
                text(&s.service_name),
                opt_text(s.display_name.as_ref()),
                opt_text(s.current_state.as_ref()),
            ],
        ),
        Record::Registry(r) => (REGISTRY_COLUMNS, vec![text(&r.key)]),
        Record::Certificate(c) => (
            CERTIFICATE_COLUMNS,
            vec![
                text(&c.hash_plus_store()),
                text(&c.store_location),
                text(&c.store_name),
                text(&c.certificate_hash),
                text(&c.subject),
                text(&c.pkcs12.column_value()),
            ],
        ),
    }
}
