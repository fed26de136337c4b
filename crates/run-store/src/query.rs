use rusqlite::{params, OptionalExtension, Row};
use surface_core::codec;
use surface_core::{ChangeType, FileMonitorEvent, ResultType, RunType};
use tracing::warn;

use crate::models::{ComparedRow, ComparisonStatus, RunMeta, RunRecord, StoredRow};
use crate::{Db, Result, StoreError};

const RUN_COLUMNS: &str =
    "run_id,type,timestamp,version,file_system,ports,users,services,registry,certificates,finished_at";

/// Kinds in the order of their flag columns in [`RUN_COLUMNS`].
const FLAG_ORDER: [ResultType; 6] = [
    ResultType::File,
    ResultType::Port,
    ResultType::User,
    ResultType::Service,
    ResultType::Registry,
    ResultType::Certificate,
];

struct RawRun {
    run_id: String,
    run_type: String,
    timestamp: i64,
    version: String,
    flags: [bool; 6],
    finished_at: Option<i64>,
}

fn read_run(r: &Row<'_>) -> rusqlite::Result<RawRun> {
    let mut flags = [false; 6];
    for (i, flag) in flags.iter_mut().enumerate() {
        *flag = r.get::<_, i64>(4 + i)? != 0;
    }
    Ok(RawRun {
        run_id: r.get(0)?,
        run_type: r.get(1)?,
        timestamp: r.get(2)?,
        version: r.get(3)?,
        flags,
        finished_at: r.get(10)?,
    })
}

impl RawRun {
    fn into_record(self) -> Result<RunRecord> {
        let run_type = self.run_type.parse::<RunType>().map_err(StoreError::Corrupt)?;
        let kinds = FLAG_ORDER
            .into_iter()
            .zip(self.flags)
            .filter_map(|(kind, on)| on.then_some(kind))
            .collect();
        Ok(RunRecord {
            meta: RunMeta {
                run_id: self.run_id,
                run_type,
                timestamp: self.timestamp,
                version: self.version,
                kinds,
            },
            finished_at: self.finished_at,
        })
    }
}

fn read_stored(r: &Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow { run_id: r.get(0)?, row_key: r.get(1)?, serialized: r.get(2)? })
}

impl Db {
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let cnt: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
            [name],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let raw = self
            .conn
            .query_row(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE run_id=?"), [run_id], read_run)
            .optional()?;
        raw.map(RawRun::into_record).transpose()
    }

    pub fn run_exists(&self, run_id: &str) -> Result<bool> {
        let cnt: i64 =
            self.conn.query_row("SELECT COUNT(1) FROM runs WHERE run_id=?", [run_id], |r| r.get(0))?;
        Ok(cnt > 0)
    }

    /// A run that exists and was stamped finished; comparisons only read these.
    pub fn finished_run(&self, run_id: &str) -> Result<RunRecord> {
        let run = self
            .get_run(run_id)?
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        if !run.is_finished() {
            return Err(StoreError::RunIncomplete(run_id.to_string()));
        }
        Ok(run)
    }

    /// Runs, newest first.
    pub fn list_runs(&self, run_type: Option<RunType>) -> Result<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE (?1 IS NULL OR type=?1) ORDER BY timestamp DESC, rowid DESC"
        ))?;
        let raws = stmt
            .query_map([run_type.map(RunType::as_str)], read_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(RawRun::into_record).collect()
    }

    pub fn latest_run_ids(&self, n: usize, run_type: RunType) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id FROM runs WHERE type=? ORDER BY timestamp DESC, rowid DESC LIMIT ?",
        )?;
        let ids = stmt
            .query_map(params![run_type.as_str(), n as i64], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    pub fn records_for_run(&self, run_id: &str, kind: ResultType) -> Result<Vec<StoredRow>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT run_id,row_key,serialized FROM {} WHERE run_id=? ORDER BY rowid",
            kind.table_name()
        ))?;
        let rows = stmt.query_map([run_id], read_stored)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_record(&self, run_id: &str, kind: ResultType, row_key: &str) -> Result<Option<StoredRow>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT run_id,row_key,serialized FROM {} WHERE run_id=? AND row_key=?",
                    kind.table_name()
                ),
                params![run_id, row_key],
                read_stored,
            )
            .optional()?;
        Ok(row)
    }

    pub fn count_records(&self, run_id: &str, kind: ResultType) -> Result<i64> {
        let n = self.conn.query_row(
            &format!("SELECT COUNT(1) FROM {} WHERE run_id=?", kind.table_name()),
            [run_id],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    pub fn comparison_rows(
        &self,
        base_run_id: &str,
        compare_run_id: &str,
        kind: ResultType,
    ) -> Result<Vec<ComparedRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT base_row_key,compare_row_key,change_type FROM compared
             WHERE base_run_id=? AND compare_run_id=? AND data_type=? ORDER BY compared_id",
        )?;
        let raw = stmt
            .query_map(params![base_run_id, compare_run_id, kind.code()], |r| {
                Ok((r.get::<_, Option<String>>(0)?, r.get::<_, Option<String>>(1)?, r.get::<_, i64>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter()
            .map(|(base_row_key, compare_row_key, code)| {
                let change_type = ChangeType::from_code(code)
                    .ok_or_else(|| StoreError::Corrupt(format!("change type {code}")))?;
                Ok(ComparedRow {
                    base_run_id: base_run_id.to_string(),
                    compare_run_id: compare_run_id.to_string(),
                    base_row_key,
                    compare_row_key,
                    change_type,
                    kind,
                })
            })
            .collect()
    }

    pub fn comparison_status(
        &self,
        base_run_id: &str,
        compare_run_id: &str,
    ) -> Result<Option<ComparisonStatus>> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM results WHERE base_run_id=? AND compare_run_id=?",
                params![base_run_id, compare_run_id],
                |r| r.get(0),
            )
            .optional()?;
        status.as_deref().map(ComparisonStatus::parse).transpose()
    }

    /// Events of a monitor run in arrival order. Undecodable rows are skipped.
    pub fn monitor_events(&self, run_id: &str) -> Result<Vec<FileMonitorEvent>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT row_key,serialized FROM file_system_monitored WHERE run_id=? ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([run_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut events = Vec::with_capacity(rows.len());
        for (row_key, blob) in rows {
            let decoded = codec::decode(&blob)
                .map_err(StoreError::from)
                .and_then(|json| serde_json::from_str(&json).map_err(StoreError::from));
            match decoded {
                Ok(event) => events.push(event),
                Err(e) => warn!(run_id, row_key = %row_key, error = %e, "skipping undecodable monitor event"),
            }
        }
        Ok(events)
    }
}
