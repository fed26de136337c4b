use anyhow::bail;
use rusqlite::Transaction;
use surface_core::{FileMonitorEvent, Record, RecordSink, ResultType};

use crate::insert::{insert_monitor_event, insert_record};
use crate::{Db, Result};

/// Transactional sink for one collector's records. Dropping it without
/// [`RunWriter::commit`] rolls the batch back.
pub struct RunWriter<'conn> {
    tx: Transaction<'conn>,
    run_id: String,
    kind: ResultType,
    written: usize,
}

impl Db {
    pub fn begin_batch(&mut self, run_id: &str, kind: ResultType) -> Result<RunWriter<'_>> {
        let tx = self.conn.transaction()?;
        Ok(RunWriter { tx, run_id: run_id.to_string(), kind, written: 0 })
    }

    pub fn begin_monitor_batch(&mut self, run_id: &str) -> Result<MonitorWriter<'_>> {
        let tx = self.conn.transaction()?;
        let last: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM file_system_monitored WHERE run_id=?",
            [run_id],
            |r| r.get(0),
        )?;
        Ok(MonitorWriter { tx, run_id: run_id.to_string(), next_seq: last + 1, written: 0 })
    }
}

impl RunWriter<'_> {
    pub fn kind(&self) -> ResultType {
        self.kind
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn commit(self) -> Result<usize> {
        self.tx.commit()?;
        Ok(self.written)
    }
}

impl RecordSink for RunWriter<'_> {
    fn write(&mut self, record: &Record) -> anyhow::Result<()> {
        if record.kind() != self.kind {
            bail!("{} record written to {} batch", record.kind(), self.kind);
        }
        if insert_record(&self.tx, &self.run_id, record)? {
            self.written += 1;
        }
        Ok(())
    }
}

/// Transactional sink for monitor events, numbered in arrival order.
pub struct MonitorWriter<'conn> {
    tx: Transaction<'conn>,
    run_id: String,
    next_seq: i64,
    written: usize,
}

impl MonitorWriter<'_> {
    pub fn write_event(&mut self, event: &FileMonitorEvent) -> Result<()> {
        insert_monitor_event(&self.tx, &self.run_id, self.next_seq, event)?;
        self.next_seq += 1;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn commit(self) -> Result<usize> {
        self.tx.commit()?;
        Ok(self.written)
    }
}
