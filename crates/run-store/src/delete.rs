use rusqlite::params;
use tracing::info;

use crate::schema::RUN_SCOPED_TABLES;
use crate::{Db, Result, StoreError};

impl Db {
    /// Deletes a run and everything derived from it in one transaction.
    pub fn delete_run(&mut self, run_id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        let exists: i64 = tx.query_row("SELECT COUNT(1) FROM runs WHERE run_id=?", [run_id], |r| r.get(0))?;
        if exists == 0 {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }
        for table in RUN_SCOPED_TABLES {
            tx.execute(&format!("DELETE FROM {table} WHERE run_id=?"), [run_id])?;
        }
        tx.execute(
            "DELETE FROM compared WHERE base_run_id=?1 OR compare_run_id=?1",
            params![run_id],
        )?;
        tx.execute(
            "DELETE FROM results WHERE base_run_id=?1 OR compare_run_id=?1",
            params![run_id],
        )?;
        tx.execute("DELETE FROM runs WHERE run_id=?", [run_id])?;
        tx.commit()?;
        info!(run_id, "deleted run");
        Ok(())
    }

    /// Empties every table.
    pub fn reset(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        for table in RUN_SCOPED_TABLES {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }
        tx.execute_batch("DELETE FROM compared; DELETE FROM results; DELETE FROM runs;")?;
        tx.commit()?;
        info!("reset run store");
        Ok(())
    }
}
