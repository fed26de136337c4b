use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use run_store::{ComparedRow, Db, StoreError};
use serde::Serialize;
use surface_core::{ChangeType, CompareResult, Record, ResultType};
use tracing::{info, warn};

use crate::{PipelineError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KindCounts {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ComparisonSummary {
    pub base_run_id: String,
    pub compare_run_id: String,
    pub counts: BTreeMap<String, KindCounts>,
}

/// Replaces characters that are unsafe in file names, `:` from RFC 3339 ids included.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|source| PipelineError::Io { path: path.to_path_buf(), source })?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

fn lookup(db: &Db, run_id: &str, kind: ResultType, row_key: Option<&str>) -> Result<Option<Record>> {
    let Some(row_key) = row_key else { return Ok(None) };
    let Some(row) = db.get_record(run_id, kind, row_key)? else {
        warn!(run_id, %kind, row_key, "compared row points at a missing record");
        return Ok(None);
    };
    match row.decode(kind) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            warn!(run_id, %kind, row_key, error = %e, "record did not decode");
            Ok(None)
        }
    }
}

fn rebuild(db: &Db, row: ComparedRow) -> Result<CompareResult> {
    let base = lookup(db, &row.base_run_id, row.kind, row.base_row_key.as_deref())?;
    let compare = lookup(db, &row.compare_run_id, row.kind, row.compare_row_key.as_deref())?;
    Ok(CompareResult {
        base_run_id: row.base_run_id,
        compare_run_id: row.compare_run_id,
        base_row_key: row.base_row_key,
        compare_row_key: row.compare_row_key,
        change_type: row.change_type,
        result_type: row.kind,
        base,
        compare,
    })
}

/// Writes one `<base>_vs_<compare>_<KIND>.json` per kind with changes and a
/// `<base>_vs_<compare>_summary.json`. Returns the written paths.
pub fn export_comparison(db: &Db, base_run_id: &str, compare_run_id: &str, out_dir: &Path) -> Result<Vec<PathBuf>> {
    if db.comparison_status(base_run_id, compare_run_id)?.is_none() {
        return Err(PipelineError::InvalidArgument(format!(
            "{base_run_id} and {compare_run_id} have not been compared"
        )));
    }
    fs::create_dir_all(out_dir).map_err(|source| PipelineError::Io { path: out_dir.to_path_buf(), source })?;

    let prefix = format!("{base_run_id}_vs_{compare_run_id}");
    let mut written = Vec::new();
    let mut counts = BTreeMap::new();
    for kind in ResultType::ALL {
        let rows = db.comparison_rows(base_run_id, compare_run_id, kind)?;
        let mut c = KindCounts::default();
        for row in &rows {
            match row.change_type {
                ChangeType::Created => c.added += 1,
                ChangeType::Deleted => c.removed += 1,
                ChangeType::Modified | ChangeType::Renamed => c.modified += 1,
            }
        }
        counts.insert(kind.as_str().to_string(), c);
        if rows.is_empty() {
            continue;
        }
        let results = rows.into_iter().map(|r| rebuild(db, r)).collect::<Result<Vec<_>>>()?;
        let path = out_dir.join(sanitize_file_name(&format!("{prefix}_{}.json", kind.as_str())));
        write_json(&path, &results)?;
        written.push(path);
    }

    let summary = ComparisonSummary {
        base_run_id: base_run_id.to_string(),
        compare_run_id: compare_run_id.to_string(),
        counts,
    };
    let path = out_dir.join(sanitize_file_name(&format!("{prefix}_summary.json")));
    write_json(&path, &summary)?;
    written.push(path);
    info!(base = base_run_id, compare = compare_run_id, files = written.len(), "comparison exported");
    Ok(written)
}

/// Writes `<run>_Monitoring_FILE.json` with every event of a monitor run.
pub fn export_monitor(db: &Db, run_id: &str, out_dir: &Path) -> Result<PathBuf> {
    if !db.run_exists(run_id)? {
        return Err(StoreError::RunNotFound(run_id.to_string()).into());
    }
    let events = db.monitor_events(run_id)?;
    fs::create_dir_all(out_dir).map_err(|source| PipelineError::Io { path: out_dir.to_path_buf(), source })?;
    let path = out_dir.join(sanitize_file_name(&format!("{run_id}_Monitoring_FILE.json")));
    write_json(&path, &events)?;
    info!(run_id, events = events.len(), path = %path.display(), "monitor run exported");
    Ok(path)
}
