use diff_engine::{compare_kind, ComparisonResult};
use run_store::{ComparisonStatus, Db};
use surface_core::{ResultType, RunType};
use tracing::{info, warn};

use crate::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct CompareReport {
    pub base_run_id: String,
    pub compare_run_id: String,
    pub results: Vec<ComparisonResult>,
    /// Kinds whose comparator failed, with the reason.
    pub failures: Vec<(ResultType, String)>,
}

impl CompareReport {
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Compares every kind collected by both runs.
pub fn run_compare(db: &mut Db, base_run_id: &str, compare_run_id: &str) -> Result<CompareReport> {
    if base_run_id.trim().is_empty() || compare_run_id.trim().is_empty() {
        return Err(PipelineError::InvalidArgument("base and compare run ids are required".into()));
    }
    let base = db.finished_run(base_run_id)?;
    let compare = db.finished_run(compare_run_id)?;
    for run in [&base, &compare] {
        if run.meta.run_type != RunType::Collect {
            return Err(PipelineError::InvalidArgument(format!("{} is not a collect run", run.meta.run_id)));
        }
    }

    let kinds: Vec<ResultType> =
        ResultType::ALL.into_iter().filter(|k| base.meta.collects(*k) && compare.meta.collects(*k)).collect();
    info!(base = base_run_id, compare = compare_run_id, kinds = kinds.len(), "comparison started");

    db.set_comparison_status(base_run_id, compare_run_id, ComparisonStatus::Running)?;
    let mut results = Vec::with_capacity(kinds.len());
    let mut failures = Vec::new();
    for kind in kinds {
        match compare_kind(db, kind, base_run_id, compare_run_id) {
            Ok(r) => results.push(r),
            Err(e) => {
                warn!(%kind, error = %e, "comparator failed");
                failures.push((kind, e.to_string()));
            }
        }
    }
    db.set_comparison_status(base_run_id, compare_run_id, ComparisonStatus::Completed)?;

    Ok(CompareReport {
        base_run_id: base_run_id.to_string(),
        compare_run_id: compare_run_id.to_string(),
        results,
        failures,
    })
}

/// The most recent run of `run_type`.
pub fn resolve_latest(db: &Db, run_type: RunType) -> Result<String> {
    db.latest_run_ids(1, run_type)?
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::InvalidArgument(format!("no {} runs recorded", run_type.as_str())))
}

/// `(base, compare)` for the two most recent collect runs, older first.
pub fn resolve_latest_pair(db: &Db) -> Result<(String, String)> {
    let mut ids = db.latest_run_ids(2, RunType::Collect)?;
    if ids.len() < 2 {
        return Err(PipelineError::InvalidArgument("need at least two collect runs".into()));
    }
    let base = ids.remove(1);
    let compare = ids.remove(0);
    Ok((base, compare))
}
