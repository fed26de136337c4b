use std::time::{Duration, Instant};

use run_store::{Db, RunMeta, StoreError};
use surface_core::{codec, CollectContext, Collector, EmitStats, Emitter, Filter, ResultType, RunType};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{PipelineError, Result};

#[derive(Debug, Clone, Default)]
pub struct CollectOptions {
    /// Defaults to the current UTC time in RFC 3339 form.
    pub run_id: Option<String>,
    /// Purge an existing run with the same id instead of failing.
    pub overwrite: bool,
    /// Only run the collectors that this earlier run used.
    pub match_run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorStatus {
    Completed { stats: EmitStats },
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct CollectorOutcome {
    pub name: String,
    pub kind: ResultType,
    pub status: CollectorStatus,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct CollectReport {
    pub run_id: String,
    pub outcomes: Vec<CollectorOutcome>,
    pub bytes_saved: i64,
}

impl CollectReport {
    pub fn success(&self) -> bool {
        !self.outcomes.iter().any(|o| matches!(o.status, CollectorStatus::Failed(_)))
    }

    pub fn collected(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match &o.status {
                CollectorStatus::Completed { stats } => stats.collected,
                _ => 0,
            })
            .sum()
    }
}

pub(crate) fn default_run_id() -> String {
    let now = OffsetDateTime::now_utc();
    let now = now.replace_nanosecond(0).unwrap_or(now);
    now.format(&Rfc3339).unwrap_or_else(|_| now.unix_timestamp().to_string())
}

pub(crate) fn resolve_run_id(run_id: Option<&str>) -> Result<String> {
    match run_id {
        Some(id) if id.trim().is_empty() => Err(PipelineError::InvalidArgument("run id is blank".into())),
        Some(id) => Ok(id.to_string()),
        None => Ok(default_run_id()),
    }
}

/// Runs every selected collector into a fresh run and finishes it.
pub fn run_collect(
    db: &mut Db,
    collectors: &[Box<dyn Collector>],
    filter: &Filter,
    opts: &CollectOptions,
) -> Result<CollectReport> {
    if collectors.is_empty() {
        return Err(PipelineError::InvalidArgument("at least one collector is required".into()));
    }
    let run_id = resolve_run_id(opts.run_id.as_deref())?;

    let selected: Vec<&dyn Collector> = match &opts.match_run_id {
        Some(other) => {
            let earlier = db.get_run(other)?.ok_or_else(|| StoreError::RunNotFound(other.clone()))?;
            collectors.iter().map(|c| c.as_ref()).filter(|c| earlier.meta.collects(c.kind())).collect()
        }
        None => collectors.iter().map(|c| c.as_ref()).collect(),
    };
    if selected.is_empty() {
        return Err(PipelineError::InvalidArgument("no collector matches the requested run".into()));
    }

    let meta = RunMeta::new(run_id.clone(), RunType::Collect, selected.iter().map(|c| c.kind()));
    db.register_run(&meta, opts.overwrite)?;
    info!(run_id = %run_id, collectors = selected.len(), "collect run started");

    let mut outcomes = Vec::with_capacity(selected.len());
    for collector in selected {
        let started = Instant::now();
        let status = if !collector.can_run_on_platform() {
            debug!(collector = collector.name(), "not supported on this platform");
            clear_collector_flag(db, &run_id, collector);
            CollectorStatus::Skipped
        } else {
            match run_one(db, &run_id, collector, filter) {
                Ok(stats) => {
                    info!(
                        collector = collector.name(),
                        collected = stats.collected,
                        filtered = stats.filtered,
                        duplicates = stats.duplicates,
                        failed = stats.failed,
                        "collector finished"
                    );
                    CollectorStatus::Completed { stats }
                }
                Err(e) => {
                    warn!(collector = collector.name(), error = %format!("{e:#}"), "collector failed, rolled back");
                    clear_collector_flag(db, &run_id, collector);
                    CollectorStatus::Failed(format!("{e:#}"))
                }
            }
        };
        outcomes.push(CollectorOutcome {
            name: collector.name().to_string(),
            kind: collector.kind(),
            status,
            elapsed: started.elapsed(),
        });
    }

    db.finish_run(&run_id)?;
    let bytes_saved = codec::bytes_saved();
    info!(run_id = %run_id, bytes_saved, "collect run finished");
    Ok(CollectReport { run_id, outcomes, bytes_saved })
}

fn clear_collector_flag(db: &Db, run_id: &str, collector: &dyn Collector) {
    if let Err(e) = db.mark_collector_absent(run_id, collector.kind()) {
        warn!(collector = collector.name(), error = %e, "could not clear collector flag on run");
    }
}

fn run_one(db: &mut Db, run_id: &str, collector: &dyn Collector, filter: &Filter) -> anyhow::Result<EmitStats> {
    let mut writer = db.begin_batch(run_id, collector.kind())?;
    let stats = {
        let mut out = Emitter::new(collector.kind(), filter, &mut writer);
        collector.collect(&CollectContext { run_id, filter }, &mut out)?;
        out.stats()
    };
    writer.commit()?;
    Ok(stats)
}
