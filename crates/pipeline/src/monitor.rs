use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use file_system::{ChangeCategories, FileSystemMonitor, MonitorOptions};
use run_store::{Db, RunMeta};
use surface_core::{FileMonitorEvent, Filter, ResultType, RunType};
use tracing::{info, warn};

use crate::collect::resolve_run_id;
use crate::{PipelineError, Result};

const POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct MonitorSession {
    pub run_id: Option<String>,
    pub overwrite: bool,
    pub roots: Vec<PathBuf>,
    pub categories: ChangeCategories,
    pub interrogate: bool,
    /// Stop on its own after this long.
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    pub run_id: String,
    pub events: usize,
    pub failed: usize,
}

/// Watches every root until `stop` is raised or the duration elapses, then
/// drains the queue and commits all events of the session at once.
pub fn run_monitor(db: &mut Db, filter: Arc<Filter>, session: &MonitorSession, stop: &AtomicBool) -> Result<MonitorReport> {
    if session.roots.is_empty() {
        return Err(PipelineError::InvalidArgument("at least one directory to monitor is required".into()));
    }
    let run_id = resolve_run_id(session.run_id.as_deref())?;

    let (tx, rx) = mpsc::channel::<FileMonitorEvent>();
    let mut monitors = Vec::with_capacity(session.roots.len());
    for root in &session.roots {
        let opts = MonitorOptions {
            root: root.clone(),
            categories: session.categories,
            interrogate: session.interrogate,
        };
        let mut monitor = FileSystemMonitor::new(opts, Arc::clone(&filter), tx.clone());
        // already started monitors stop when `monitors` drops
        monitor.start().map_err(PipelineError::Monitor)?;
        monitors.push(monitor);
    }

    let meta = RunMeta::new(run_id.clone(), RunType::Monitor, [ResultType::File]);
    db.register_run(&meta, session.overwrite)?;
    info!(run_id = %run_id, roots = monitors.len(), "monitoring started");

    let mut failed = 0;
    let mut writer = db.begin_monitor_batch(&run_id)?;
    let mut record = |event: FileMonitorEvent| {
        if let Err(e) = writer.write_event(&event) {
            warn!(path = %event.path, error = %e, "dropping monitor event");
            failed += 1;
        }
    };

    let deadline = session.duration.map(|d| Instant::now() + d);
    loop {
        if stop.load(Ordering::SeqCst) || deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match rx.recv_timeout(POLL) {
            Ok(event) => record(event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    for m in &mut monitors {
        m.stop();
    }
    drop(tx);
    while let Ok(event) = rx.try_recv() {
        record(event);
    }

    let events = writer.commit()?;
    db.finish_run(&run_id)?;
    info!(run_id = %run_id, events, failed, "monitoring stopped");
    Ok(MonitorReport { run_id, events, failed })
}
