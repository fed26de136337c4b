//! Collect, compare and monitor runs end to end, plus the JSON exports.

mod collect;
mod compare;
mod error;
mod export;
mod monitor;

pub use collect::{run_collect, CollectOptions, CollectReport, CollectorOutcome, CollectorStatus};
pub use compare::{resolve_latest, resolve_latest_pair, run_compare, CompareReport};
pub use error::PipelineError;
pub use export::{export_comparison, export_monitor, sanitize_file_name, ComparisonSummary, KindCounts};
pub use monitor::{run_monitor, MonitorReport, MonitorSession};

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
