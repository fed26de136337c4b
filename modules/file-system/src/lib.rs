//! File system collection: a one-shot walker and a notification driven monitor.

mod collector;
pub mod monitor;

pub use collector::{file_object, hash_file, FileSystemCollector};
pub use monitor::{ChangeCategories, FileSystemMonitor, MonitorOptions, MonitorState};
