//! Notification driven file change stream.
//!
//! A [`FileSystemMonitor`] watches one root recursively and pushes normalized
//! [`FileMonitorEvent`]s into a channel shared by every monitor of a session.

use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use surface_core::filter::Operation;
use surface_core::platform::{platform_name, unix_millis};
use surface_core::{ChangeType, FileMonitorEvent, Filter, ResultType};
use tracing::{debug, info, warn};

use crate::collector::file_object;

/// Which kinds of change a monitor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeCategories {
    pub creation: bool,
    pub deletion: bool,
    pub rename: bool,
    /// Attribute, size and permission changes.
    pub attributes: bool,
    pub content: bool,
}

impl ChangeCategories {
    pub const ALL: ChangeCategories =
        ChangeCategories { creation: true, deletion: true, rename: true, attributes: true, content: true };
}

impl Default for ChangeCategories {
    fn default() -> Self {
        Self::ALL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Running,
}

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub root: PathBuf,
    pub categories: ChangeCategories,
    /// Re-stat paths after an event to fill in size, permissions and owner.
    pub interrogate: bool,
}

pub struct FileSystemMonitor {
    options: MonitorOptions,
    filter: Arc<Filter>,
    tx: Sender<FileMonitorEvent>,
    watcher: Option<RecommendedWatcher>,
}

impl FileSystemMonitor {
    pub fn new(options: MonitorOptions, filter: Arc<Filter>, tx: Sender<FileMonitorEvent>) -> Self {
        Self { options, filter, tx, watcher: None }
    }

    pub fn state(&self) -> MonitorState {
        if self.watcher.is_some() {
            MonitorState::Running
        } else {
            MonitorState::Stopped
        }
    }

    pub fn root(&self) -> &Path {
        &self.options.root
    }

    pub fn start(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            bail!("monitor for {} already running", self.options.root.display());
        }
        let categories = self.options.categories;
        let interrogate = self.options.interrogate;
        let filter = Arc::clone(&self.filter);
        let tx = self.tx.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for ev in normalize_event(&event, categories, interrogate, unix_millis()) {
                    if is_filtered(&filter, &ev.path) {
                        continue;
                    }
                    if tx.send(ev).is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "watch error"),
        })
        .context("creating file watcher")?;
        watcher
            .watch(&self.options.root, RecursiveMode::Recursive)
            .with_context(|| format!("watching {}", self.options.root.display()))?;

        info!(root = %self.options.root.display(), "monitor started");
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Stops watching. A stopped monitor stays stopped.
    pub fn stop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            drop(watcher);
            info!(root = %self.options.root.display(), "monitor stopped");
        }
    }
}

impl Drop for FileSystemMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_filtered(filter: &Filter, path: &str) -> bool {
    filter.is_filtered(platform_name(), Operation::Monitor, ResultType::File.filter_name(), "Path", path)
}

fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn event(change_type: ChangeType, path: &Path, filters: &str, timestamp: i64) -> FileMonitorEvent {
    FileMonitorEvent {
        change_type,
        path: path.to_string_lossy().into_owned(),
        old_path: None,
        name: name_of(path),
        old_name: None,
        timestamp,
        notify_filters: filters.to_string(),
        extended: None,
    }
}

/// Maps one notification onto zero or more events. Access notifications and
/// categories switched off in `categories` produce nothing.
pub fn normalize_event(
    ev: &Event,
    categories: ChangeCategories,
    interrogate: bool,
    timestamp: i64,
) -> Vec<FileMonitorEvent> {
    let single = |change_type, filters: &str| -> Vec<FileMonitorEvent> {
        ev.paths.iter().map(|p| event(change_type, p, filters, timestamp)).collect()
    };

    let mut out = match ev.kind {
        EventKind::Create(_) if categories.creation => single(ChangeType::Created, "Creation"),
        EventKind::Remove(_) if categories.deletion => single(ChangeType::Deleted, "Deletion"),
        EventKind::Modify(ModifyKind::Name(mode)) if categories.rename => match (mode, ev.paths.as_slice()) {
            (RenameMode::Both, [from, to, ..]) => {
                let mut e = event(ChangeType::Renamed, to, "Rename", timestamp);
                e.old_path = Some(from.to_string_lossy().into_owned());
                e.old_name = Some(name_of(from));
                vec![e]
            }
            (RenameMode::From, _) => single(ChangeType::Deleted, "Rename"),
            (RenameMode::To, _) => single(ChangeType::Created, "Rename"),
            _ => single(ChangeType::Renamed, "Rename"),
        },
        EventKind::Modify(ModifyKind::Metadata(_)) if categories.attributes => {
            single(ChangeType::Modified, "Attributes")
        }
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) | EventKind::Modify(ModifyKind::Other)
            if categories.content =>
        {
            single(ChangeType::Modified, "Content")
        }
        _ => Vec::new(),
    };

    if interrogate {
        for e in out.iter_mut().filter(|e| e.change_type != ChangeType::Deleted) {
            match file_object(Path::new(&e.path), false) {
                Ok(obj) => e.extended = Some(obj),
                Err(err) => debug!(path = %e.path, error = %err, "interrogation failed"),
            }
        }
    }
    out
}
