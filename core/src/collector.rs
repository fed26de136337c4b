//! Collector contract shared by every resource module.

use std::collections::HashSet;

use anyhow::Result;
use tracing::{debug, warn};

use crate::filter::{Filter, Operation};
use crate::model::{Record, ResultType};

/// Destination for normalized records of one run and kind.
pub trait RecordSink {
    fn write(&mut self, record: &Record) -> Result<()>;
}

impl RecordSink for Vec<Record> {
    fn write(&mut self, record: &Record) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

pub struct CollectContext<'a> {
    pub run_id: &'a str,
    pub filter: &'a Filter,
}

pub trait Collector {
    fn name(&self) -> &'static str;
    fn kind(&self) -> ResultType;
    fn can_run_on_platform(&self) -> bool;
    fn collect(&self, ctx: &CollectContext<'_>, out: &mut Emitter<'_>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitStats {
    pub collected: usize,
    pub filtered: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Applies filter, dedup and counting in front of a [`RecordSink`].
pub struct Emitter<'a> {
    kind: ResultType,
    filter: &'a Filter,
    sink: &'a mut dyn RecordSink,
    seen: HashSet<String>,
    stats: EmitStats,
}

impl<'a> Emitter<'a> {
    pub fn new(kind: ResultType, filter: &'a Filter, sink: &'a mut dyn RecordSink) -> Self {
        Self { kind, filter, sink, seen: HashSet::new(), stats: EmitStats::default() }
    }

    /// Returns true when the record was written.
    pub fn emit(&mut self, record: impl Into<Record>) -> bool {
        let record = record.into();
        if record.kind() != self.kind {
            warn!(expected = %self.kind, got = %record.kind(), "record of wrong kind dropped");
            self.stats.failed += 1;
            return false;
        }
        if self.filter.is_filtered_record(Operation::Scan, &record) {
            self.stats.filtered += 1;
            return false;
        }
        if !self.seen.insert(record.dedup_key()) {
            debug!(kind = %self.kind, key = %record.dedup_key(), "duplicate record skipped");
            self.stats.duplicates += 1;
            return false;
        }
        match self.sink.write(&record) {
            Ok(()) => {
                self.stats.collected += 1;
                true
            }
            Err(e) => {
                warn!(kind = %self.kind, error = %e, "failed to write record");
                self.stats.failed += 1;
                false
            }
        }
    }

    pub fn num_collected(&self) -> usize {
        self.stats.collected
    }

    pub fn stats(&self) -> EmitStats {
        self.stats
    }
}
