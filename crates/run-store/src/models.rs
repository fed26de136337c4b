use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use surface_core::codec;
use surface_core::{ChangeType, Record, ResultType, RunType};

use crate::{Result, StoreError};

pub fn now_ms() -> i64 {
    surface_core::platform::unix_millis()
}

/// Run metadata as registered at the start of a collect or monitor run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub run_type: RunType,
    pub timestamp: i64,
    pub version: String,
    pub kinds: BTreeSet<ResultType>,
}

impl RunMeta {
    pub fn new(run_id: impl Into<String>, run_type: RunType, kinds: impl IntoIterator<Item = ResultType>) -> Self {
        Self {
            run_id: run_id.into(),
            run_type,
            timestamp: now_ms(),
            version: surface_core::version().to_string(),
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn collects(&self, kind: ResultType) -> bool {
        self.kinds.contains(&kind)
    }
}

/// A `runs` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(flatten)]
    pub meta: RunMeta,
    pub finished_at: Option<i64>,
}

impl RunRecord {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// A persisted record, still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub run_id: String,
    pub row_key: String,
    pub serialized: Vec<u8>,
}

impl StoredRow {
    pub fn decode(&self, kind: ResultType) -> Result<Record> {
        let json = codec::decode(&self.serialized)?;
        Ok(Record::from_json(kind, &json)?)
    }
}

/// One `compared` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparedRow {
    pub base_run_id: String,
    pub compare_run_id: String,
    pub base_row_key: Option<String>,
    pub compare_row_key: Option<String>,
    pub change_type: ChangeType,
    pub kind: ResultType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonStatus {
    Running,
    Completed,
}

impl ComparisonStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ComparisonStatus::Running => "running",
            ComparisonStatus::Completed => "completed",
        }
    }

    pub(crate) fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(ComparisonStatus::Running),
            "completed" => Ok(ComparisonStatus::Completed),
            other => Err(StoreError::Corrupt(format!("comparison status {other:?}"))),
        }
    }
}
