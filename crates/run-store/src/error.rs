use surface_core::codec::CodecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run id already used: {0}")]
    DuplicateRunId(String),
    #[error("run not found: {0}")]
    RunNotFound(String),
    #[error("run was never finished: {0}")]
    RunIncomplete(String),
    #[error("unexpected stored value: {0}")]
    Corrupt(String),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
