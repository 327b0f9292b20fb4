use std::fmt;

use time::Date;

use crate::ledger::{CorruptLedgerError, LedgerWriteError};
use crate::sinks::Point;
use crate::transform::parse::MalformedInputError;

mod orchestrator;

pub use orchestrator::{FailedWrite, IngestionOrchestrator, RunSettings, RunSummary};

/// Portal login details, handed to the source on every fetch.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub meter_id: String,
    pub credentials: Credentials,
    /// Forwarded to the portal, which ignores it and returns full history.
    pub requested_start: Date,
}

/// Raw export text as returned by the portal (header row + data rows).
#[derive(Debug, Clone)]
pub struct RawTable {
    pub body: String,
}

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("authentication rejected: {0}")]
    Authentication(String),
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

#[derive(thiserror::Error, Debug, Clone)]
#[error("sink write failed: {0}")]
pub struct SinkWriteError(pub String);

/// Errors that abort a run. Sink write failures are not among them; they are
/// tallied in the run summary.
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("malformed export: {0}")]
    MalformedInput(#[from] MalformedInputError),
    #[error("corrupt ledger: {0}")]
    CorruptLedger(#[from] CorruptLedgerError),
    #[error("ledger write failed: {0}")]
    LedgerWrite(#[from] LedgerWriteError),
}

impl From<SourceError> for IngestError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Authentication(msg) => Self::Authentication(msg),
            SourceError::Unavailable(msg) => Self::SourceUnavailable(msg),
        }
    }
}

impl IngestError {
    /// State the run was in when it failed.
    pub fn failed_in(&self) -> RunState {
        match self {
            Self::SourceUnavailable(_) | Self::Authentication(_) => RunState::Idle,
            Self::MalformedInput(_) => RunState::Fetched,
            Self::CorruptLedger(_) => RunState::Parsed,
            Self::LedgerWrite(_) => RunState::Deduplicated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetched,
    Parsed,
    Deduplicated,
    Persisted,
    Written,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Fetched => "fetched",
            Self::Parsed => "parsed",
            Self::Deduplicated => "deduplicated",
            Self::Persisted => "persisted",
            Self::Written => "written",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Returns the full reading export for a meter.
#[async_trait::async_trait]
pub trait RawReadingSource: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<RawTable, SourceError>;
}

/// Point-per-reading time-series store.
#[async_trait::async_trait]
pub trait TimeSeriesSink: Send + Sync {
    async fn write(&self, point: &Point) -> Result<(), SinkWriteError>;

    /// Flush and release connections once the run has written everything.
    async fn close(&self) -> Result<(), SinkWriteError> {
        Ok(())
    }
}
