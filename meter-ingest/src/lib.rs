pub mod config;
pub mod ledger;
pub mod metrics_export;
pub mod observability;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod transform;

pub use ledger::Ledger;
pub use pipeline::{IngestError, IngestionOrchestrator, RunSettings, RunState, RunSummary};
