use std::fmt;

use time::Date;

use crate::ledger::{self, Ledger};
use crate::sinks::Point;
use crate::transform::{parse_export, BadRowPolicy, Deduplicator, DstWindow};

use super::{Credentials, FetchRequest, IngestError, RawReadingSource, RunState, TimeSeriesSink};

/// Progress is logged at info level every this many points.
const PROGRESS_EVERY: usize = 500;

/// Immutable per-run settings, built once from the configuration.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub meter_id: String,
    pub credentials: Credentials,
    pub measurement: String,
    /// Sent to the source as the requested start and used to centre the DST window.
    pub run_date: Date,
    pub dst_window: DstWindow,
    pub bad_row_policy: BadRowPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedWrite {
    pub identity_key: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub total_downloaded: usize,
    pub new_count: usize,
    pub written: usize,
    pub failed: usize,
    /// Points the sink refused, in write order. The ledger already counts them
    /// as seen, so they need a manual backfill.
    pub failures: Vec<FailedWrite>,
    /// States the run went through, `Idle` to `Done`.
    pub states: Vec<RunState>,
}

impl RunSummary {
    pub fn final_state(&self) -> RunState {
        self.states.last().copied().unwrap_or(RunState::Idle)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.new_count == 0 {
            return write!(f, "No new data found ({} entries downloaded)", self.total_downloaded);
        }
        write!(
            f,
            "{} new entries found ({} entries downloaded), {} written successfully, {} failed to write",
            self.new_count, self.total_downloaded, self.written, self.failed
        )
    }
}

fn enter(states: &mut Vec<RunState>, next: RunState) {
    if let Some(prev) = states.last() {
        tracing::debug!(from = %prev, to = %next, "run state");
    }
    states.push(next);
}

/// Drives one ingestion run: fetch, parse, dedup against the ledger, replace
/// the ledger, then write the new readings to the sink.
pub struct IngestionOrchestrator<S, K> {
    source: S,
    sink: K,
    ledger: Ledger,
    settings: RunSettings,
}

impl<S, K> IngestionOrchestrator<S, K>
where
    S: RawReadingSource,
    K: TimeSeriesSink,
{
    pub fn new(source: S, sink: K, ledger: Ledger, settings: RunSettings) -> Self {
        Self {
            source,
            sink,
            ledger,
            settings,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Run to `Done`, or fail before any durable change.
    ///
    /// Sink failures do not fail the run; they are counted in the summary.
    pub async fn run(&self) -> Result<RunSummary, IngestError> {
        let mut states = vec![RunState::Idle];
        match self.execute(&mut states).await {
            Ok(summary) => {
                metrics::counter!("meter_ingest_runs_total", "outcome" => "done").increment(1);
                Ok(summary)
            }
            Err(e) => {
                if let Some(last) = states.last() {
                    tracing::debug!(from = %last, to = %RunState::Failed, "run state");
                }
                metrics::counter!("meter_ingest_runs_total", "outcome" => "failed").increment(1);
                tracing::error!(error = %e, failed_in = %e.failed_in(), "ingestion run failed");
                Err(e)
            }
        }
    }

    async fn execute(&self, states: &mut Vec<RunState>) -> Result<RunSummary, IngestError> {
        let settings = &self.settings;

        tracing::info!(meter_id = %settings.meter_id, "Loading export for meter");
        let request = FetchRequest {
            meter_id: settings.meter_id.clone(),
            credentials: settings.credentials.clone(),
            requested_start: settings.run_date,
        };
        let raw = self.source.fetch(&request).await?;
        enter(states, RunState::Fetched);

        let records = parse_export(&raw.body, settings.bad_row_policy)?;
        metrics::counter!("meter_ingest_records_downloaded_total").increment(records.len() as u64);
        enter(states, RunState::Parsed);

        let previous_keys = ledger::identity_keys(&self.ledger.load()?);
        tracing::debug!(existing = previous_keys.len(), "existing records in ledger");

        let dedup = Deduplicator::for_run(settings.run_date, settings.dst_window);
        let new_entries = dedup.diff(&records, &previous_keys);
        tracing::info!(
            "Found {} new entries ({} entries downloaded)",
            new_entries.len(),
            records.len()
        );
        metrics::counter!("meter_ingest_records_new_total").increment(new_entries.len() as u64);
        enter(states, RunState::Deduplicated);

        self.ledger.replace(&records)?;
        enter(states, RunState::Persisted);

        let mut summary = RunSummary {
            total_downloaded: records.len(),
            new_count: new_entries.len(),
            written: 0,
            failed: 0,
            failures: Vec::new(),
            states: Vec::new(),
        };

        if new_entries.is_empty() {
            tracing::info!("No new data found");
            enter(states, RunState::Done);
            summary.states = states.clone();
            return Ok(summary);
        }

        let total = new_entries.len();
        for (i, record) in new_entries.iter().enumerate() {
            let point = Point::from_reading(&settings.measurement, record);
            match self.sink.write(&point).await {
                Ok(()) => {
                    summary.written += 1;
                    metrics::counter!("meter_ingest_sink_writes_total").increment(1);
                }
                Err(e) => {
                    tracing::warn!(
                        identity_key = %record.identity_key,
                        error = %e,
                        "point not written"
                    );
                    metrics::counter!("meter_ingest_sink_write_failures_total").increment(1);
                    summary.failures.push(FailedWrite {
                        identity_key: record.identity_key.clone(),
                        error: e.to_string(),
                    });
                }
            }

            let done = i + 1;
            if done % PROGRESS_EVERY == 0 || done == total {
                tracing::info!("Processing entry {done}/{total}");
            } else {
                tracing::trace!("Processing entry {done}/{total}");
            }
        }

        if let Err(e) = self.sink.close().await {
            tracing::warn!(error = %e, "sink did not close cleanly");
        }

        summary.failed = summary.failures.len();
        enter(states, RunState::Written);
        enter(states, RunState::Done);
        summary.states = states.clone();

        tracing::info!("{summary}");
        Ok(summary)
    }
}
