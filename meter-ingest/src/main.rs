use std::{net::SocketAddr, path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use meter_ingest::{
    config::{AppConfig, SinkKind, SourceKind},
    metrics_export, observability,
    pipeline::{
        Credentials, FetchRequest, IngestError, IngestionOrchestrator, RawReadingSource, RawTable,
        RunSettings, SinkWriteError, SourceError, TimeSeriesSink,
    },
    sinks::{InfluxHttpSink, Point, QuestDbIlpSink},
    sources::{CsvFileSource, HttpExportSource},
    Ledger,
};
use time::OffsetDateTime;

/// Download interval readings for one meter and write the new ones to a
/// time-series store.
#[derive(Debug, Parser)]
#[command(name = "meter-ingest", version)]
struct Cli {
    /// Path to the TOML configuration (default: $METER_INGEST_CONFIG or meter-ingest.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,
}

enum ExportSource {
    Http(HttpExportSource),
    File(CsvFileSource),
}

#[async_trait::async_trait]
impl RawReadingSource for ExportSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<RawTable, SourceError> {
        match self {
            Self::Http(s) => s.fetch(request).await,
            Self::File(s) => s.fetch(request).await,
        }
    }
}

enum ReadingSink {
    Influx(InfluxHttpSink),
    Ilp(QuestDbIlpSink),
}

#[async_trait::async_trait]
impl TimeSeriesSink for ReadingSink {
    async fn write(&self, point: &Point) -> Result<(), SinkWriteError> {
        match self {
            Self::Influx(s) => s.write(point).await,
            Self::Ilp(s) => s.write(point).await,
        }
    }

    async fn close(&self) -> Result<(), SinkWriteError> {
        match self {
            Self::Influx(s) => s.close().await,
            Self::Ilp(s) => s.close().await,
        }
    }
}

fn build_source(cfg: &AppConfig) -> Result<ExportSource> {
    let src = &cfg.source;
    Ok(match src.kind {
        SourceKind::HttpExport => {
            let url = src.export_url.clone().context("source.export_url is not set")?;
            ExportSource::Http(HttpExportSource::new(
                url,
                Duration::from_secs(src.timeout_secs),
                src.max_retries,
                Duration::from_millis(src.retry_backoff_ms),
            )?)
        }
        SourceKind::CsvFile => {
            let path = src.path.clone().context("source.path is not set")?;
            ExportSource::File(CsvFileSource::new(path))
        }
    })
}

fn build_sink(cfg: &AppConfig) -> Result<ReadingSink> {
    let sink = &cfg.sink;
    let retry_backoff = Duration::from_millis(sink.retry_backoff_ms);
    Ok(match sink.kind {
        SinkKind::InfluxHttp => {
            let influx = sink.influx.as_ref().context("[sink.influx] is not set")?;
            ReadingSink::Influx(InfluxHttpSink::new(
                &influx.host,
                influx.organisation.clone(),
                influx.bucket.clone(),
                influx.token.clone(),
                sink.max_retries,
                retry_backoff,
            )?)
        }
        SinkKind::Ilp => {
            let ilp = sink.ilp.as_ref().context("[sink.ilp] is not set")?;
            let addr: SocketAddr = ilp
                .tcp_addr
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid sink.ilp.tcp_addr: {e}"))?;
            ReadingSink::Ilp(QuestDbIlpSink::new(addr, sink.max_retries, retry_backoff))
        }
    })
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = AppConfig::load(cli.config.as_deref())?;

    if cfg.metrics.is_some() {
        metrics_export::init()?;
    }

    let settings = RunSettings {
        meter_id: cfg.meter.meter_id.clone(),
        credentials: Credentials {
            username: cfg.source.username.clone(),
            password: cfg.source.password.clone(),
        },
        measurement: cfg.sink.measurement.clone(),
        run_date: OffsetDateTime::now_utc().date(),
        dst_window: cfg.dedup,
        bad_row_policy: cfg.parser.bad_row_policy,
    };

    let orchestrator = IngestionOrchestrator::new(
        build_source(&cfg)?,
        build_sink(&cfg)?,
        Ledger::new(cfg.ledger.path.clone()),
        settings,
    );

    let outcome = orchestrator.run().await;

    if let Some(metrics_cfg) = &cfg.metrics {
        if let Err(e) = metrics_export::write_textfile(&metrics_cfg.textfile_path) {
            tracing::warn!(error = %format!("{e:#}"), "metrics textfile not written");
        }
    }

    let summary = outcome?;
    if summary.failed > 0 {
        tracing::warn!(
            failed = summary.failed,
            "some readings are in the ledger but not in the store; backfill them manually"
        );
        for failure in &summary.failures {
            tracing::warn!(
                identity_key = %failure.identity_key,
                error = %failure.error,
                "not written"
            );
        }
    }
    Ok(())
}

/// Run failures are logged by the orchestrator with the state they failed in.
fn already_logged(e: &anyhow::Error) -> bool {
    e.downcast_ref::<IngestError>().is_some()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    observability::init_tracing(cli.debug);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if already_logged(&e) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "meter-ingest failed");
            ExitCode::FAILURE
        }
    }
}
