use std::time::Duration;

use reqwest::{header::CONTENT_TYPE, StatusCode};
use time::{format_description::FormatItem, macros::format_description};

use crate::pipeline::{FetchRequest, RawReadingSource, RawTable, SourceError};

const START_DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Downloads the interval export from the portal's CSV endpoint.
///
/// Session handling for the real portal lives outside this crate; this source
/// only needs an endpoint that answers `GET ?mprn=..&startDate=..` with the
/// export, optionally behind HTTP basic credentials.
pub struct HttpExportSource {
    client: reqwest::Client,
    export_url: String,
    max_retries: u32,
    retry_backoff: Duration,
}

impl HttpExportSource {
    pub fn new(
        export_url: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("meter-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            export_url: export_url.into(),
            max_retries,
            retry_backoff,
        })
    }

    async fn request_once(&self, request: &FetchRequest, start: &str) -> Result<RawTable, Attempt> {
        let mut req = self
            .client
            .get(&self.export_url)
            .query(&[("mprn", request.meter_id.as_str()), ("startDate", start)]);

        let creds = &request.credentials;
        if !creds.username.is_empty() {
            req = req.basic_auth(&creds.username, Some(&creds.password));
        }

        let resp = req.send().await.map_err(|e| Attempt::Retry(format!("request failed: {e}")))?;
        let status = resp.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Attempt::Fatal(SourceError::Authentication(format!(
                "export endpoint returned {status}"
            ))));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Attempt::Retry(format!("export endpoint returned {status}")));
        }
        if !status.is_success() {
            return Err(Attempt::Fatal(SourceError::Unavailable(format!(
                "export endpoint returned {status}"
            ))));
        }

        let html_content = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/html"));

        let body = resp
            .text()
            .await
            .map_err(|e| Attempt::Retry(format!("failed to read export body: {e}")))?;

        // An expired session is answered with the login page, not a 401.
        if html_content || looks_like_html(&body) {
            return Err(Attempt::Fatal(SourceError::Authentication(
                "export endpoint answered with an HTML page instead of CSV".into(),
            )));
        }

        Ok(RawTable { body })
    }
}

enum Attempt {
    Retry(String),
    Fatal(SourceError),
}

fn looks_like_html(body: &str) -> bool {
    let head: String = body.trim_start().chars().take(15).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

#[async_trait::async_trait]
impl RawReadingSource for HttpExportSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<RawTable, SourceError> {
        let start = request
            .requested_start
            .format(START_DATE_FORMAT)
            .map_err(|e| SourceError::Unavailable(format!("cannot format start date: {e}")))?;

        tracing::info!(meter_id = %request.meter_id, start_date = %start, "downloading export");

        let mut attempt: u32 = 0;
        loop {
            match self.request_once(request, &start).await {
                Ok(table) => {
                    metrics::counter!("meter_ingest_export_bytes_total")
                        .increment(table.body.len() as u64);
                    tracing::debug!(bytes = table.body.len(), "export received");
                    return Ok(table);
                }
                Err(Attempt::Fatal(e)) => {
                    tracing::error!(error = %e, "export download failed");
                    return Err(e);
                }
                Err(Attempt::Retry(msg)) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %msg,
                        attempt,
                        "export download failed, retrying with backoff"
                    );
                    metrics::counter!("meter_ingest_export_retry_total").increment(1);
                    tokio::time::sleep(sleep_for).await;
                }
                Err(Attempt::Retry(msg)) => {
                    tracing::error!(error = %msg, "export download failed, giving up");
                    return Err(SourceError::Unavailable(msg));
                }
            }
        }
    }
}
