use std::time::Duration;

use reqwest::{header::AUTHORIZATION, StatusCode};

use crate::pipeline::{SinkWriteError, TimeSeriesSink};

use super::Point;

/// InfluxDB HTTP write API (`/api/v2/write`, also served by InfluxDB 3).
///
/// One request per point. A 2xx answer means the point is durable.
pub struct InfluxHttpSink {
    client: reqwest::Client,
    write_url: String,
    organisation: String,
    bucket: String,
    token: String,
    max_retries: u32,
    retry_backoff: Duration,
}

enum Attempt {
    Retry(String),
    Rejected(String),
}

impl InfluxHttpSink {
    pub fn new(
        host: &str,
        organisation: impl Into<String>,
        bucket: impl Into<String>,
        token: impl Into<String>,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> Result<Self, SinkWriteError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SinkWriteError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            write_url: format!("{}/api/v2/write", host.trim_end_matches('/')),
            organisation: organisation.into(),
            bucket: bucket.into(),
            token: token.into(),
            max_retries,
            retry_backoff,
        })
    }

    async fn post(&self, line: &str) -> Result<(), Attempt> {
        let resp = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.organisation.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .body(line.to_string())
            .send()
            .await
            .map_err(|e| Attempt::Retry(format!("request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = resp.text().await.unwrap_or_default();
        let msg = format!("write endpoint returned {status}: {}", detail.trim());
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(Attempt::Retry(msg))
        } else {
            Err(Attempt::Rejected(msg))
        }
    }
}

#[async_trait::async_trait]
impl TimeSeriesSink for InfluxHttpSink {
    async fn write(&self, point: &Point) -> Result<(), SinkWriteError> {
        let line = point.to_line();

        let mut attempt: u32 = 0;
        loop {
            match self.post(&line).await {
                Ok(()) => return Ok(()),
                Err(Attempt::Rejected(msg)) => return Err(SinkWriteError(msg)),
                Err(Attempt::Retry(msg)) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %msg,
                        attempt,
                        "influx write failed, retrying with backoff"
                    );
                    metrics::counter!("meter_ingest_sink_retry_total").increment(1);
                    tokio::time::sleep(sleep_for).await;
                }
                Err(Attempt::Retry(msg)) => return Err(SinkWriteError(msg)),
            }
        }
    }
}
