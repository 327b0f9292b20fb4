use std::{net::SocketAddr, time::Duration};

use tokio::{io::AsyncWriteExt, net::TcpStream, sync::Mutex};

use crate::pipeline::{SinkWriteError, TimeSeriesSink};

use super::Point;

/// Line protocol over a plain TCP connection (QuestDB ILP port, InfluxDB
/// socket listeners).
///
/// The protocol has no per-line acknowledgement: a successful write means the
/// bytes reached the socket, not that the server committed them.
pub struct QuestDbIlpSink {
    addr: SocketAddr,
    max_retries: u32,
    retry_backoff: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl QuestDbIlpSink {
    pub fn new(addr: SocketAddr, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            addr,
            max_retries,
            retry_backoff,
            stream: Mutex::new(None),
        }
    }

    async fn send(&self, slot: &mut Option<TcpStream>, line: &[u8]) -> std::io::Result<()> {
        if slot.is_none() {
            let stream = TcpStream::connect(self.addr).await?;
            let _ = stream.set_nodelay(true);
            tracing::debug!(addr = %self.addr, "connected to ILP endpoint");
            *slot = Some(stream);
        }
        if let Some(stream) = slot.as_mut() {
            stream.write_all(line).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TimeSeriesSink for QuestDbIlpSink {
    async fn write(&self, point: &Point) -> Result<(), SinkWriteError> {
        let mut line = point.to_line();
        line.push('\n');

        let mut slot = self.stream.lock().await;
        let mut attempt: u32 = 0;
        loop {
            match self.send(&mut slot, line.as_bytes()).await {
                Ok(()) => {
                    metrics::counter!("meter_ingest_ilp_bytes_total").increment(line.len() as u64);
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    *slot = None;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "ILP write failed, reconnecting and retrying"
                    );
                    metrics::counter!("meter_ingest_sink_retry_total").increment(1);
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    *slot = None;
                    return Err(SinkWriteError(format!("ilp write to {} failed: {e}", self.addr)));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), SinkWriteError> {
        if let Some(mut stream) = self.stream.lock().await.take() {
            stream
                .shutdown()
                .await
                .map_err(|e| SinkWriteError(format!("ilp shutdown failed: {e}")))?;
        }
        Ok(())
    }
}
