use std::path::PathBuf;

use crate::pipeline::{FetchRequest, RawReadingSource, RawTable, SourceError};

/// An export that was already downloaded to disk.
///
/// Like the portal it returns the whole file whatever start date is requested.
/// Used for manual backfills and offline runs.
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl RawReadingSource for CsvFileSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<RawTable, SourceError> {
        tracing::info!(
            path = %self.path.display(),
            meter_id = %request.meter_id,
            "reading export from file"
        );

        let body = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SourceError::Unavailable(format!(
                "failed to read export file {}: {e}",
                self.path.display()
            ))
        })?;

        Ok(RawTable { body })
    }
}
