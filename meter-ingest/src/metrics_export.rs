use std::{io::Write, path::Path};

use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tempfile::NamedTempFile;

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Counters recorded before this are lost.
pub fn init() -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus metrics recorder")?;

    // Ignore error if the handle was already set; this should only be called once.
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

/// Render the current counters in the Prometheus text format, for a
/// node_exporter textfile collector. Replaces the file atomically.
pub fn write_textfile(path: &Path) -> anyhow::Result<()> {
    let handle = PROM_HANDLE
        .get()
        .context("Prometheus recorder not initialized")?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create metrics temp file in {}", dir.display()))?;
    tmp.write_all(handle.render().as_bytes())?;
    tmp.persist(path)
        .with_context(|| format!("failed to write metrics textfile {}", path.display()))?;
    Ok(())
}
