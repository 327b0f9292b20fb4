use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins when set; otherwise this crate logs at info, or debug with `--debug`.
pub fn init_tracing(debug: bool) {
    let default_directive = if debug { "meter_ingest=debug" } else { "meter_ingest=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if debug {
        tracing::debug!("Debug mode enabled.");
    }
}
