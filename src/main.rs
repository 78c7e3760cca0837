//! gpuscout - GPU hardware identity controller

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gpuscout::config::Config;

#[tokio::main]
async fn main() {
    // clap exits 2 on its own for unparsable flags/env values.
    let config = Config::parse();

    // RUST_LOG wins when set; LOG_LEVEL is the deployment-facing knob.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    tracing::info!(
        exporter = %config.exporter,
        cluster = %config.cluster,
        namespace = %config.namespace,
        selector = %config.label_selector,
        container = %config.container,
        workers = config.workers,
        "gpuscout starting"
    );

    if let Err(err) = gpuscout::controller::run(config).await {
        tracing::error!(error = %err, "controller failed");
        std::process::exit(2);
    }
}
