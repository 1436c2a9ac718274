use anyhow::Result;
use clap::Parser;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use podwatt::{config, exporter, http, metrics, scan};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = config::Cli::parse();
    run(cli.config).await
}

async fn run(config: config::Config) -> Result<()> {
    let scanner = scan::PodScanner::from_config(&config)?;
    let metrics = metrics::Metrics::new();

    // Bind before spawning the loop so a bad address fails fast.
    let listener = tokio::net::TcpListener::bind(config.bind).await?;

    let exporter = exporter::Exporter::new(
        scanner,
        config.annotation_keys(),
        config.switch_fraction,
        metrics.clone(),
    );
    let _exporter = exporter::spawn_exporter(exporter, config.interval());

    let app = http::build_router(metrics)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    info!(
        bind = %config.bind,
        interval_ms = config.interval_ms,
        switch_fraction = config.switch_fraction,
        selector = config.label_selector().unwrap_or("(none)"),
        "starting podwatt"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).compact().init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
