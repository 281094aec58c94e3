use anyhow::{Context, Result};
use rif_extract::{DataSetMonitorWorker, MetricsSink, ObjectStore, RifFilesProcessor, S3ObjectStore};
use rif_load::{PostgresRecordStore, RifLoader};
use rif_pipeline::{run_monitor, Config, RifPipeline};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        bucket = %config.s3.bucket,
        "Starting RIF pipeline"
    );

    // Initialize metrics
    let metrics = init_metrics(config.service.metrics_port)?;

    // Initialize stores
    let record_store = PostgresRecordStore::new(&config.database)
        .await
        .context("Failed to initialize record store")?;

    if config.database.run_migrations {
        record_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let object_store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(&config.s3).await);

    let pipeline = Arc::new(RifPipeline::new(
        RifFilesProcessor::new(object_store.clone(), metrics.clone()),
        RifLoader::new(config.load.clone(), Arc::new(record_store), metrics.clone()),
    ));

    let monitor = DataSetMonitorWorker::new(
        object_store,
        config.extraction.clone(),
        pipeline.clone(),
        metrics,
    );

    // Install signal handlers before the first cycle starts
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    info!(
        poll_interval_secs = config.service.poll_interval_secs,
        "RIF pipeline started"
    );

    run_monitor(&monitor, config.poll_interval(), async {
        let _ = shutdown_rx.await;
    })
    .await;

    let stats = pipeline.stats();
    info!(
        data_sets = stats.data_sets(),
        records_inserted = stats.records_inserted(),
        records_updated = stats.records_updated(),
        records_failed = stats.records_failed(),
        "RIF pipeline stopped"
    );

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Build the Prometheus recorder and start its HTTP exporter
fn init_metrics(port: u16) -> Result<MetricsSink> {
    let (recorder, exporter) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .build()
        .context("Failed to build Prometheus metrics exporter")?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            error!(error = ?e, "Prometheus metrics exporter stopped");
        }
    });

    info!(port = port, "Prometheus metrics exporter started");

    Ok(MetricsSink::new(Arc::new(recorder)))
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
