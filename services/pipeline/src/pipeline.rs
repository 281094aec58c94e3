//! Glue between the monitor, the extractor and the loader.

use async_trait::async_trait;
use rif_extract::{
    CycleOutcome, DataSetMonitorListener, DataSetMonitorWorker, MonitorError, RifFilesEvent,
    RifFilesProcessor,
};
use rif_load::{LoadAction, RifLoader};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Running totals across monitor cycles
#[derive(Debug, Default)]
pub struct PipelineStats {
    cycles_without_data: AtomicU64,
    discovery_errors: AtomicU64,
    data_sets: AtomicU64,
    files_failed: AtomicU64,
    records_inserted: AtomicU64,
    records_updated: AtomicU64,
    records_failed: AtomicU64,
}

impl PipelineStats {
    pub fn cycles_without_data(&self) -> u64 {
        self.cycles_without_data.load(Ordering::Relaxed)
    }

    pub fn discovery_errors(&self) -> u64 {
        self.discovery_errors.load(Ordering::Relaxed)
    }

    pub fn data_sets(&self) -> u64 {
        self.data_sets.load(Ordering::Relaxed)
    }

    /// Files that could not be opened at all
    pub fn files_failed(&self) -> u64 {
        self.files_failed.load(Ordering::Relaxed)
    }

    pub fn records_inserted(&self) -> u64 {
        self.records_inserted.load(Ordering::Relaxed)
    }

    pub fn records_updated(&self) -> u64 {
        self.records_updated.load(Ordering::Relaxed)
    }

    pub fn records_failed(&self) -> u64 {
        self.records_failed.load(Ordering::Relaxed)
    }

    fn record_loaded(&self, action: LoadAction) {
        match action {
            LoadAction::Inserted => self.records_inserted.fetch_add(1, Ordering::Relaxed),
            LoadAction::Updated => self.records_updated.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// Monitor listener that extracts and loads every data set it is handed
pub struct RifPipeline {
    processor: RifFilesProcessor,
    loader: RifLoader,
    stats: PipelineStats,
}

impl RifPipeline {
    pub fn new(processor: RifFilesProcessor, loader: RifLoader) -> Self {
        Self {
            processor,
            loader,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}

#[async_trait]
impl DataSetMonitorListener for RifPipeline {
    async fn no_data_available(&self) {
        self.stats.cycles_without_data.fetch_add(1, Ordering::Relaxed);
    }

    async fn data_available(&self, event: &RifFilesEvent) {
        self.stats.data_sets.fetch_add(1, Ordering::Relaxed);

        let mut files = Vec::with_capacity(event.file_events.len());
        for file in &event.file_events {
            match self.processor.produce_records(file.clone()).await {
                Ok(records) => files.push(records),
                Err(e) => {
                    error!(file = %file.file_name, error = %e, "Failed to open RIF file");
                    self.stats.files_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let stats = &self.stats;
        let summaries = self
            .loader
            .process_files(
                files,
                |e| {
                    warn!(error = %e, "Record not loaded");
                    stats.records_failed.fetch_add(1, Ordering::Relaxed);
                },
                |result| stats.record_loaded(result.action),
            )
            .await;

        let loaded: u64 = summaries.iter().map(|s| s.loaded()).sum();
        let failed: u64 = summaries.iter().map(|s| s.failed).sum();
        info!(
            timestamp = %event.timestamp,
            files = summaries.len(),
            loaded,
            failed,
            "Data set loaded"
        );
    }

    async fn error_occurred(&self, error: &MonitorError) {
        self.stats.discovery_errors.fetch_add(1, Ordering::Relaxed);
        error!(error = %error, "Data set discovery failed");
    }
}

/// Run monitor cycles with a fixed delay between them until `shutdown` resolves.
///
/// A cycle that is running when `shutdown` resolves is allowed to finish.
pub async fn run_monitor<F>(monitor: &DataSetMonitorWorker, poll_interval: Duration, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        match monitor.run().await {
            Ok(CycleOutcome::DataSetProcessed { objects_moved, .. }) => {
                debug!(objects_moved, "Monitor cycle processed a data set");
            }
            Ok(outcome) => debug!(?outcome, "Monitor cycle finished"),
            Err(e) => error!(error = %e, "Monitor cycle failed"),
        }

        tokio::select! {
            _ = &mut shutdown => {
                info!("Stopping monitor");
                break;
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}
