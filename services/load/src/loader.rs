//! Idempotent record loading.
//!
//! Each record is looked up by identity, then written with an upsert. A record
//! that fails is reported through the failure callback and loading continues
//! with the next one. Loading the same records again converts every insert
//! into an update and leaves the store unchanged.

use crate::config::LoadOptions;
use crate::record_store::{RecordStore, StoreError};
use futures::stream::{self, StreamExt};
use rif_extract::{MetricsSink, RecordError, RifFileRecords, RifFileType, RifRecordEvent};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Outcome of persisting one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadAction {
    Inserted,
    Updated,
}

impl LoadAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadAction::Inserted => "INSERTED",
            LoadAction::Updated => "UPDATED",
        }
    }
}

impl fmt::Display for LoadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successfully loaded record
#[derive(Debug, Clone)]
pub struct RifRecordLoadResult {
    pub record: RifRecordEvent,
    pub action: LoadAction,
}

/// A record that could not be loaded
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to extract record: {0}")]
    Extract(#[from] RecordError),

    #[error("Failed to store {file_type} record {identity_key} from {file}:{line}: {source}")]
    Store {
        file: String,
        line: u64,
        file_type: RifFileType,
        identity_key: String,
        #[source]
        source: StoreError,
    },
}

/// Per-file totals returned by [`RifLoader::process`]
#[derive(Debug, Clone, PartialEq)]
pub struct FileLoadSummary {
    pub file_name: String,
    pub file_type: RifFileType,
    pub inserted: u64,
    pub updated: u64,
    pub failed: u64,
    pub elapsed: Duration,
}

impl FileLoadSummary {
    fn new(file_name: &str, file_type: RifFileType) -> Self {
        Self {
            file_name: file_name.to_string(),
            file_type,
            inserted: 0,
            updated: 0,
            failed: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn loaded(&self) -> u64 {
        self.inserted + self.updated
    }

    pub fn total(&self) -> u64 {
        self.loaded() + self.failed
    }
}

/// Loads record streams into a [`RecordStore`]
pub struct RifLoader {
    options: LoadOptions,
    store: Arc<dyn RecordStore>,
    metrics: MetricsSink,
}

impl RifLoader {
    pub fn new(options: LoadOptions, store: Arc<dyn RecordStore>, metrics: MetricsSink) -> Self {
        Self {
            options,
            store,
            metrics,
        }
    }

    /// Load every record of one file, in order.
    ///
    /// Callbacks may be shared with concurrent calls for other files, so they
    /// must tolerate being invoked from several loads at once.
    #[instrument(skip_all, fields(file = %records.file.file_name, file_type = %records.file.file_type))]
    pub async fn process<F, S>(
        &self,
        records: RifFileRecords,
        on_failure: F,
        on_success: S,
    ) -> FileLoadSummary
    where
        F: Fn(LoadError) + Sync,
        S: Fn(RifRecordLoadResult) + Sync,
    {
        let RifFileRecords { file, mut records } = records;
        let file_type = file.file_type;
        let started = Instant::now();
        let mut summary = FileLoadSummary::new(&file.file_name, file_type);

        let labels = |action: LoadAction| {
            [("file_type", file_type.as_str()), ("action", action.as_str())]
        };
        let inserted = self
            .metrics
            .counter("rif.load.records", &labels(LoadAction::Inserted));
        let updated = self
            .metrics
            .counter("rif.load.records", &labels(LoadAction::Updated));
        let failures = self
            .metrics
            .counter("rif.load.failures", &[("file_type", file_type.as_str())]);

        while let Some(item) = records.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    summary.failed += 1;
                    failures.increment(1);
                    on_failure(LoadError::Extract(e));
                    continue;
                }
            };

            match self.load_record(&event).await {
                Ok(action) => {
                    match action {
                        LoadAction::Inserted => {
                            summary.inserted += 1;
                            inserted.increment(1);
                        }
                        LoadAction::Updated => {
                            summary.updated += 1;
                            updated.increment(1);
                        }
                    }
                    on_success(RifRecordLoadResult {
                        record: event,
                        action,
                    });
                }
                Err(source) => {
                    warn!(
                        line = event.line,
                        identity_key = %event.record.identity_key(),
                        error = %source,
                        "Failed to load record"
                    );
                    summary.failed += 1;
                    failures.increment(1);
                    on_failure(LoadError::Store {
                        file: event.file.file_name.clone(),
                        line: event.line,
                        file_type,
                        identity_key: event.record.identity_key().to_string(),
                        source,
                    });
                }
            }
        }

        summary.elapsed = started.elapsed();
        let file_labels = [("file_type", file_type.as_str())];
        self.metrics
            .histogram("rif.load.file_duration_seconds", &file_labels)
            .record(summary.elapsed.as_secs_f64());
        self.metrics
            .histogram("rif.load.records_per_file", &file_labels)
            .record(summary.total() as f64);

        info!(
            inserted = summary.inserted,
            updated = summary.updated,
            failed = summary.failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "File loaded"
        );

        summary
    }

    /// Load several files of one data set, up to `load_concurrency` at a time
    pub async fn process_files<F, S>(
        &self,
        files: Vec<RifFileRecords>,
        on_failure: F,
        on_success: S,
    ) -> Vec<FileLoadSummary>
    where
        F: Fn(LoadError) + Sync,
        S: Fn(RifRecordLoadResult) + Sync,
    {
        let concurrency = self.options.load_concurrency.max(1);
        debug!(files = files.len(), concurrency, "Loading files");

        let on_failure = &on_failure;
        let on_success = &on_success;
        stream::iter(files)
            .map(|file| self.process(file, on_failure, on_success))
            .buffer_unordered(concurrency)
            .collect()
            .await
    }

    async fn load_record(&self, event: &RifRecordEvent) -> Result<LoadAction, StoreError> {
        let record = &event.record;
        let existed = self
            .store
            .exists(record.file_type(), record.identity_key())
            .await?;
        self.store.persist(record).await?;

        Ok(if existed {
            LoadAction::Updated
        } else {
            LoadAction::Inserted
        })
    }
}
