//! Data set discovery.
//!
//! Each [`DataSetMonitorWorker::run`] is one polling cycle against the
//! `Pending/` location of the bucket:
//!
//! 1. list every object under `Pending/`
//! 2. find the earliest manifest timestamp and read all manifests sharing it
//! 3. hold the group back unless every entry of every manifest is listed
//! 4. drop manifests rejected by the file type filter
//! 5. take manifests in sequence order up to the per-run file cap
//! 6. notify the listener, then move the selected objects to `Completed/`
//!
//! The listener sees exactly one notification per cycle. Cycles must not run
//! concurrently against the same bucket.

use crate::config::ExtractionOptions;
use crate::manifest::{DataSetManifest, DataSetManifestId, ManifestError, StorageLocation};
use crate::metrics::MetricsSink;
use crate::model::{RifFileEvent, RifFilesEvent};
use crate::object_store::{ObjectStore, ObjectStoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Errors raised by a monitor cycle
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to list pending data sets")]
    Listing(#[source] ObjectStoreError),

    #[error("Failed to read manifest {key}")]
    ManifestRead {
        key: String,
        #[source]
        source: ObjectStoreError,
    },

    #[error("Invalid manifest {key}")]
    Manifest {
        key: String,
        #[source]
        source: ManifestError,
    },

    #[error("Failed to move data set {data_set} to Completed")]
    Move {
        data_set: DataSetManifestId,
        #[source]
        source: ObjectStoreError,
    },
}

/// Receives the outcome of each monitor cycle
#[async_trait]
pub trait DataSetMonitorListener: Send + Sync {
    /// Nothing ready to process this cycle
    async fn no_data_available(&self);

    /// A data set is ready. The files stay in `Pending/` until this returns.
    async fn data_available(&self, event: &RifFilesEvent);

    /// Discovery failed; nothing was moved
    async fn error_occurred(&self, error: &MonitorError);
}

/// What a cycle did, for the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    NoDataAvailable,
    DataSetProcessed {
        timestamp: DateTime<Utc>,
        sequence_ids: Vec<u32>,
        files: usize,
        objects_moved: usize,
    },
    DiscoveryFailed,
}

/// Polls one bucket for ready data sets
pub struct DataSetMonitorWorker {
    store: Arc<dyn ObjectStore>,
    options: ExtractionOptions,
    listener: Arc<dyn DataSetMonitorListener>,
    metrics: MetricsSink,
}

impl DataSetMonitorWorker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        options: ExtractionOptions,
        listener: Arc<dyn DataSetMonitorListener>,
        metrics: MetricsSink,
    ) -> Self {
        Self {
            store,
            options,
            listener,
            metrics,
        }
    }

    /// Run a single discovery cycle.
    ///
    /// Discovery failures are reported to the listener and returned as
    /// [`CycleOutcome::DiscoveryFailed`]. A failure while moving a dispatched
    /// data set is returned as [`MonitorError::Move`]; the data set remains
    /// discoverable in `Pending/`.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<CycleOutcome, MonitorError> {
        match self.discover().await {
            Ok(None) => {
                debug!("No data set ready");
                self.count_cycle("no_data");
                self.listener.no_data_available().await;
                Ok(CycleOutcome::NoDataAvailable)
            }
            Ok(Some(manifests)) => self.dispatch(manifests).await,
            Err(e) => {
                warn!(error = %e, "Data set discovery failed");
                self.count_cycle("error");
                self.listener.error_occurred(&e).await;
                Ok(CycleOutcome::DiscoveryFailed)
            }
        }
    }

    async fn dispatch(
        &self,
        manifests: Vec<DataSetManifest>,
    ) -> Result<CycleOutcome, MonitorError> {
        let event = files_event(&manifests);
        let files = event.file_events.len();

        info!(
            timestamp = %event.timestamp,
            sequence_ids = ?event.sequence_ids,
            files,
            "Data set ready"
        );
        self.listener.data_available(&event).await;

        let objects_moved = match self.advance(&manifests).await {
            Ok(moved) => moved,
            Err(e) => {
                error!(error = %e, "Failed to advance data set");
                self.count_cycle("move_failed");
                return Err(e);
            }
        };

        self.count_cycle("data_set");
        self.metrics
            .counter("rif.monitor.objects_moved", &[])
            .increment(objects_moved as u64);

        info!(
            timestamp = %event.timestamp,
            objects_moved,
            "Data set moved to Completed"
        );

        Ok(CycleOutcome::DataSetProcessed {
            timestamp: event.timestamp,
            sequence_ids: event.sequence_ids,
            files,
            objects_moved,
        })
    }

    /// Select the manifests to process this cycle, or `None` when nothing is ready
    async fn discover(&self) -> Result<Option<Vec<DataSetManifest>>, MonitorError> {
        let pending = StorageLocation::Pending;
        let keys = self
            .store
            .list_objects(pending.prefix())
            .await
            .map_err(MonitorError::Listing)?;
        let listed: HashSet<&str> = keys.iter().map(String::as_str).collect();

        let mut ids = BTreeSet::new();
        let mut unusable = Vec::new();
        for key in &keys {
            match DataSetManifestId::from_manifest_key(pending, key) {
                Ok(id) => ids.extend(id),
                Err(source) => unusable.push((key, source)),
            }
        }

        let earliest = ids.first().map(|id| id.timestamp);

        // An unusable key dated at or before the earliest group blocks that group
        for (key, source) in unusable {
            let blocking = match DataSetManifestId::key_timestamp(pending, key) {
                Some(timestamp) => earliest.map_or(true, |earliest| timestamp <= earliest),
                None => false,
            };
            if blocking {
                return Err(MonitorError::Manifest {
                    key: key.clone(),
                    source,
                });
            }
            warn!(key = %key, error = %source, "Ignoring unusable manifest key");
        }

        let Some(earliest) = earliest else {
            return Ok(None);
        };

        let mut group = Vec::new();
        for id in ids.iter().take_while(|id| id.timestamp == earliest) {
            group.push(self.read_manifest(id).await?);
        }

        let incomplete = group.iter().find(|manifest| {
            !manifest
                .entries()
                .iter()
                .all(|entry| listed.contains(manifest.entry_key(pending, entry).as_str()))
        });
        if let Some(manifest) = incomplete {
            debug!(data_set = %manifest.id(), "Data set not fully uploaded yet");
            return Ok(None);
        }

        let accepted: Vec<DataSetManifest> = group
            .into_iter()
            .filter(|manifest| self.accepts(manifest))
            .collect();

        let mut selected = Vec::new();
        let mut files = 0;
        for manifest in accepted {
            let count = manifest.entries().len();
            if !selected.is_empty() && files + count > self.options.max_files_per_run {
                break;
            }
            files += count;
            selected.push(manifest);
        }

        Ok((!selected.is_empty()).then_some(selected))
    }

    async fn read_manifest(&self, id: &DataSetManifestId) -> Result<DataSetManifest, MonitorError> {
        let pending = StorageLocation::Pending;
        let key = id.manifest_key(pending);
        let content = self
            .store
            .get_object_bytes(&key)
            .await
            .map_err(|source| MonitorError::ManifestRead {
                key: key.clone(),
                source,
            })?;

        DataSetManifest::parse_at(pending, &key, &content)
            .map_err(|source| MonitorError::Manifest { key, source })
    }

    fn accepts(&self, manifest: &DataSetManifest) -> bool {
        match self.options.data_set_filter {
            None => true,
            Some(file_type) => {
                let accepted = manifest.entries().iter().all(|e| e.file_type == file_type);
                if !accepted {
                    debug!(
                        data_set = %manifest.id(),
                        filter = %file_type,
                        "Skipping data set outside filter"
                    );
                }
                accepted
            }
        }
    }

    /// Copy every object of the selected data sets to `Completed/`, then delete the originals
    async fn advance(&self, manifests: &[DataSetManifest]) -> Result<usize, MonitorError> {
        let mut moved = 0;

        for manifest in manifests {
            let sources = manifest.object_keys(StorageLocation::Pending);
            let targets = manifest.object_keys(StorageLocation::Completed);
            let move_error = |source: ObjectStoreError| MonitorError::Move {
                data_set: manifest.id(),
                source,
            };

            for (source, target) in sources.iter().zip(&targets) {
                self.store
                    .copy_object(source, target)
                    .await
                    .map_err(move_error)?;
            }
            // Deletes last so an interrupted move leaves the data set discoverable
            for source in &sources {
                self.store.delete_object(source).await.map_err(move_error)?;
            }

            moved += sources.len();
        }

        Ok(moved)
    }

    fn count_cycle(&self, outcome: &'static str) {
        self.metrics
            .counter("rif.monitor.cycles", &[("outcome", outcome)])
            .increment(1);
    }
}

fn files_event(manifests: &[DataSetManifest]) -> RifFilesEvent {
    let timestamp = manifests
        .first()
        .map(|m| m.timestamp())
        .unwrap_or_else(Utc::now);
    let sequence_ids = manifests.iter().map(|m| m.sequence_id()).collect();

    let file_events = manifests
        .iter()
        .flat_map(|manifest| {
            manifest.entries().iter().map(move |entry| {
                RifFileEvent::new(
                    manifest.entry_key(StorageLocation::Pending, entry),
                    entry.name.clone(),
                    entry.file_type,
                    manifest.timestamp(),
                    manifest.sequence_id(),
                )
            })
        })
        .collect();

    RifFilesEvent::new(timestamp, sequence_ids, file_events)
}
