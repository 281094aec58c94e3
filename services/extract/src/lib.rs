//! RIF Extract
//!
//! Data set discovery and record extraction for the CCW RIF load pipeline.
//! Upstream producers drop batches of pipe-delimited RIF files, each batch
//! described by a manifest, into an S3 bucket. This crate watches the bucket,
//! decides when a batch is completely uploaded, hands it downstream and parses
//! its files into typed records.
//!
//! ## Features
//!
//! - **Data Set Monitor**: polls `Pending/`, releases the oldest fully uploaded
//!   manifest group and moves it to `Completed/`
//! - **Record Extraction**: lazy, single-pass record streams with per-record
//!   error isolation and claim line grouping
//! - **Object Store Abstraction**: S3 (or MinIO/LocalStack) and an in-memory
//!   store for tests
//!
//! ## Bucket Layout
//!
//! ```text
//! Incoming/{timestamp}/{sequence}/...        upload in progress
//!                  │
//!                  ▼
//! Pending/{timestamp}/{sequence}/manifest.json
//! Pending/{timestamp}/{sequence}/*.rif        ready; read by the monitor
//!                  │
//!                  ▼  copy, then delete
//! Completed/{timestamp}/{sequence}/...        handed to the pipeline
//! ```

pub mod config;
pub mod manifest;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod object_store;
pub mod parser;
pub mod records;
pub mod samples;
pub mod schema;

pub use config::{ExtractionOptions, S3Config};
pub use manifest::{
    DataSetManifest, DataSetManifestEntry, DataSetManifestId, ManifestError, StorageLocation,
};
pub use metrics::MetricsSink;
pub use model::{RifFileEvent, RifFileMetrics, RifFileType, RifFilesEvent, RifRecordEvent};
pub use monitor::{CycleOutcome, DataSetMonitorListener, DataSetMonitorWorker, MonitorError};
pub use object_store::{InMemoryObjectStore, ObjectStore, ObjectStoreError, S3ObjectStore};
pub use parser::{ExtractError, RecordError, RifFileRecords, RifFilesProcessor};
pub use records::RifRecord;
