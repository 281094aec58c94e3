//! RIF Load
//!
//! Idempotent loading of parsed RIF records into the destination store.
//! Every record is resolved by its identity key and written with
//! insert-or-update semantics, so a data set that is processed twice ends up
//! stored once.
//!
//! ## Features
//!
//! - **Per-record isolation**: a record that fails to load is reported and
//!   skipped; the rest of the file still loads
//! - **Concurrent file loading**: files of one data set load in parallel up
//!   to a configured limit
//! - **PostgreSQL store**: records kept as JSONB keyed by type and identity,
//!   schema managed by embedded migrations

pub mod config;
pub mod loader;
pub mod record_store;

pub use config::{DatabaseConfig, LoadOptions};
pub use loader::{FileLoadSummary, LoadAction, LoadError, RifLoader, RifRecordLoadResult};
pub use record_store::{InMemoryRecordStore, PostgresRecordStore, RecordStore, StoreError};
