//! RIF Pipeline
//!
//! Polling service that discovers RIF data sets in S3 and loads their records
//! into PostgreSQL.
//!
//! ```text
//! S3 Bucket                    Pipeline                       PostgreSQL
//! ┌──────────────┐   poll   ┌──────────────┐               ┌──────────────┐
//! │ Pending/     │─────────▶│ Data Set     │               │ rif_records  │
//! │   {ts}/{seq} │          │ Monitor      │               └──────────────┘
//! └──────────────┘          └──────────────┘                      ▲
//!        │                         │ data set ready               │
//!        │ move                    ▼                              │
//!        ▼                  ┌──────────────┐   records     ┌──────────────┐
//! ┌──────────────┐          │ RIF Files    │──────────────▶│ RIF Loader   │
//! │ Completed/   │          │ Processor    │               └──────────────┘
//! └──────────────┘          └──────────────┘
//! ```

pub mod config;
pub mod pipeline;

pub use config::{Config, ServiceConfig};
pub use pipeline::{run_monitor, PipelineStats, RifPipeline};
