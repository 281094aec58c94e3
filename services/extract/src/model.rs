//! Value objects that cross component boundaries: file types, batch and
//! file events, and record events with their provenance.

use crate::records::RifRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Kind of RIF file, which determines the record schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RifFileType {
    Beneficiary,
    Carrier,
    Inpatient,
    Outpatient,
    Pde,
}

impl RifFileType {
    pub const ALL: [RifFileType; 5] = [
        RifFileType::Beneficiary,
        RifFileType::Carrier,
        RifFileType::Inpatient,
        RifFileType::Outpatient,
        RifFileType::Pde,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RifFileType::Beneficiary => "BENEFICIARY",
            RifFileType::Carrier => "CARRIER",
            RifFileType::Inpatient => "INPATIENT",
            RifFileType::Outpatient => "OUTPATIENT",
            RifFileType::Pde => "PDE",
        }
    }
}

impl fmt::Display for RifFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown RIF file type: {0}")]
pub struct UnknownFileType(pub String);

impl FromStr for RifFileType {
    type Err = UnknownFileType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RifFileType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownFileType(s.to_string()))
    }
}

/// Per-file extraction counters
#[derive(Debug, Default)]
pub struct RifFileMetrics {
    records_read: AtomicU64,
    parse_failures: AtomicU64,
}

impl RifFileMetrics {
    pub fn records_read(&self) -> u64 {
        self.records_read.load(Ordering::Relaxed)
    }

    pub fn parse_failures(&self) -> u64 {
        self.parse_failures.load(Ordering::Relaxed)
    }

    pub(crate) fn record_read(&self) {
        self.records_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn parse_failed(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// One data file of a discovered data set
#[derive(Debug)]
pub struct RifFileEvent {
    /// Object key the file is read from
    pub key: String,
    /// File name as declared in the manifest
    pub file_name: String,
    pub file_type: RifFileType,
    /// Timestamp of the manifest that declared this file
    pub timestamp: DateTime<Utc>,
    /// Sequence id of the manifest that declared this file
    pub sequence_id: u32,
    metrics: RifFileMetrics,
}

impl RifFileEvent {
    pub fn new(
        key: impl Into<String>,
        file_name: impl Into<String>,
        file_type: RifFileType,
        timestamp: DateTime<Utc>,
        sequence_id: u32,
    ) -> Self {
        Self {
            key: key.into(),
            file_name: file_name.into(),
            file_type,
            timestamp,
            sequence_id,
            metrics: RifFileMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &RifFileMetrics {
        &self.metrics
    }
}

/// A ready data set handed to the listener, one file event per manifest entry
#[derive(Debug, Clone)]
pub struct RifFilesEvent {
    pub timestamp: DateTime<Utc>,
    /// Manifest sequence ids covered by this batch, ascending
    pub sequence_ids: Vec<u32>,
    /// File events in manifest declaration order
    pub file_events: Vec<Arc<RifFileEvent>>,
}

impl RifFilesEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        sequence_ids: Vec<u32>,
        file_events: Vec<RifFileEvent>,
    ) -> Self {
        Self {
            timestamp,
            sequence_ids,
            file_events: file_events.into_iter().map(Arc::new).collect(),
        }
    }
}

/// A parsed record together with where it came from
#[derive(Debug, Clone)]
pub struct RifRecordEvent {
    pub file: Arc<RifFileEvent>,
    /// 1-based line number of the record's first row
    pub line: u64,
    pub record: RifRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_parsing() {
        assert_eq!("PDE".parse::<RifFileType>().unwrap(), RifFileType::Pde);
        assert_eq!(
            "beneficiary".parse::<RifFileType>().unwrap(),
            RifFileType::Beneficiary
        );
        assert!("DME".parse::<RifFileType>().is_err());
    }

    #[test]
    fn test_file_type_serialization() {
        assert_eq!(
            serde_json::to_string(&RifFileType::Outpatient).unwrap(),
            "\"OUTPATIENT\""
        );
        for file_type in RifFileType::ALL {
            let json = serde_json::to_string(&file_type).unwrap();
            assert_eq!(json, format!("\"{}\"", file_type.as_str()));
        }
    }

    #[test]
    fn test_file_metrics_counters() {
        let event = RifFileEvent::new(
            "Pending/x/0/pde.rif",
            "pde.rif",
            RifFileType::Pde,
            Utc::now(),
            0,
        );
        event.metrics().record_read();
        event.metrics().record_read();
        event.metrics().parse_failed();

        assert_eq!(event.metrics().records_read(), 2);
        assert_eq!(event.metrics().parse_failures(), 1);
    }
}
