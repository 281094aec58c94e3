//! Data set manifests and the object-key layout they imply.
//!
//! A manifest is written by the upstream producer next to the data files it
//! lists:
//!
//! ```text
//! Pending/2017-01-01T00:00:00Z/0/manifest.json
//! Pending/2017-01-01T00:00:00Z/0/beneficiaries.rif
//! Pending/2017-01-01T00:00:00Z/0/carrier.rif
//! ```

use crate::model::RifFileType;
use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Object name of the manifest marker within a data set prefix
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Errors raised while reading or validating a manifest
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Invalid manifest document: {0}")]
    InvalidDocument(#[from] serde_json::Error),

    #[error("Invalid manifest timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Manifest has no entries")]
    NoEntries,

    #[error("Invalid manifest entry name: {0:?}")]
    InvalidEntryName(String),

    #[error("Duplicate manifest entry: {0}")]
    DuplicateEntry(String),

    #[error("Invalid manifest key: {0}")]
    InvalidKey(String),

    #[error("Manifest at {key} declares {declared}")]
    KeyMismatch {
        key: String,
        declared: DataSetManifestId,
    },
}

/// Lifecycle stage of a data set in the bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageLocation {
    /// Upload in progress, never read by the monitor
    Incoming,
    /// Uploaded and eligible for processing
    Pending,
    /// Handed to the pipeline
    Completed,
}

impl StorageLocation {
    pub fn prefix(&self) -> &'static str {
        match self {
            StorageLocation::Incoming => "Incoming/",
            StorageLocation::Pending => "Pending/",
            StorageLocation::Completed => "Completed/",
        }
    }
}

/// Identity of a manifest: `(timestamp, sequence_id)`, ordered ascending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataSetManifestId {
    pub timestamp: DateTime<Utc>,
    pub sequence_id: u32,
}

impl DataSetManifestId {
    pub fn new(timestamp: DateTime<Utc>, sequence_id: u32) -> Self {
        Self {
            timestamp: truncate_to_seconds(timestamp),
            sequence_id,
        }
    }

    pub fn timestamp_text(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Key prefix shared by the manifest and all of its entries
    pub fn key_prefix(&self, location: StorageLocation) -> String {
        format!(
            "{}{}/{}/",
            location.prefix(),
            self.timestamp_text(),
            self.sequence_id
        )
    }

    pub fn manifest_key(&self, location: StorageLocation) -> String {
        format!("{}{}", self.key_prefix(location), MANIFEST_FILE_NAME)
    }

    pub fn entry_key(&self, location: StorageLocation, entry: &DataSetManifestEntry) -> String {
        format!("{}{}", self.key_prefix(location), entry.name)
    }

    /// Parse a listed key as a manifest key.
    ///
    /// Returns `Ok(None)` for keys that are not manifests (data files, keys in
    /// other locations) and an error for manifest keys with unusable segments.
    pub fn from_manifest_key(
        location: StorageLocation,
        key: &str,
    ) -> Result<Option<Self>, ManifestError> {
        let Some(rest) = key.strip_prefix(location.prefix()) else {
            return Ok(None);
        };
        let Some(data_set_path) = rest
            .strip_suffix(MANIFEST_FILE_NAME)
            .and_then(|p| p.strip_suffix('/'))
        else {
            return Ok(None);
        };

        let mut segments = data_set_path.split('/');
        let (Some(timestamp), Some(sequence_id), None) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(ManifestError::InvalidKey(key.to_string()));
        };

        let timestamp = parse_timestamp(timestamp)?;
        let sequence_id = sequence_id
            .parse::<u32>()
            .map_err(|_| ManifestError::InvalidKey(key.to_string()))?;

        Ok(Some(Self::new(timestamp, sequence_id)))
    }

    /// Timestamp segment of any key under `location`, if it parses
    pub fn key_timestamp(location: StorageLocation, key: &str) -> Option<DateTime<Utc>> {
        let rest = key.strip_prefix(location.prefix())?;
        let segment = rest.split('/').next()?;
        parse_timestamp(segment).ok()
    }
}

impl fmt::Display for DataSetManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.timestamp_text(), self.sequence_id)
    }
}

/// One data file listed in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSetManifestEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: RifFileType,
}

impl DataSetManifestEntry {
    pub fn new(name: impl Into<String>, file_type: RifFileType) -> Self {
        Self {
            name: name.into(),
            file_type,
        }
    }
}

/// Manifest marker describing one logically atomic data set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSetManifest {
    id: DataSetManifestId,
    entries: Vec<DataSetManifestEntry>,
}

/// On-the-wire shape; field order here fixes the serialized order
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDocument {
    timestamp: String,
    sequence_id: u32,
    entries: Vec<DataSetManifestEntry>,
}

impl DataSetManifest {
    pub fn new(
        timestamp: DateTime<Utc>,
        sequence_id: u32,
        entries: Vec<DataSetManifestEntry>,
    ) -> Result<Self, ManifestError> {
        validate_entries(&entries)?;
        Ok(Self {
            id: DataSetManifestId::new(timestamp, sequence_id),
            entries,
        })
    }

    /// Parse manifest content
    pub fn parse(content: &[u8]) -> Result<Self, ManifestError> {
        let document: ManifestDocument = serde_json::from_slice(content)?;
        let timestamp = parse_timestamp(&document.timestamp)?;
        Self::new(timestamp, document.sequence_id, document.entries)
    }

    /// Parse manifest content read from `key`, checking it agrees with the key
    pub fn parse_at(
        location: StorageLocation,
        key: &str,
        content: &[u8],
    ) -> Result<Self, ManifestError> {
        let manifest = Self::parse(content)?;
        match DataSetManifestId::from_manifest_key(location, key)? {
            Some(id) if id == manifest.id => Ok(manifest),
            Some(_) => Err(ManifestError::KeyMismatch {
                key: key.to_string(),
                declared: manifest.id,
            }),
            None => Err(ManifestError::InvalidKey(key.to_string())),
        }
    }

    /// Deterministic serialized form, as written to the marker object
    pub fn to_json(&self) -> Result<Vec<u8>, ManifestError> {
        let document = ManifestDocument {
            timestamp: self.id.timestamp_text(),
            sequence_id: self.id.sequence_id,
            entries: self.entries.clone(),
        };
        Ok(serde_json::to_vec_pretty(&document)?)
    }

    pub fn id(&self) -> DataSetManifestId {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.id.timestamp
    }

    pub fn timestamp_text(&self) -> String {
        self.id.timestamp_text()
    }

    pub fn sequence_id(&self) -> u32 {
        self.id.sequence_id
    }

    pub fn entries(&self) -> &[DataSetManifestEntry] {
        &self.entries
    }

    pub fn manifest_key(&self, location: StorageLocation) -> String {
        self.id.manifest_key(location)
    }

    pub fn entry_key(&self, location: StorageLocation, entry: &DataSetManifestEntry) -> String {
        self.id.entry_key(location, entry)
    }

    /// Every object key belonging to this data set: manifest first, then entries
    pub fn object_keys(&self, location: StorageLocation) -> Vec<String> {
        std::iter::once(self.manifest_key(location))
            .chain(self.entries.iter().map(|e| self.entry_key(location, e)))
            .collect()
    }
}

fn validate_entries(entries: &[DataSetManifestEntry]) -> Result<(), ManifestError> {
    if entries.is_empty() {
        return Err(ManifestError::NoEntries);
    }

    let mut seen = HashSet::new();
    for entry in entries {
        let name = entry.name.as_str();
        if name.trim().is_empty() || name.contains('/') || name == MANIFEST_FILE_NAME {
            return Err(ManifestError::InvalidEntryName(entry.name.clone()));
        }
        if !seen.insert(name) {
            return Err(ManifestError::DuplicateEntry(entry.name.clone()));
        }
    }

    Ok(())
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, ManifestError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| truncate_to_seconds(t.with_timezone(&Utc)))
        .map_err(|_| ManifestError::InvalidTimestamp(text.to_string()))
}

fn truncate_to_seconds(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.with_nanosecond(0).unwrap_or(timestamp)
}
