//! Small, self-consistent RIF data sets bundled with the crate.
//!
//! Used by tests across the workspace and for seeding a local bucket.

use crate::manifest::{DataSetManifest, DataSetManifestEntry, ManifestError, StorageLocation};
use crate::model::RifFileType;
use crate::object_store::{ObjectStore, ObjectStoreError};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// A bundled RIF file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticRifResource {
    SampleABeneficiaries,
    SampleACarrier,
    SampleAInpatient,
    SampleAOutpatient,
    SampleAPde,
    SampleBBeneficiaries,
    SampleBCarrier,
    SampleBPde,
}

impl StaticRifResource {
    pub fn file_type(&self) -> RifFileType {
        match self {
            Self::SampleABeneficiaries | Self::SampleBBeneficiaries => RifFileType::Beneficiary,
            Self::SampleACarrier | Self::SampleBCarrier => RifFileType::Carrier,
            Self::SampleAInpatient => RifFileType::Inpatient,
            Self::SampleAOutpatient => RifFileType::Outpatient,
            Self::SampleAPde | Self::SampleBPde => RifFileType::Pde,
        }
    }

    /// Name the file is uploaded under
    pub fn file_name(&self) -> &'static str {
        match self.file_type() {
            RifFileType::Beneficiary => "beneficiaries.rif",
            RifFileType::Carrier => "carrier.rif",
            RifFileType::Inpatient => "inpatient.rif",
            RifFileType::Outpatient => "outpatient.rif",
            RifFileType::Pde => "pde.rif",
        }
    }

    pub fn content(&self) -> &'static str {
        match self {
            Self::SampleABeneficiaries => include_str!("../samples/sample-a/beneficiaries.rif"),
            Self::SampleACarrier => include_str!("../samples/sample-a/carrier.rif"),
            Self::SampleAInpatient => include_str!("../samples/sample-a/inpatient.rif"),
            Self::SampleAOutpatient => include_str!("../samples/sample-a/outpatient.rif"),
            Self::SampleAPde => include_str!("../samples/sample-a/pde.rif"),
            Self::SampleBBeneficiaries => include_str!("../samples/sample-b/beneficiaries.rif"),
            Self::SampleBCarrier => include_str!("../samples/sample-b/carrier.rif"),
            Self::SampleBPde => include_str!("../samples/sample-b/pde.rif"),
        }
    }

    /// Number of records (not rows) in the file
    pub fn record_count(&self) -> usize {
        match self {
            Self::SampleABeneficiaries
            | Self::SampleACarrier
            | Self::SampleAInpatient
            | Self::SampleAOutpatient
            | Self::SampleAPde => 1,
            Self::SampleBBeneficiaries => 3,
            Self::SampleBCarrier => 2,
            Self::SampleBPde => 3,
        }
    }
}

/// A bundled data set: several files that belong together
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticRifResourceGroup {
    SampleA,
    SampleB,
}

#[derive(Error, Debug)]
pub enum SampleUploadError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Store(#[from] ObjectStoreError),
}

impl StaticRifResourceGroup {
    pub fn resources(&self) -> &'static [StaticRifResource] {
        match self {
            Self::SampleA => &[
                StaticRifResource::SampleABeneficiaries,
                StaticRifResource::SampleACarrier,
                StaticRifResource::SampleAInpatient,
                StaticRifResource::SampleAOutpatient,
                StaticRifResource::SampleAPde,
            ],
            Self::SampleB => &[
                StaticRifResource::SampleBBeneficiaries,
                StaticRifResource::SampleBCarrier,
                StaticRifResource::SampleBPde,
            ],
        }
    }

    pub fn record_count(&self) -> usize {
        self.resources().iter().map(|r| r.record_count()).sum()
    }

    pub fn manifest(
        &self,
        timestamp: DateTime<Utc>,
        sequence_id: u32,
    ) -> Result<DataSetManifest, ManifestError> {
        let entries = self
            .resources()
            .iter()
            .map(|r| DataSetManifestEntry::new(r.file_name(), r.file_type()))
            .collect();
        DataSetManifest::new(timestamp, sequence_id, entries)
    }

    /// Upload the data files and then the manifest into `location`
    pub async fn upload(
        &self,
        store: &dyn ObjectStore,
        location: StorageLocation,
        timestamp: DateTime<Utc>,
        sequence_id: u32,
    ) -> Result<DataSetManifest, SampleUploadError> {
        let manifest = self.manifest(timestamp, sequence_id)?;

        for (entry, resource) in manifest.entries().iter().zip(self.resources()) {
            store
                .put_object(
                    &manifest.entry_key(location, entry),
                    resource.content().as_bytes().to_vec(),
                )
                .await?;
        }
        store
            .put_object(&manifest.manifest_key(location), manifest.to_json()?)
            .await?;

        Ok(manifest)
    }
}
