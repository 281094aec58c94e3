use crate::model::RifFileType;
use serde::Deserialize;

/// S3 bucket configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket the data sets are uploaded to
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Keys requested per ListObjectsV2 page
    #[serde(default = "default_list_page_size")]
    pub list_page_size: i32,
}

/// Data set discovery options
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionOptions {
    /// Only data sets made up entirely of this file type are processed
    #[serde(default)]
    pub data_set_filter: Option<RifFileType>,
    /// Upper bound on data files handed off in one monitor cycle
    #[serde(default = "default_max_files_per_run")]
    pub max_files_per_run: usize,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_list_page_size() -> i32 {
    1000
}

fn default_max_files_per_run() -> usize {
    100
}

impl S3Config {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            list_page_size: default_list_page_size(),
        }
    }
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            data_set_filter: None,
            max_files_per_run: default_max_files_per_run(),
        }
    }
}

impl ExtractionOptions {
    pub fn with_filter(mut self, file_type: RifFileType) -> Self {
        self.data_set_filter = Some(file_type);
        self
    }

    pub fn with_max_files_per_run(mut self, max_files: usize) -> Self {
        self.max_files_per_run = max_files;
        self
    }
}
