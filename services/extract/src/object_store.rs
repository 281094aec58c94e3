//! Object store capability used by the monitor and the extractor.
//!
//! [`S3ObjectStore`] talks to S3 (or an S3-compatible endpoint such as
//! MinIO); [`InMemoryObjectStore`] keeps everything in an ordered map for
//! tests and local runs.

use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, instrument};

/// Streaming object content
pub type ObjectBody = Pin<Box<dyn AsyncRead + Send>>;

/// Errors returned by an [`ObjectStore`]
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Failed to {operation} {key}: {message}")]
    Transport {
        operation: &'static str,
        key: String,
        message: String,
    },
}

impl ObjectStoreError {
    fn transport(operation: &'static str, key: &str, message: impl Into<String>) -> Self {
        ObjectStoreError::Transport {
            operation,
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Minimal object store capability: list, read, write, copy, delete
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All keys under `prefix`, in lexicographic order
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError>;

    async fn get_object(&self, key: &str) -> Result<ObjectBody, ObjectStoreError>;

    async fn put_object(&self, key: &str, content: Vec<u8>) -> Result<(), ObjectStoreError>;

    async fn copy_object(&self, source: &str, target: &str) -> Result<(), ObjectStoreError>;

    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError>;

    /// Read a whole object into memory
    async fn get_object_bytes(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let mut body = self.get_object(key).await?;
        let mut content = Vec::new();
        body.read_to_end(&mut content)
            .await
            .map_err(|e| ObjectStoreError::transport("read", key, e.to_string()))?;
        Ok(content)
    }

    /// Delete every object under `prefix`, returning how many were removed
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, ObjectStoreError> {
        let keys = self.list_objects(prefix).await?;
        for key in &keys {
            self.delete_object(key).await?;
        }
        Ok(keys.len())
    }
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    list_page_size: i32,
}

impl S3ObjectStore {
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            list_page_size: config.list_page_size,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .max_keys(self.list_page_size)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| {
                    ObjectStoreError::transport("list", prefix, DisplayErrorContext(&e).to_string())
                })?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(String::from)),
            );

            match response.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(prefix = %prefix, count = keys.len(), "Listed objects");
        Ok(keys)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get_object(&self, key: &str) -> Result<ObjectBody, ObjectStoreError> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Box::pin(output.body.into_async_read())),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    Err(ObjectStoreError::NotFound(key.to_string()))
                } else {
                    Err(ObjectStoreError::transport(
                        "get",
                        key,
                        DisplayErrorContext(&e).to_string(),
                    ))
                }
            }
        }
    }

    #[instrument(skip(self, content), fields(bucket = %self.bucket, size_bytes = content.len()))]
    async fn put_object(&self, key: &str, content: Vec<u8>) -> Result<(), ObjectStoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|e| ObjectStoreError::transport("put", key, DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn copy_object(&self, source: &str, target: &str) -> Result<(), ObjectStoreError> {
        let copy_source = format!("{}/{}", self.bucket, encode_copy_source(source));

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(copy_source)
            .key(target)
            .send()
            .await
            .map_err(|e| {
                ObjectStoreError::transport("copy", source, DisplayErrorContext(&e).to_string())
            })?;
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                ObjectStoreError::transport("delete", key, DisplayErrorContext(&e).to_string())
            })?;
        Ok(())
    }
}

/// Percent-encode a key for the `x-amz-copy-source` header, keeping `/`
fn encode_copy_source(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Object store held entirely in memory
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects under `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.objects
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .count()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        Ok(self
            .objects
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn get_object(&self, key: &str) -> Result<ObjectBody, ObjectStoreError> {
        let content = self
            .objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))?;
        Ok(Box::pin(Cursor::new(content)))
    }

    async fn put_object(&self, key: &str, content: Vec<u8>) -> Result<(), ObjectStoreError> {
        self.objects.write().insert(key.to_string(), content);
        Ok(())
    }

    async fn copy_object(&self, source: &str, target: &str) -> Result<(), ObjectStoreError> {
        let mut objects = self.objects.write();
        let content = objects
            .get(source)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(source.to_string()))?;
        objects.insert(target.to_string(), content);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError> {
        // S3 deletes are idempotent; mirror that here
        self.objects.write().remove(key);
        Ok(())
    }
}
