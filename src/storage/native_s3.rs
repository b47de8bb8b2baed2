//! Native AWS S3 SDK integration
//!
//! [`RemoteStore`] over `aws-sdk-s3`. Supports S3-compatible endpoints
//! (MinIO, Wasabi, etc.) and retries each request with exponential backoff;
//! the engine sees only the final outcome.

use super::{ByteReader, CompletedPart, ListPage, ObjectDescriptor, RemoteStore, ResolvedMetadata};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, MetadataDirective, StorageClass};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;

/// Default maximum number of concurrent S3 requests.
const DEFAULT_MAX_CONCURRENT: usize = 64;

/// Maximum retry delay cap in seconds.
const MAX_RETRY_DELAY_SECS: u64 = 64;

/// Configuration for the native S3 client.
#[derive(Debug, Clone)]
pub struct NativeS3Config {
    /// AWS region (e.g., "us-east-1")
    pub region: String,
    /// Custom endpoint URL for S3-compatible services
    pub endpoint_url: Option<String>,
    /// Cap on in-flight requests issued by this store
    pub max_concurrent: usize,
    /// Maximum number of retries per request
    pub max_retries: u32,
    /// Force path-style access (required for some S3-compatible services)
    pub force_path_style: bool,
    /// Access key ID (optional, falls back to AWS credential chain)
    pub access_key_id: Option<String>,
    /// Secret access key (optional, falls back to AWS credential chain)
    pub secret_access_key: Option<String>,
}

impl Default for NativeS3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint_url: None,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: 5,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl NativeS3Config {
    /// Read overrides from the standard AWS environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(region) = std::env::var("AWS_REGION").or_else(|_| std::env::var("AWS_DEFAULT_REGION")) {
            config.region = region;
        }
        config.endpoint_url = std::env::var("AWS_ENDPOINT_URL").ok();
        config.force_path_style = std::env::var("AWS_S3_FORCE_PATH_STYLE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        config
    }
}

/// S3 object store with connection pooling and per-request retries
pub struct NativeS3Store {
    client: aws_sdk_s3::Client,
    config: NativeS3Config,
    semaphore: Arc<Semaphore>,
}

impl NativeS3Store {
    /// Create a new store from configuration.
    pub async fn new(config: NativeS3Config) -> Self {
        let mut aws_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if let Some(ref endpoint) = config.endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        if let (Some(ref key_id), Some(ref secret)) = (&config.access_key_id, &config.secret_access_key) {
            let creds = aws_credential_types::Credentials::new(key_id, secret, None, None, "bucketsync-static");
            aws_config_builder = aws_config_builder.credentials_provider(creds);
        }

        let aws_config = aws_config_builder.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&aws_config);
        if config.force_path_style {
            s3_config = s3_config.force_path_style(true);
        }

        let client = aws_sdk_s3::Client::from_conf(s3_config.build());
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

        Self {
            client,
            config,
            semaphore,
        }
    }

    /// Run `request` with exponential backoff until it succeeds or retries run out
    async fn with_retry<T, F, Fut>(&self, operation: &str, key: &str, mut request: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| StorageError::remote(format!("Semaphore error: {}", e)))?;

        let mut retries = 0;
        loop {
            match request().await {
                Ok(value) => return Ok(value),
                Err(e) if retries < self.config.max_retries => {
                    retries += 1;
                    let delay = exponential_backoff_delay(retries);
                    tracing::warn!(
                        "S3 {} of '{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                        operation,
                        key,
                        retries,
                        self.config.max_retries,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn sdk_error<E>(operation: &str, error: E) -> StorageError
where
    E: std::error::Error,
{
    StorageError::remote(format!("S3 {} failed: {}", operation, DisplayErrorContext(error)))
}

fn to_utc(time: &aws_sdk_s3::primitives::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(time.secs(), time.subsec_nanos()).unwrap_or_default()
}

/// Percent-encode a key for the `x-amz-copy-source` header, keeping `/`
fn encode_copy_source(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

fn user_metadata(metadata: &ResolvedMetadata) -> Option<HashMap<String, String>> {
    if metadata.user_metadata.is_empty() {
        None
    } else {
        Some(metadata.user_metadata.clone().into_iter().collect())
    }
}

#[async_trait]
impl RemoteStore for NativeS3Store {
    async fn list(&self, bucket: &str, prefix: &str, continuation: Option<&str>) -> StorageResult<ListPage> {
        self.with_retry("list", prefix, || async move {
            let mut request = self.client.list_objects_v2().bucket(bucket);
            if !prefix.is_empty() {
                request = request.prefix(prefix);
            }
            if let Some(token) = continuation {
                request = request.continuation_token(token);
            }
            let output = request.send().await.map_err(|e| sdk_error("list_objects_v2", e))?;

            let entries = output
                .contents()
                .iter()
                .filter_map(|object| {
                    let key = object.key()?;
                    let size = object.size().unwrap_or(0).max(0) as u64;
                    let modified = object.last_modified().map(to_utc).unwrap_or_default();
                    Some(ObjectDescriptor::remote(key, size, modified))
                })
                .collect();

            let next_token = if output.is_truncated().unwrap_or(false) {
                output.next_continuation_token().map(str::to_string)
            } else {
                None
            };

            Ok(ListPage { entries, next_token })
        })
        .await
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<ByteReader> {
        let output = self
            .with_retry("get", key, || async move {
                self.client
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| sdk_error("get_object", e))
            })
            .await?;

        Ok(Box::new(Box::pin(output.body.into_async_read())))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteReader,
        size: u64,
        metadata: &ResolvedMetadata,
    ) -> StorageResult<String> {
        let mut data = Vec::with_capacity(size as usize);
        body.read_to_end(&mut data)
            .await
            .map_err(|e| StorageError::remote(format!("body read failed: {}", e)))?;
        let data = &data;

        self.with_retry("put", key, || async move {
            let output = self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .content_length(data.len() as i64)
                .body(ByteStream::from(data.clone()))
                .set_content_type(metadata.content_type.clone())
                .set_cache_control(metadata.cache_control.clone())
                .set_content_disposition(metadata.content_disposition.clone())
                .set_content_encoding(metadata.content_encoding.clone())
                .set_storage_class(metadata.storage_class.as_deref().map(StorageClass::from))
                .set_metadata(user_metadata(metadata))
                .send()
                .await
                .map_err(|e| sdk_error("put_object", e))?;
            Ok(output.e_tag().unwrap_or_default().to_string())
        })
        .await
    }

    async fn copy(
        &self,
        source_bucket: &str,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
        metadata: &ResolvedMetadata,
    ) -> StorageResult<()> {
        let copy_source = format!("{}/{}", source_bucket, encode_copy_source(source_key));
        let directive = if metadata.is_empty() {
            MetadataDirective::Copy
        } else {
            MetadataDirective::Replace
        };
        let (copy_source, directive) = (copy_source.as_str(), &directive);

        self.with_retry("copy", target_key, || async move {
            self.client
                .copy_object()
                .copy_source(copy_source)
                .bucket(target_bucket)
                .key(target_key)
                .metadata_directive(directive.clone())
                .set_content_type(metadata.content_type.clone())
                .set_cache_control(metadata.cache_control.clone())
                .set_content_disposition(metadata.content_disposition.clone())
                .set_content_encoding(metadata.content_encoding.clone())
                .set_storage_class(metadata.storage_class.as_deref().map(StorageClass::from))
                .set_metadata(user_metadata(metadata))
                .send()
                .await
                .map_err(|e| sdk_error("copy_object", e))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.with_retry("delete", key, || async move {
            self.client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| sdk_error("delete_object", e))?;
            Ok(())
        })
        .await
    }

    async fn create_multipart(&self, bucket: &str, key: &str, metadata: &ResolvedMetadata) -> StorageResult<String> {
        self.with_retry("create_multipart", key, || async move {
            let output = self
                .client
                .create_multipart_upload()
                .bucket(bucket)
                .key(key)
                .set_content_type(metadata.content_type.clone())
                .set_cache_control(metadata.cache_control.clone())
                .set_content_disposition(metadata.content_disposition.clone())
                .set_content_encoding(metadata.content_encoding.clone())
                .set_storage_class(metadata.storage_class.as_deref().map(StorageClass::from))
                .set_metadata(user_metadata(metadata))
                .send()
                .await
                .map_err(|e| sdk_error("create_multipart_upload", e))?;

            output
                .upload_id()
                .map(str::to_string)
                .ok_or_else(|| StorageError::remote("Missing upload_id"))
        })
        .await
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Vec<u8>,
    ) -> StorageResult<String> {
        let number = i32::try_from(part_number)
            .map_err(|_| StorageError::remote(format!("part number {} out of range", part_number)))?;
        let body = &body;

        self.with_retry("upload_part", key, || async move {
            let output = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(number)
                .body(ByteStream::from(body.clone()))
                .send()
                .await
                .map_err(|e| sdk_error("upload_part", e))?;
            Ok(output.e_tag().unwrap_or_default().to_string())
        })
        .await
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|part| {
                        aws_sdk_s3::types::CompletedPart::builder()
                            .part_number(part.part_number as i32)
                            .e_tag(&part.token)
                            .build()
                    })
                    .collect(),
            ))
            .build();
        let completed = &completed;

        self.with_retry("complete_multipart", key, || async move {
            self.client
                .complete_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .multipart_upload(completed.clone())
                .send()
                .await
                .map_err(|e| sdk_error("complete_multipart_upload", e))?;
            Ok(())
        })
        .await
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> StorageResult<()> {
        self.with_retry("abort_multipart", key, || async move {
            self.client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .send()
                .await
                .map_err(|e| sdk_error("abort_multipart_upload", e))?;
            Ok(())
        })
        .await
    }
}

/// Calculate exponential backoff delay: 2^retries seconds, capped at MAX_RETRY_DELAY_SECS.
fn exponential_backoff_delay(retries: u32) -> Duration {
    let secs = (1u64 << retries.min(16)).min(MAX_RETRY_DELAY_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NativeS3Config::default();
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert_eq!(config.max_retries, 5);
        assert!(!config.force_path_style);
    }

    #[test]
    fn test_exponential_backoff() {
        assert_eq!(exponential_backoff_delay(1), Duration::from_secs(2));
        assert_eq!(exponential_backoff_delay(3), Duration::from_secs(8));
        assert_eq!(exponential_backoff_delay(10), Duration::from_secs(64));
        assert_eq!(exponential_backoff_delay(100), Duration::from_secs(64));
    }

    #[test]
    fn test_user_metadata_conversion() {
        let mut metadata = ResolvedMetadata::default();
        assert!(user_metadata(&metadata).is_none());

        metadata.user_metadata.insert("owner".into(), "ops".into());
        let map = user_metadata(&metadata).unwrap();
        assert_eq!(map.get("owner").map(String::as_str), Some("ops"));
    }

    #[test]
    fn test_encode_copy_source() {
        assert_eq!(encode_copy_source("a/b c.txt"), "a/b%20c.txt");
        assert_eq!(encode_copy_source("dir/ü+1"), "dir/%C3%BC%2B1");
    }

    #[test]
    fn test_to_utc() {
        let time = aws_sdk_s3::primitives::DateTime::from_secs(1_700_000_000);
        assert_eq!(to_utc(&time).timestamp(), 1_700_000_000);
    }
}
