//! S3-compatible storage backend using AWS SDK.

use crate::checksum::Checksum;
use crate::error::{StorageError, StorageResult};
use crate::traits::{ObjectResponse, ObjectStore, StreamingUpload, WriteOptions};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_sdk_s3::types::{ChecksumAlgorithm, CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use depot_core::Validation;
use futures::StreamExt;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Minimum part size for S3 multipart uploads (5 MiB).
/// S3 requires all parts except the last to be at least 5 MB.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Maximum number of keys per DeleteObjects request.
const DELETE_BATCH_SIZE: usize = 1000;

/// Marker included in lazy-credentials errors so they map to a config error
/// rather than a generic transport failure.
const CREDENTIALS_INIT_ERROR_MARKER: &str = "depot-s3-lazy-credentials-init";
const CREDENTIALS_RESOLVE_ERROR_MARKER: &str = "depot-s3-lazy-credentials-resolve";

/// Static credentials file referenced by `key_filename`.
#[derive(Deserialize)]
struct CredentialsFile {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    session_token: Option<String>,
}

/// Lazily initializes the AWS default credentials chain on first signed request.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn chain(
        &self,
    ) -> Result<&aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        self.chain
            .get_or_try_init(|| async {
                let region = aws_config::Region::new(self.region.clone());
                tokio::task::spawn(async move {
                    aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                        .region(region)
                        .build()
                        .await
                })
                .await
                .map_err(|join_err| {
                    CredentialsError::provider_error(format!(
                        "{CREDENTIALS_INIT_ERROR_MARKER}: failed to initialize AWS default credential chain: {join_err}"
                    ))
                })
            })
            .await
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self.chain().await?;
        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_RESOLVE_ERROR_MARKER}: default AWS credentials resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

fn map_s3_operation_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let err_text = err.to_string();
    if err_text.contains(CREDENTIALS_INIT_ERROR_MARKER)
        || err_text.contains(CREDENTIALS_RESOLVE_ERROR_MARKER)
    {
        return StorageError::Config(
            "S3 credential initialization failed. Set key_filename or ensure ambient AWS credentials are available."
                .to_string(),
        );
    }

    StorageError::S3(Box::new(err))
}

fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    has_status(err, 404)
}

/// An `If-None-Match: *` write that lost against an existing object.
fn is_precondition_failed<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    has_status(err, 412)
}

fn has_status<E>(err: &aws_sdk_s3::error::SdkError<E>, status: u16) -> bool {
    matches!(
        err,
        aws_sdk_s3::error::SdkError::ServiceError(service_err)
            if service_err.raw().status().as_u16() == status
    )
}

/// Map a commit error, turning a failed create-only precondition into
/// `AlreadyExists`.
fn map_commit_error<E>(err: aws_sdk_s3::error::SdkError<E>, full_key: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if is_precondition_failed(&err) {
        return StorageError::AlreadyExists(full_key.to_string());
    }
    map_s3_operation_error(err)
}

/// S3-compatible object store using AWS SDK.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    endpoint: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// Credentials are read from `key_filename` when given, otherwise from
    /// the ambient AWS chain on first use. `force_path_style` selects
    /// `endpoint/bucket/key` addressing, which MinIO requires.
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        key_filename: Option<&Path>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        if let Some(path) = key_filename {
            tracing::warn!(
                path = %path.display(),
                "Using credentials from file, prefer ambient credentials in production"
            );
            let raw = tokio::fs::read(path).await.map_err(|e| {
                StorageError::Config(format!(
                    "failed to read credentials file {}: {e}",
                    path.display()
                ))
            })?;
            let file: CredentialsFile = serde_json::from_slice(&raw).map_err(|e| {
                StorageError::Config(format!(
                    "invalid credentials file {}: {e}",
                    path.display()
                ))
            })?;
            let credentials = aws_sdk_s3::config::Credentials::new(
                file.access_key_id,
                file.secret_access_key,
                file.session_token,
                None,
                "depot-key-file",
            );
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        } else {
            s3_config_builder = s3_config_builder
                .credentials_provider(LazyDefaultCredentialsProvider::new(resolved_region.clone()));
        }

        // Bare host:port endpoints (e.g. "minio:9000") get an http:// scheme
        let normalized_endpoint = endpoint.map(|url| {
            let lower = url.to_ascii_lowercase();
            if lower.starts_with("http://") || lower.starts_with("https://") {
                url
            } else {
                format!("http://{url}")
            }
        });
        if let Some(url) = &normalized_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(url);
        }
        if force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix
                .map(|p| p.trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty()),
            endpoint: normalized_endpoint
                .unwrap_or_else(|| format!("s3.{resolved_region}.amazonaws.com")),
        })
    }

    /// Get the full object key for a key (applies prefix if configured).
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    /// Convert an AWS SDK error to StorageError, mapping 404 to NotFound.
    fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>, key: &str) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if is_not_found(&err) {
            return StorageError::NotFound(key.to_string());
        }
        map_s3_operation_error(err)
    }

    /// Delete every object under `<full_key>/`, returning how many went.
    async fn delete_children(&self, full_key: &str) -> StorageResult<usize> {
        let child_prefix = format!("{full_key}/");
        let mut deleted = 0;
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&child_prefix)
                .max_keys(DELETE_BATCH_SIZE as i32);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }
            let output = request.send().await.map_err(map_s3_operation_error)?;

            let identifiers = output
                .contents()
                .iter()
                .filter_map(|obj| obj.key())
                .map(|key| {
                    aws_sdk_s3::types::ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .map_err(|e| StorageError::S3(Box::new(e)))
                })
                .collect::<StorageResult<Vec<_>>>()?;

            if !identifiers.is_empty() {
                let count = identifiers.len();
                let delete = aws_sdk_s3::types::Delete::builder()
                    .set_objects(Some(identifiers))
                    .quiet(true)
                    .build()
                    .map_err(|e| StorageError::S3(Box::new(e)))?;
                self.client
                    .delete_objects()
                    .bucket(&self.bucket)
                    .delete(delete)
                    .send()
                    .await
                    .map_err(map_s3_operation_error)?;
                deleted += count;
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(deleted)
    }
}

async fn put_object(
    client: &Client,
    bucket: &str,
    full_key: &str,
    data: Bytes,
    validation: Validation,
    create_only: bool,
) -> StorageResult<()> {
    let mut request = client.put_object().bucket(bucket).key(full_key);
    if create_only {
        request = request.if_none_match("*");
    }
    match validation {
        Validation::Crc32c => {
            request = request.checksum_algorithm(ChecksumAlgorithm::Crc32C);
        }
        Validation::Md5 => {
            if let Some(digest) = Checksum::of(Validation::Md5, &data).finalize() {
                request = request.content_md5(digest);
            }
        }
        Validation::None => {}
    }
    request
        .body(data.into())
        .send()
        .await
        .map_err(|e| map_commit_error(e, full_key))?;
    Ok(())
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let full_key = self.full_key(key);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(map_s3_operation_error(err)),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let full_key = self.full_key(key);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?
            .into_bytes();

        Ok(bytes)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ObjectResponse> {
        let full_key = self.full_key(key);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let content_length = output.content_length().map(|len| len.max(0) as u64);
        let stream = ReaderStream::new(output.body.into_async_read())
            .map(|result| result.map_err(StorageError::Io));

        Ok(ObjectResponse::ok(content_length, Box::pin(stream)))
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, options: &WriteOptions) -> StorageResult<()> {
        if !options.resumable {
            let full_key = self.full_key(key);
            return put_object(
                &self.client,
                &self.bucket,
                &full_key,
                data,
                options.validation,
                options.create_only,
            )
            .await;
        }

        let mut upload = self.put_stream(key, options).await?;
        if let Err(e) = upload.write(data).await {
            if let Err(abort_err) = upload.abort().await {
                tracing::warn!(key = %key, error = %abort_err, "Failed to abort multipart upload");
            }
            return Err(e);
        }
        upload.finish().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn put_stream(
        &self,
        key: &str,
        options: &WriteOptions,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        let full_key = self.full_key(key);

        if !options.resumable {
            return Ok(Box::new(S3BufferedUpload {
                client: self.client.clone(),
                bucket: self.bucket.clone(),
                key: full_key,
                validation: options.validation,
                create_only: options.create_only,
                buffer: Vec::new(),
            }));
        }

        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&full_key);
        if options.validation == Validation::Crc32c {
            request = request.checksum_algorithm(ChecksumAlgorithm::Crc32C);
        }
        let create_output = request.send().await.map_err(map_s3_operation_error)?;

        let upload_id = create_output
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return upload_id".to_string()))?
            .to_string();

        Ok(Box::new(S3MultipartUpload {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: full_key,
            upload_id,
            validation: options.validation,
            create_only: options.create_only,
            parts: Vec::new(),
            part_number: 1,
            bytes_written: 0,
            buffer: Vec::with_capacity(MIN_PART_SIZE),
        }))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let full_key = self.full_key(key);

        // delete_object succeeds on missing keys, so probe first
        let object_exists = self.exists(key).await?;
        if object_exists {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&full_key)
                .send()
                .await
                .map_err(map_s3_operation_error)?;
        }

        let children = self.delete_children(&full_key).await?;
        if !object_exists && children == 0 {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

        let probe = async {
            self.client
                .head_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .map_err(map_s3_operation_error)
        };

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe)
            .await
            .map_err(|_| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "S3 health check timed out after 10 seconds",
                ))
            })??;
        Ok(())
    }
}

/// Non-resumable upload: buffers everything and issues one PutObject.
struct S3BufferedUpload {
    client: Client,
    bucket: String,
    key: String,
    validation: Validation,
    create_only: bool,
    buffer: Vec<u8>,
}

#[async_trait]
impl StreamingUpload for S3BufferedUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let size = self.buffer.len() as u64;
        put_object(
            &self.client,
            &self.bucket,
            &self.key,
            Bytes::from(self.buffer),
            self.validation,
            self.create_only,
        )
        .await?;
        Ok(size)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

/// Resumable upload using S3 multipart upload.
///
/// Buffers incoming data to meet S3's 5 MB minimum part size requirement.
struct S3MultipartUpload {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    validation: Validation,
    create_only: bool,
    parts: Vec<CompletedPart>,
    part_number: i32,
    bytes_written: u64,
    buffer: Vec<u8>,
}

impl S3MultipartUpload {
    /// Upload a single part to S3 and track it.
    async fn upload_part(&mut self, data: Bytes) -> StorageResult<()> {
        let mut request = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(self.part_number);
        match self.validation {
            Validation::Crc32c => {
                request = request.checksum_algorithm(ChecksumAlgorithm::Crc32C);
            }
            Validation::Md5 => {
                if let Some(digest) = Checksum::of(Validation::Md5, &data).finalize() {
                    request = request.content_md5(digest);
                }
            }
            Validation::None => {}
        }

        let output = request
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        let completed_part = CompletedPart::builder()
            .e_tag(output.e_tag().unwrap_or_default())
            .set_checksum_crc32_c(output.checksum_crc32_c().map(|s| s.to_string()))
            .part_number(self.part_number)
            .build();

        self.parts.push(completed_part);
        self.part_number += 1;
        Ok(())
    }

    async fn abort_multipart(&self) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }
}

#[async_trait]
impl StreamingUpload for S3MultipartUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.bytes_written += data.len() as u64;
        self.buffer.extend_from_slice(&data);

        while self.buffer.len() >= MIN_PART_SIZE {
            let part: Vec<u8> = self.buffer.drain(..MIN_PART_SIZE).collect();
            self.upload_part(Bytes::from(part)).await?;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        // The last part may be smaller than MIN_PART_SIZE
        if !self.buffer.is_empty() {
            let last = std::mem::take(&mut self.buffer);
            self.upload_part(Bytes::from(last)).await?;
        }

        // Multipart uploads need at least one non-empty part
        if self.parts.is_empty() {
            if let Err(e) = self.abort_multipart().await {
                tracing::warn!(
                    key = %self.key,
                    upload_id = %self.upload_id,
                    error = %e,
                    "Failed to abort multipart upload for empty object"
                );
            }
            put_object(
                &self.client,
                &self.bucket,
                &self.key,
                Bytes::new(),
                self.validation,
                self.create_only,
            )
            .await?;
            return Ok(0);
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(std::mem::take(&mut self.parts)))
            .build();

        let mut request = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(completed_upload);
        if self.create_only {
            request = request.if_none_match("*");
        }
        if let Err(err) = request.send().await {
            let err = map_commit_error(err, &self.key);
            if matches!(err, StorageError::AlreadyExists(_))
                && let Err(e) = self.abort_multipart().await
            {
                tracing::warn!(key = %self.key, error = %e, "Failed to abort refused multipart upload");
            }
            return Err(err);
        }

        Ok(self.bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.abort_multipart().await
    }
}
