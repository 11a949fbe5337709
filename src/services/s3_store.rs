//! S3ObjectStore: the object store backed by AWS S3 (or any S3-compatible
//! endpoint) through the official Rust SDK.

use crate::{
    config::AppConfig,
    models::object::{ObjectMetadata, StoredObject},
    services::object_store::{
        ListObjectsParams, ListObjectsResult, ObjectStore, ObjectStoreError, ObjectStoreResult,
    },
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, meta::region::RegionProviderChain};
use aws_sdk_s3::{
    Client,
    config::Region,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    types::MetadataDirective,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the default AWS credential chain, honoring the
    /// configured region and custom endpoint.
    pub async fn from_config(cfg: &AppConfig) -> Self {
        let region = RegionProviderChain::first_try(cfg.aws_region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new(DEFAULT_REGION));
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &cfg.s3_endpoint {
            debug!("using custom S3 endpoint {}", endpoint);
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self::new(Client::from_conf(builder.build()))
    }
}

/// Flatten an SDK error into the store's error type, keeping the full
/// error chain in the message.
fn backend_error<E, R>(err: SdkError<E, R>) -> ObjectStoreError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    ObjectStoreError::Backend(DisplayErrorContext(&err).to_string())
}

/// S3 reports a missing key on HEAD/COPY only through the status code.
fn is_status_not_found<E, R>(err: &SdkError<E, R>) -> bool
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::ServiceError(service) => {
            matches!(service.err().code(), Some("NoSuchKey" | "NotFound"))
        }
        _ => false,
    }
}

fn to_utc(time: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(time.secs(), time.subsec_nanos())
}

/// Percent-encode a `bucket/key` copy source, leaving `/` intact.
fn encode_copy_source(bucket: &str, key: &str) -> String {
    let mut out = String::with_capacity(bucket.len() + key.len() + 1);
    for byte in format!("{}/{}", bucket, key).bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn list_buckets(&self) -> ObjectStoreResult<Vec<String>> {
        let resp = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(backend_error)?;
        Ok(resp
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name().map(str::to_owned))
            .collect())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> ObjectStoreResult<ListObjectsResult> {
        let max_keys = params.max_keys.clamp(1, 1000) as i32;
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .max_keys(max_keys)
            .set_prefix(params.prefix)
            .set_delimiter(params.delimiter)
            .set_continuation_token(params.continuation_token)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_bucket())
                    .unwrap_or(false)
                {
                    ObjectStoreError::BucketNotFound(bucket.to_string())
                } else {
                    backend_error(err)
                }
            })?;

        let objects = resp
            .contents()
            .iter()
            .filter_map(|obj| {
                Some(StoredObject {
                    key: obj.key()?.to_owned(),
                    size_bytes: obj.size().unwrap_or(0),
                    last_modified: obj.last_modified().and_then(to_utc),
                    etag: obj.e_tag().map(|tag| tag.trim_matches('"').to_owned()),
                    metadata: ObjectMetadata::new(),
                })
            })
            .collect();
        let common_prefixes = resp
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_owned))
            .collect();

        Ok(ListObjectsResult {
            objects,
            common_prefixes,
            is_truncated: resp.is_truncated().unwrap_or(false),
            next_continuation_token: resp.next_continuation_token().map(str::to_owned),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> ObjectStoreResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let missing = err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                    || is_status_not_found(&err);
                if missing {
                    ObjectStoreError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    backend_error(err)
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|err| ObjectStoreError::Backend(err.to_string()))?;
        Ok(body.into_bytes())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
    ) -> ObjectStoreResult<()> {
        let len = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_metadata((!metadata.is_empty()).then(|| metadata.clone()))
            .send()
            .await
            .map_err(backend_error)?;
        debug!("put {} bytes to s3://{}/{}", len, bucket, key);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ObjectStoreResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    /// Copy the object onto itself with `MetadataDirective::Replace`.
    async fn replace_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> ObjectStoreResult<()> {
        self.client
            .copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(encode_copy_source(bucket, key))
            .metadata_directive(MetadataDirective::Replace)
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|err| {
                if is_status_not_found(&err) {
                    ObjectStoreError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    backend_error(err)
                }
            })?;
        Ok(())
    }
}
