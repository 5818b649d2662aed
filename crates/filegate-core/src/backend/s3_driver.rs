//! `s3` scheme: an AWS S3 (or S3-compatible) bucket as a flat keyspace.

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use filegate_schema::FilerError;
use futures::StreamExt;
use tokio_util::io::StreamReader;

use crate::backend::{DriverAttrs, FlatDriver};
use crate::body::{BodyStream, ObjectReader};

pub struct S3Driver {
    client: Client,
    bucket: String,
}

impl S3Driver {
    /// Builds a client from the process's ambient AWS credential chain
    /// (environment, profile, instance role). `endpoint` overrides the
    /// default AWS endpoint for S3-compatible stores (MinIO, R2, ...).
    pub async fn new(bucket: impl Into<String>, endpoint: Option<&str>) -> Self {
        let region_provider = aws_config::meta::region::RegionProviderChain::default_provider()
            .or_else(aws_sdk_s3::config::Region::new("us-east-1"));
        let mut loader =
            aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region_provider);
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        let client = Client::new(&config);
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

fn md5_etag(body: &[u8]) -> String {
    format!("{:x}", md5::compute(body))
}

/// Classifies a non-NotFound AWS service error: `AccessDenied` surfaces as
/// `Forbidden` (§7), everything else collapses to `Internal`.
fn classify_service_error(op: &str, key: &str, err: impl std::fmt::Display + ProvideErrorMetadata) -> FilerError {
    if err.code() == Some("AccessDenied") {
        FilerError::forbidden(format!("s3 {op} {key}: access denied"))
    } else {
        FilerError::internal(format!("s3 {op} {key}: {err}"))
    }
}

#[async_trait]
impl FlatDriver for S3Driver {
    fn scheme_name(&self) -> &'static str {
        "s3"
    }

    async fn put(
        &self,
        key: &str,
        mut body: BodyStream,
        content_type: Option<&str>,
        meta: &BTreeMap<String, String>,
    ) -> Result<DriverAttrs, FilerError> {
        // `put_object` needs a known content length up front, so the chunked
        // ingest body is buffered here. A true zero-copy path would need S3
        // multipart upload (CreateMultipartUpload/UploadPart/Complete); this
        // single-shot PutObject keeps the driver simple and matches how the
        // rest of the ecosystem talks to S3 for moderate object sizes.
        let mut buf = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(FilerError::from)?;
            buf.extend_from_slice(&chunk);
        }
        let size = buf.len() as u64;
        let etag = md5_etag(&buf);

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(buf));
        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }
        for (k, v) in meta {
            request = request.metadata(k, v);
        }
        request
            .send()
            .await
            .map_err(|e| classify_service_error("put_object", key, e.into_service_error()))?;

        Ok(DriverAttrs {
            size,
            modtime: Some(Utc::now()),
            etag,
            content_type: content_type.unwrap_or_default().to_string(),
            meta: meta.clone(),
        })
    }

    async fn attributes(&self, key: &str) -> Result<Option<DriverAttrs>, FilerError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(head_output_to_attrs(
                output.content_length(),
                output.e_tag(),
                output.last_modified(),
                output.content_type(),
                output.metadata(),
            ))),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(None)
                } else {
                    Err(classify_service_error("head_object", key, service_error))
                }
            }
        }
    }

    async fn get_stream(&self, key: &str) -> Result<(ObjectReader, DriverAttrs), FilerError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    FilerError::not_found(format!("no object at key `{key}`"))
                } else {
                    classify_service_error("get_object", key, service_error)
                }
            })?;

        let attrs = head_output_to_attrs(
            output.content_length(),
            output.e_tag(),
            output.last_modified(),
            output.content_type(),
            output.metadata(),
        );

        let byte_stream = output
            .body
            .map(|res| res.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        let reader = StreamReader::new(byte_stream);
        Ok((Box::pin(reader), attrs))
    }

    async fn list(
        &self,
        prefix: &str,
        limit: Option<usize>,
    ) -> Result<Vec<(String, DriverAttrs)>, FilerError> {
        let mut out = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.clone())
                .send()
                .await
                .map_err(|e| classify_service_error("list_objects_v2", prefix, e.into_service_error()))?;

            for obj in response.contents() {
                let Some(key) = obj.key() else { continue };
                let attrs = DriverAttrs {
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    modtime: obj
                        .last_modified()
                        .and_then(|d| DateTime::from_timestamp(d.secs(), 0)),
                    etag: obj.e_tag().unwrap_or_default().trim_matches('"').to_string(),
                    content_type: String::new(),
                    meta: BTreeMap::new(),
                };
                out.push((key.to_string(), attrs));
                if let Some(limit) = limit {
                    if out.len() >= limit {
                        return Ok(out);
                    }
                }
            }

            continuation_token = response.next_continuation_token().map(str::to_string);
            if continuation_token.is_none() {
                break;
            }
        }
        Ok(out)
    }

    async fn delete(&self, key: &str) -> Result<(), FilerError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_service_error("delete_object", key, e.into_service_error()))?;
        Ok(())
    }
}

fn head_output_to_attrs(
    content_length: Option<i64>,
    e_tag: Option<&str>,
    last_modified: Option<&aws_sdk_s3::primitives::DateTime>,
    content_type: Option<&str>,
    metadata: Option<&std::collections::HashMap<String, String>>,
) -> DriverAttrs {
    DriverAttrs {
        size: content_length.unwrap_or(0).max(0) as u64,
        modtime: last_modified.and_then(|d| DateTime::from_timestamp(d.secs(), 0)),
        etag: e_tag.unwrap_or_default().trim_matches('"').to_string(),
        content_type: content_type.unwrap_or_default().to_string(),
        meta: metadata
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_output_to_attrs_trims_quoted_etag() {
        let attrs = head_output_to_attrs(Some(12), Some("\"abc123\""), None, Some("text/plain"), None);
        assert_eq!(attrs.etag, "abc123");
        assert_eq!(attrs.size, 12);
        assert_eq!(attrs.content_type, "text/plain");
    }

    #[test]
    fn head_output_to_attrs_negative_length_clamps_to_zero() {
        let attrs = head_output_to_attrs(Some(-1), None, None, None, None);
        assert_eq!(attrs.size, 0);
    }
}
