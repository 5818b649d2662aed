//! `gs` scheme: a Google Cloud Storage bucket as a flat keyspace.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filegate_schema::FilerError;
use futures::StreamExt;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::list::ListObjectsRequest;
use google_cloud_storage::http::objects::upload::{UploadObjectRequest, UploadType};
use google_cloud_storage::http::objects::Object as GcsObject;
use google_cloud_storage::http::Error as GcsHttpError;
use tokio_util::io::StreamReader;

use crate::backend::{DriverAttrs, FlatDriver};
use crate::body::{BodyStream, ObjectReader};

pub struct GcsDriver {
    client: Client,
    bucket: String,
}

impl GcsDriver {
    /// Builds a client from the process's ambient Google Application
    /// Default Credentials.
    pub async fn new(bucket: impl Into<String>) -> Result<Self, FilerError> {
        let config = ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| FilerError::internal(format!("gcs credentials: {e}")))?;
        Ok(Self {
            client: Client::new(config),
            bucket: bucket.into(),
        })
    }
}

fn is_not_found(err: &GcsHttpError) -> bool {
    matches!(err, GcsHttpError::Response(resp) if resp.code == 404)
}

fn is_forbidden(err: &GcsHttpError) -> bool {
    matches!(err, GcsHttpError::Response(resp) if resp.code == 403)
}

/// Classifies a non-NotFound GCS error: a 403 response surfaces as
/// `Forbidden` (§7), everything else collapses to `Internal`.
fn classify_gcs_error(op: &str, key: &str, err: GcsHttpError) -> FilerError {
    if is_forbidden(&err) {
        FilerError::forbidden(format!("gcs {op} {key}: access denied"))
    } else {
        FilerError::internal(format!("gcs {op} {key}: {err}"))
    }
}

fn gcs_object_to_attrs(obj: &GcsObject) -> DriverAttrs {
    DriverAttrs {
        size: obj.size.max(0) as u64,
        modtime: obj.updated.map(|t| DateTime::<Utc>::from(t)),
        etag: obj.etag.trim_matches('"').to_string(),
        content_type: obj.content_type.clone().unwrap_or_default(),
        meta: obj.metadata.clone().unwrap_or_default(),
    }
}

#[async_trait]
impl FlatDriver for GcsDriver {
    fn scheme_name(&self) -> &'static str {
        "gs"
    }

    async fn put(
        &self,
        key: &str,
        mut body: BodyStream,
        content_type: Option<&str>,
        meta: &BTreeMap<String, String>,
    ) -> Result<DriverAttrs, FilerError> {
        // Like the S3 driver, a single-shot upload needs the whole payload
        // up front; GCS resumable uploads would avoid this but add a lot of
        // protocol machinery this gateway doesn't otherwise need.
        let mut buf = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(FilerError::from)?;
            buf.extend_from_slice(&chunk);
        }

        // A multipart upload (rather than `UploadType::Simple`) lets the
        // request carry the full object resource in one round trip, so
        // custom metadata and content type land atomically with the bytes.
        let object = GcsObject {
            name: key.to_string(),
            content_type: Some(content_type.unwrap_or("application/octet-stream").to_string()),
            metadata: if meta.is_empty() {
                None
            } else {
                Some(meta.clone().into_iter().collect())
            },
            ..Default::default()
        };

        let uploaded = self
            .client
            .upload_object(
                &UploadObjectRequest {
                    bucket: self.bucket.clone(),
                    ..Default::default()
                },
                buf,
                &UploadType::Multipart(Box::new(object)),
            )
            .await
            .map_err(|e| classify_gcs_error("upload_object", key, e))?;

        let mut attrs = gcs_object_to_attrs(&uploaded);
        attrs.meta = meta.clone();
        Ok(attrs)
    }

    async fn attributes(&self, key: &str) -> Result<Option<DriverAttrs>, FilerError> {
        match self
            .client
            .get_object(&GetObjectRequest {
                bucket: self.bucket.clone(),
                object: key.to_string(),
                ..Default::default()
            })
            .await
        {
            Ok(obj) => Ok(Some(gcs_object_to_attrs(&obj))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(classify_gcs_error("get_object", key, e)),
        }
    }

    async fn get_stream(&self, key: &str) -> Result<(ObjectReader, DriverAttrs), FilerError> {
        let request = GetObjectRequest {
            bucket: self.bucket.clone(),
            object: key.to_string(),
            ..Default::default()
        };
        let attrs = self
            .attributes(key)
            .await?
            .ok_or_else(|| FilerError::not_found(format!("no object at key `{key}`")))?;

        let byte_stream = self
            .client
            .download_streamed_object(&request, &Range::default())
            .await
            .map_err(|e| classify_gcs_error("download_streamed_object", key, e))?;

        let io_stream = byte_stream
            .map(|res| res.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        let reader = StreamReader::new(io_stream);
        Ok((Box::pin(reader), attrs))
    }

    async fn list(
        &self,
        prefix: &str,
        limit: Option<usize>,
    ) -> Result<Vec<(String, DriverAttrs)>, FilerError> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let response = self
                .client
                .list_objects(&ListObjectsRequest {
                    bucket: self.bucket.clone(),
                    prefix: Some(prefix.to_string()),
                    page_token: page_token.clone(),
                    ..Default::default()
                })
                .await
                .map_err(|e| classify_gcs_error("list_objects", prefix, e))?;

            for obj in response.items.unwrap_or_default() {
                let name = obj.name.clone();
                out.push((name, gcs_object_to_attrs(&obj)));
                if let Some(limit) = limit {
                    if out.len() >= limit {
                        return Ok(out);
                    }
                }
            }

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }
        Ok(out)
    }

    async fn delete(&self, key: &str) -> Result<(), FilerError> {
        match self
            .client
            .delete_object(&DeleteObjectRequest {
                bucket: self.bucket.clone(),
                object: key.to_string(),
                ..Default::default()
            })
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => {
                Err(FilerError::not_found(format!("no object at key `{key}`")))
            }
            Err(e) => Err(classify_gcs_error("delete_object", key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gcs_object_to_attrs_trims_quoted_etag() {
        let obj = GcsObject {
            name: "a/b.txt".to_string(),
            bucket: "x".to_string(),
            size: 10,
            etag: "\"abc\"".to_string(),
            content_type: Some("text/plain".to_string()),
            ..Default::default()
        };
        let attrs = gcs_object_to_attrs(&obj);
        assert_eq!(attrs.etag, "abc");
        assert_eq!(attrs.size, 10);
        assert_eq!(attrs.content_type, "text/plain");
    }
}
