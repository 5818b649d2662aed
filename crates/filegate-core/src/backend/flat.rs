//! Generic flat-keyspace backend (§4.1): shared by every scheme whose
//! underlying store has no native directory structure (`s3`, `gs`, `mem`).
//!
//! Per the spec's design notes ("a single product type parameterised by a
//! driver handle is simplest"), the key reconciliation, phantom-directory
//! resolution, ETag discipline, modtime override and deletion-with-retry
//! algorithms are all implemented exactly once here, against a small
//! [`FlatDriver`] trait. Each scheme only supplies the low-level verbs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filegate_schema::{
    path, CreateObjectRequest, DeleteObjectRequest, DeleteObjectsRequest, ErrorKind, FilerError,
    GetObjectRequest, ListObjectsRequest, Object, ReadObjectRequest, RESERVED_MODTIME_META_KEY,
};

use crate::backend::Backend;
use crate::body::{BodyStream, ObjectReader};

/// A hard cap on `DeleteObjects` list-then-delete passes, guarding against
/// an unbounded spin when a silent failure masks a persistent object
/// (§4.1 "Deletion-with-retry").
const MAX_DELETE_PASSES: u32 = 10;

/// Attributes of one stored key, as reported by a [`FlatDriver`]. This is
/// the driver's native view; [`FlatBackend`] layers the ETag/modtime
/// discipline and phantom-directory resolution on top.
#[derive(Debug, Clone)]
pub struct DriverAttrs {
    pub size: u64,
    /// Native last-modified, when the store tracks one.
    pub modtime: Option<DateTime<Utc>>,
    /// MD5 hex when the store exposes an MD5, its own opaque ETag
    /// otherwise (§4.1 "ETag discipline" is enforced by the driver at this
    /// layer; `FlatBackend` just forwards it unchanged).
    pub etag: String,
    pub content_type: String,
    pub meta: BTreeMap<String, String>,
}

/// Low-level verbs a flat-keyspace store must provide. Every method takes
/// a fully-qualified storage key (`bucket_prefix` already applied).
#[async_trait]
pub trait FlatDriver: Send + Sync {
    /// Scheme name, used only for diagnostics.
    fn scheme_name(&self) -> &'static str;

    async fn put(
        &self,
        key: &str,
        body: BodyStream,
        content_type: Option<&str>,
        meta: &BTreeMap<String, String>,
    ) -> Result<DriverAttrs, FilerError>;

    /// `None` means the key does not exist. A `Forbidden` error must be
    /// surfaced as-is and never coerced into `None` (§4.1 phantom
    /// resolution note; §9 open question).
    async fn attributes(&self, key: &str) -> Result<Option<DriverAttrs>, FilerError>;

    async fn get_stream(&self, key: &str) -> Result<(ObjectReader, DriverAttrs), FilerError>;

    /// List every key with the given raw prefix (no trailing-slash
    /// assumption is made by the driver beyond what the caller passes in).
    /// `limit` bounds the number of entries returned, used with `Some(1)`
    /// for the phantom-directory children probe.
    async fn list(
        &self,
        prefix: &str,
        limit: Option<usize>,
    ) -> Result<Vec<(String, DriverAttrs)>, FilerError>;

    async fn delete(&self, key: &str) -> Result<(), FilerError>;

    /// Release any pooled resources. Most drivers are stateless clients
    /// and can no-op.
    async fn close(&self) -> Result<(), FilerError> {
        Ok(())
    }
}

enum ListRoot {
    /// `key` names a real object directly (leaf, not a phantom marker).
    Object(String, DriverAttrs),
    /// `key` is either absent or a phantom marker; list everything
    /// beneath `prefix`.
    Prefix(String),
}

pub struct FlatBackend<D: FlatDriver> {
    name: String,
    bucket_prefix: String,
    driver: D,
}

impl<D: FlatDriver> FlatBackend<D> {
    pub fn new(name: impl Into<String>, bucket_prefix: impl Into<String>, driver: D) -> Self {
        Self {
            name: name.into(),
            bucket_prefix: bucket_prefix.into(),
            driver,
        }
    }

    fn storage_key(&self, logical_path: &str) -> String {
        let cleaned = path::clean(logical_path);
        let trimmed = path::trim_leading_slash(&cleaned);
        if self.bucket_prefix.is_empty() {
            trimmed.to_string()
        } else if trimmed.is_empty() {
            self.bucket_prefix.clone()
        } else {
            format!("{}/{}", self.bucket_prefix, trimmed)
        }
    }

    fn object_path(&self, key: &str) -> String {
        let rel = if self.bucket_prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&format!("{}/", self.bucket_prefix))
                .unwrap_or(key)
        };
        path::clean(&format!("/{rel}"))
    }

    /// The prefix under which a key's *children* would live: `key/`, or
    /// empty (list everything) when `key` itself is empty.
    fn children_prefix(key: &str) -> String {
        if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        }
    }

    async fn has_children(&self, key: &str) -> Result<bool, FilerError> {
        let entries = self.driver.list(&Self::children_prefix(key), Some(1)).await?;
        Ok(!entries.is_empty())
    }

    /// The phantom-directory decision procedure (§4.1): distinguishes a
    /// real object, a phantom zero-byte marker with children, and a
    /// non-existent key that should be treated as a listing prefix.
    async fn resolve_list_root(&self, key: &str) -> Result<ListRoot, FilerError> {
        match self.driver.attributes(key).await? {
            Some(attrs) if attrs.size > 0 => Ok(ListRoot::Object(key.to_string(), attrs)),
            Some(attrs) => {
                if self.has_children(key).await? {
                    Ok(ListRoot::Prefix(Self::children_prefix(key)))
                } else {
                    Ok(ListRoot::Object(key.to_string(), attrs))
                }
            }
            None => Ok(ListRoot::Prefix(Self::children_prefix(key))),
        }
    }

    fn attrs_to_object(&self, logical_path: &str, attrs: DriverAttrs) -> Object {
        let mut obj = Object {
            name: self.name.clone(),
            path: logical_path.to_string(),
            size: attrs.size,
            modtime: attrs.modtime,
            content_type: attrs.content_type,
            etag: attrs.etag,
            meta: attrs.meta,
        };
        obj.modtime = obj.effective_modtime();
        obj
    }
}

#[async_trait]
impl<D: FlatDriver> Backend for FlatBackend<D> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_object(
        &self,
        req: CreateObjectRequest,
        body: BodyStream,
    ) -> Result<Object, FilerError> {
        let cleaned = path::clean(&req.path);
        let key = self.storage_key(&cleaned);

        if req.if_not_exists {
            if self.driver.attributes(&key).await?.is_some() {
                return Err(FilerError::conflict(format!(
                    "{cleaned} already exists on backend `{}`",
                    self.name
                )));
            }
        }

        // A real object already lives under this key as a namespace for
        // other keys (phantom-directory territory in reverse): refuse to
        // shadow it with a leaf write.
        if self.has_children(&key).await? {
            return Err(FilerError::bad_request(format!(
                "{cleaned} is a directory on backend `{}`",
                self.name
            )));
        }

        let mut meta = req.meta.clone();
        if let Some(modtime) = req.modtime {
            meta.insert(RESERVED_MODTIME_META_KEY.to_string(), modtime.to_rfc3339());
        }

        let attrs = self
            .driver
            .put(&key, body, req.content_type.as_deref(), &meta)
            .await?;
        Ok(self.attrs_to_object(&cleaned, attrs))
    }

    async fn get_object(&self, req: GetObjectRequest) -> Result<Object, FilerError> {
        let cleaned = path::clean(&req.path);
        let key = self.storage_key(&cleaned);
        let attrs = self
            .driver
            .attributes(&key)
            .await?
            .ok_or_else(|| FilerError::not_found(format!("no object at {cleaned}")))?;

        if attrs.size == 0 && self.has_children(&key).await? {
            return Err(FilerError::not_found(format!("no object at {cleaned}")));
        }

        Ok(self.attrs_to_object(&cleaned, attrs))
    }

    async fn read_object(
        &self,
        req: ReadObjectRequest,
    ) -> Result<(ObjectReader, Object), FilerError> {
        let cleaned = path::clean(&req.path);
        let key = self.storage_key(&cleaned);
        let attrs = self
            .driver
            .attributes(&key)
            .await?
            .ok_or_else(|| FilerError::not_found(format!("no object at {cleaned}")))?;

        if attrs.size == 0 && self.has_children(&key).await? {
            return Err(FilerError::not_found(format!("no object at {cleaned}")));
        }

        let (reader, attrs) = self.driver.get_stream(&key).await?;
        Ok((reader, self.attrs_to_object(&cleaned, attrs)))
    }

    async fn list_objects(&self, req: ListObjectsRequest) -> Result<Vec<Object>, FilerError> {
        let cleaned = path::clean(&req.path);
        let key = self.storage_key(&cleaned);

        match self.resolve_list_root(&key).await? {
            ListRoot::Object(_, attrs) => Ok(vec![self.attrs_to_object(&cleaned, attrs)]),
            ListRoot::Prefix(prefix) => {
                let entries = self.driver.list(&prefix, None).await?;
                let mut out = Vec::with_capacity(entries.len());
                for (entry_key, attrs) in entries {
                    if entry_key.ends_with('/') {
                        continue; // keys ending in `/` never represent objects
                    }
                    let entry_path = self.object_path(&entry_key);
                    let matches = if req.recursive {
                        path::has_prefix(&entry_path, &cleaned)
                    } else {
                        path::is_immediate_child(&entry_path, &cleaned)
                    };
                    if matches {
                        out.push(self.attrs_to_object(&entry_path, attrs));
                    }
                }
                Ok(out)
            }
        }
    }

    async fn delete_object(&self, req: DeleteObjectRequest) -> Result<Object, FilerError> {
        let cleaned = path::clean(&req.path);
        let key = self.storage_key(&cleaned);
        let attrs = self
            .driver
            .attributes(&key)
            .await?
            .ok_or_else(|| FilerError::not_found(format!("no object at {cleaned}")))?;

        if attrs.size == 0 && self.has_children(&key).await? {
            return Err(FilerError::bad_request(format!(
                "{cleaned} is a directory on backend `{}`",
                self.name
            )));
        }

        match self.driver.delete(&key).await {
            Ok(()) => {}
            // Already observed the object via `attributes` above, so a
            // not-found here is a benign race, not a caller-visible error.
            Err(e) if e.kind == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        Ok(self.attrs_to_object(&cleaned, attrs))
    }

    async fn delete_objects(&self, req: DeleteObjectsRequest) -> Result<Vec<Object>, FilerError> {
        let mut deleted = Vec::new();
        let mut pass = 0u32;
        loop {
            pass += 1;
            let batch = self
                .list_objects(ListObjectsRequest {
                    path: req.path.clone(),
                    recursive: req.recursive,
                    offset: 0,
                    limit: usize::MAX,
                })
                .await?;
            if batch.is_empty() {
                break;
            }
            for obj in &batch {
                let key = self.storage_key(&obj.path);
                match self.driver.delete(&key).await {
                    Ok(()) => {}
                    Err(e) if e.kind == ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            }
            deleted.extend(batch);
            if pass >= MAX_DELETE_PASSES {
                tracing::warn!(
                    backend = %self.name,
                    path = %req.path,
                    "DeleteObjects hit the {MAX_DELETE_PASSES}-pass limit; store may have a lingering object"
                );
                break;
            }
        }
        Ok(deleted)
    }

    async fn close(&self) -> Result<(), FilerError> {
        self.driver.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemDriver;
    use bytes::Bytes;
    use filegate_schema::{CreateObjectRequest, DeleteObjectsRequest, ListObjectsRequest};

    fn body(data: &'static str) -> BodyStream {
        crate::body::body_from_bytes(Bytes::from_static(data.as_bytes()))
    }

    fn backend() -> FlatBackend<MemDriver> {
        FlatBackend::new("testbucket", "", MemDriver::new())
    }

    #[tokio::test]
    async fn create_then_get_round_trips_size_and_payload() {
        let be = backend();
        be.create_object(CreateObjectRequest::new("/a.txt"), body("hello"))
            .await
            .unwrap();

        let obj = be.get_object(GetObjectRequest { path: "/a.txt".into() }).await.unwrap();
        assert_eq!(obj.size, 5);

        let (mut reader, obj) = be.read_object(ReadObjectRequest { path: "/a.txt".into() }).await.unwrap();
        assert_eq!(obj.size, 5);
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn etag_is_stable_across_create_get_and_list() {
        let be = backend();
        let created = be
            .create_object(CreateObjectRequest::new("/a.txt"), body("hello"))
            .await
            .unwrap();

        let got = be.get_object(GetObjectRequest { path: "/a.txt".into() }).await.unwrap();
        assert_eq!(created.etag, got.etag);
        assert!(!created.etag.is_empty());

        let listed = be
            .list_objects(ListObjectsRequest { path: "/a.txt".into(), recursive: false, offset: 0, limit: 0 })
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].etag, created.etag);
    }

    #[tokio::test]
    async fn if_not_exists_conflicts_on_existing_path() {
        let be = backend();
        be.create_object(CreateObjectRequest::new("/a.txt"), body("hello")).await.unwrap();

        let mut req = CreateObjectRequest::new("/a.txt");
        req.if_not_exists = true;
        let err = be.create_object(req, body("again")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn phantom_directory_marker_is_suppressed_from_listing() {
        let be = backend();
        // A zero-byte "folder" marker plus a real child beneath it.
        be.create_object(CreateObjectRequest::new("/dir"), body("")).await.unwrap();
        be.create_object(CreateObjectRequest::new("/dir/file.txt"), body("x")).await.unwrap();

        let listed = be
            .list_objects(ListObjectsRequest { path: "/dir".into(), recursive: false, offset: 0, limit: 0 })
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, "/dir/file.txt");

        // Getting the marker directly must also report not-found, since
        // it's a phantom, not a real zero-byte object.
        let err = be.get_object(GetObjectRequest { path: "/dir".into() }).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn real_zero_byte_object_with_no_children_is_not_phantom() {
        let be = backend();
        be.create_object(CreateObjectRequest::new("/empty.txt"), body("")).await.unwrap();

        let obj = be.get_object(GetObjectRequest { path: "/empty.txt".into() }).await.unwrap();
        assert_eq!(obj.size, 0);
    }

    #[tokio::test]
    async fn create_refuses_to_shadow_an_existing_directory() {
        let be = backend();
        be.create_object(CreateObjectRequest::new("/dir/child.txt"), body("x")).await.unwrap();

        let err = be
            .create_object(CreateObjectRequest::new("/dir"), body("oops"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn recursive_and_non_recursive_listing_respect_prefix_depth() {
        let be = backend();
        be.create_object(CreateObjectRequest::new("/sub/b.txt"), body("world")).await.unwrap();
        be.create_object(CreateObjectRequest::new("/sub/deep/c.txt"), body("!")).await.unwrap();

        let recursive = be
            .list_objects(ListObjectsRequest { path: "/sub".into(), recursive: true, offset: 0, limit: 0 })
            .await
            .unwrap();
        assert_eq!(recursive.len(), 2);

        let shallow = be
            .list_objects(ListObjectsRequest { path: "/sub".into(), recursive: false, offset: 0, limit: 0 })
            .await
            .unwrap();
        assert_eq!(shallow.len(), 1);
        assert_eq!(shallow[0].path, "/sub/b.txt");
    }

    #[tokio::test]
    async fn delete_objects_recursive_removes_every_matching_key() {
        let be = backend();
        be.create_object(CreateObjectRequest::new("/sub/a.txt"), body("a")).await.unwrap();
        be.create_object(CreateObjectRequest::new("/sub/b.txt"), body("b")).await.unwrap();

        let deleted = be
            .delete_objects(DeleteObjectsRequest { path: "/sub".into(), recursive: true })
            .await
            .unwrap();
        assert_eq!(deleted.len(), 2);

        let remaining = be
            .list_objects(ListObjectsRequest { path: "/sub".into(), recursive: true, offset: 0, limit: 0 })
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn modtime_round_trips_via_reserved_meta_key() {
        let be = backend();
        let modtime = DateTime::parse_from_rfc3339("2024-03-05T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut req = CreateObjectRequest::new("/a.txt");
        req.modtime = Some(modtime);
        be.create_object(req, body("hi")).await.unwrap();

        let obj = be.get_object(GetObjectRequest { path: "/a.txt".into() }).await.unwrap();
        assert_eq!(obj.effective_modtime(), Some(modtime));
    }

    #[tokio::test]
    async fn bucket_prefix_is_transparent_to_logical_paths() {
        let be = FlatBackend::new("testbucket", "prefix", MemDriver::new());
        be.create_object(CreateObjectRequest::new("/a.txt"), body("x")).await.unwrap();

        let key = be.storage_key("/a.txt");
        assert_eq!(key, "prefix/a.txt");

        let obj = be.get_object(GetObjectRequest { path: "/a.txt".into() }).await.unwrap();
        assert_eq!(obj.path, "/a.txt");
    }
}
