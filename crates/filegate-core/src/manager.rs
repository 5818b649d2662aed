//! Name-keyed backend registry (§4.2): dispatches every request to exactly
//! one backend and applies the cross-cutting paging and tracing policy the
//! backends themselves don't know about.

use std::collections::BTreeMap;
use std::sync::Arc;

use filegate_schema::{
    CreateObjectRequest, DeleteObjectRequest, DeleteObjectsRequest, FilerError, GetObjectRequest,
    ListObjectsRequest, ListObjectsResponse, Object, ReadObjectRequest, MAX_LIST_LIMIT,
};
use tracing::Instrument;

use crate::backend::{AnyBackend, Backend};
use crate::body::{BodyStream, ObjectReader};

/// Constructed once at startup and never mutated afterward (§5 "Shared
/// resource policy"); all later access is read-only, so sharing one
/// `Manager` behind an `Arc` across the whole process needs no lock.
pub struct Manager {
    backends: BTreeMap<String, Arc<AnyBackend>>,
}

/// Builds a [`Manager`] from a set of already-constructed backends. Names
/// are assumed unique and valid; the HTTP layer / CLI wiring enforces that
/// before backends are constructed (§3 invariant).
#[derive(Default)]
pub struct ManagerBuilder {
    backends: BTreeMap<String, Arc<AnyBackend>>,
}

impl ManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: AnyBackend) -> Self {
        let backend = Arc::new(backend);
        self.backends.insert(backend.name().to_string(), backend);
        self
    }

    pub fn build(self) -> Manager {
        Manager {
            backends: self.backends,
        }
    }
}

fn unknown_backend(name: &str) -> FilerError {
    FilerError::not_found(format!("no backend named `{name}`"))
}

impl Manager {
    /// Sorted backend names.
    pub fn backends(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    pub fn backend(&self, name: &str) -> Option<Arc<AnyBackend>> {
        self.backends.get(name).cloned()
    }

    pub async fn create_object(
        &self,
        name: &str,
        req: CreateObjectRequest,
        body: BodyStream,
    ) -> Result<Object, FilerError> {
        let backend = self.backend(name).ok_or_else(|| unknown_backend(name))?;
        let span = tracing::info_span!("filer.manager.CreateObject", backend = name, path = %req.path);
        async move { backend.create_object(req, body).await }
            .instrument(span)
            .await
    }

    pub async fn get_object(&self, name: &str, req: GetObjectRequest) -> Result<Object, FilerError> {
        let backend = self.backend(name).ok_or_else(|| unknown_backend(name))?;
        let span = tracing::info_span!("filer.manager.GetObject", backend = name, path = %req.path);
        async move { backend.get_object(req).await }.instrument(span).await
    }

    pub async fn read_object(
        &self,
        name: &str,
        req: ReadObjectRequest,
    ) -> Result<(ObjectReader, Object), FilerError> {
        let backend = self.backend(name).ok_or_else(|| unknown_backend(name))?;
        let span = tracing::info_span!("filer.manager.ReadObject", backend = name, path = %req.path);
        async move { backend.read_object(req).await }.instrument(span).await
    }

    /// Delegates to the backend for the full matching set, then applies
    /// the paging policy (§4.2):
    /// 1. `Count` is always the full matching length.
    /// 2. `Limit == 0` nils the body (count-only).
    /// 3. Otherwise slice `[offset : offset + min(limit, MAX_LIST_LIMIT)]`.
    pub async fn list_objects(
        &self,
        name: &str,
        req: ListObjectsRequest,
    ) -> Result<ListObjectsResponse, FilerError> {
        let backend = self.backend(name).ok_or_else(|| unknown_backend(name))?;
        let span = tracing::info_span!(
            "filer.manager.ListObjects",
            backend = name,
            path = %req.path,
            recursive = req.recursive
        );
        let offset = req.offset;
        let limit = req.limit;
        let full = async move {
            backend.list_objects(ListObjectsRequest {
                path: req.path,
                recursive: req.recursive,
                offset: 0,
                limit: 0,
            })
            .await
        }
        .instrument(span)
        .await?;

        let count = full.len();
        if limit == 0 {
            return Ok(ListObjectsResponse { count, body: None });
        }
        let capped = limit.min(MAX_LIST_LIMIT);
        let start = offset.min(count);
        let end = start.saturating_add(capped).min(count);
        let body = full[start..end].to_vec();
        Ok(ListObjectsResponse {
            count,
            body: Some(body),
        })
    }

    pub async fn delete_object(
        &self,
        name: &str,
        req: DeleteObjectRequest,
    ) -> Result<Object, FilerError> {
        let backend = self.backend(name).ok_or_else(|| unknown_backend(name))?;
        let span = tracing::info_span!("filer.manager.DeleteObject", backend = name, path = %req.path);
        async move { backend.delete_object(req).await }
            .instrument(span)
            .await
    }

    pub async fn delete_objects(
        &self,
        name: &str,
        req: DeleteObjectsRequest,
    ) -> Result<Vec<Object>, FilerError> {
        let backend = self.backend(name).ok_or_else(|| unknown_backend(name))?;
        let span = tracing::info_span!(
            "filer.manager.DeleteObjects",
            backend = name,
            path = %req.path,
            recursive = req.recursive
        );
        async move { backend.delete_objects(req).await }
            .instrument(span)
            .await
    }

    /// Close every backend, joining their errors rather than stopping at
    /// the first failure (§4.2).
    pub async fn close(&self) -> Result<(), FilerError> {
        let mut messages = Vec::new();
        for (name, backend) in &self.backends {
            if let Err(e) = backend.close().await {
                messages.push(format!("{name}: {e}"));
            }
        }
        if messages.is_empty() {
            Ok(())
        } else {
            Err(FilerError::internal(messages.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FlatBackend, MemDriver};
    use bytes::Bytes;
    use filegate_schema::{CreateObjectRequest, ListObjectsRequest};

    fn body(data: &'static str) -> BodyStream {
        crate::body::body_from_bytes(Bytes::from_static(data.as_bytes()))
    }

    fn test_manager() -> Manager {
        let backend = AnyBackend::Mem(FlatBackend::new("testbucket", "", MemDriver::new()));
        ManagerBuilder::new().with_backend(backend).build()
    }

    #[tokio::test]
    async fn unknown_backend_returns_not_found() {
        let mgr = test_manager();
        let err = mgr
            .get_object("nope", GetObjectRequest { path: "/a".into() })
            .await
            .unwrap_err();
        assert_eq!(err.kind, filegate_schema::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn list_paging_counts_full_set_and_slices_body() {
        let mgr = test_manager();
        for i in 0..5 {
            mgr.create_object(
                "testbucket",
                CreateObjectRequest::new(format!("/p/{i}.txt")),
                body("x"),
            )
            .await
            .unwrap();
        }

        let resp = mgr
            .list_objects(
                "testbucket",
                ListObjectsRequest {
                    path: "/p".into(),
                    recursive: true,
                    offset: 1,
                    limit: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(resp.count, 5);
        assert_eq!(resp.body.as_ref().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn list_limit_zero_is_count_only() {
        let mgr = test_manager();
        mgr.create_object("testbucket", CreateObjectRequest::new("/a.txt"), body("x"))
            .await
            .unwrap();

        let resp = mgr
            .list_objects(
                "testbucket",
                ListObjectsRequest {
                    path: "/".into(),
                    recursive: true,
                    offset: 0,
                    limit: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(resp.count, 1);
        assert!(resp.body.is_none());
    }

    #[tokio::test]
    async fn backends_lists_sorted_names() {
        let backend_a = AnyBackend::Mem(FlatBackend::new("zeta", "", MemDriver::new()));
        let backend_b = AnyBackend::Mem(FlatBackend::new("alpha", "", MemDriver::new()));
        let mgr = ManagerBuilder::new()
            .with_backend(backend_a)
            .with_backend(backend_b)
            .build();
        assert_eq!(mgr.backends(), vec!["alpha", "zeta"]);
    }
}
