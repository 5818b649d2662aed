//! The polymorphic blob interface every storage driver implements (§4.1).

mod file;
mod flat;
mod mem_driver;

#[cfg(feature = "s3")]
mod s3_driver;

#[cfg(feature = "gcs")]
mod gcs_driver;

pub use file::FileBackend;
pub use flat::{DriverAttrs, FlatBackend, FlatDriver};
pub use mem_driver::MemDriver;

#[cfg(feature = "s3")]
pub use s3_driver::S3Driver;

#[cfg(feature = "gcs")]
pub use gcs_driver::GcsDriver;

use async_trait::async_trait;
use filegate_schema::{
    CreateObjectRequest, DeleteObjectRequest, DeleteObjectsRequest, FilerError, GetObjectRequest,
    ListObjectsRequest, Object, ReadObjectRequest,
};

use crate::body::{BodyStream, ObjectReader};

/// Uniform CRUD contract over one underlying store (§4.1).
///
/// Implementations MUST be safe for concurrent use across distinct
/// requests; they may serialise internally (§5).
#[async_trait]
pub trait Backend: Send + Sync {
    /// The name this backend was registered under.
    fn name(&self) -> &str;

    async fn create_object(
        &self,
        req: CreateObjectRequest,
        body: BodyStream,
    ) -> Result<Object, FilerError>;

    async fn get_object(&self, req: GetObjectRequest) -> Result<Object, FilerError>;

    /// Returns a streaming reader alongside the object's metadata. The
    /// caller owns the reader and must consume or drop it; there is no
    /// explicit `close` beyond drop (§9 "Scoped resources").
    async fn read_object(
        &self,
        req: ReadObjectRequest,
    ) -> Result<(ObjectReader, Object), FilerError>;

    /// Always returns the full matching set, unsliced; paging is the
    /// manager's job (§4.2).
    async fn list_objects(&self, req: ListObjectsRequest) -> Result<Vec<Object>, FilerError>;

    async fn delete_object(&self, req: DeleteObjectRequest) -> Result<Object, FilerError>;

    async fn delete_objects(&self, req: DeleteObjectsRequest) -> Result<Vec<Object>, FilerError>;

    /// Release the underlying driver handle. Idempotent.
    async fn close(&self) -> Result<(), FilerError>;
}

/// One of the four backend schemes this gateway fronts, as a tagged union
/// rather than a trait object: every concrete implementation is known at
/// compile time, so `Manager` dispatches through one `match` per operation
/// instead of paying for (and hiding behind) `dyn Backend`.
pub enum AnyBackend {
    File(FileBackend),
    Mem(FlatBackend<MemDriver>),
    #[cfg(feature = "s3")]
    S3(FlatBackend<S3Driver>),
    #[cfg(feature = "gcs")]
    Gcs(FlatBackend<GcsDriver>),
}

#[async_trait]
impl Backend for AnyBackend {
    fn name(&self) -> &str {
        match self {
            AnyBackend::File(b) => b.name(),
            AnyBackend::Mem(b) => b.name(),
            #[cfg(feature = "s3")]
            AnyBackend::S3(b) => b.name(),
            #[cfg(feature = "gcs")]
            AnyBackend::Gcs(b) => b.name(),
        }
    }

    async fn create_object(
        &self,
        req: CreateObjectRequest,
        body: BodyStream,
    ) -> Result<Object, FilerError> {
        match self {
            AnyBackend::File(b) => b.create_object(req, body).await,
            AnyBackend::Mem(b) => b.create_object(req, body).await,
            #[cfg(feature = "s3")]
            AnyBackend::S3(b) => b.create_object(req, body).await,
            #[cfg(feature = "gcs")]
            AnyBackend::Gcs(b) => b.create_object(req, body).await,
        }
    }

    async fn get_object(&self, req: GetObjectRequest) -> Result<Object, FilerError> {
        match self {
            AnyBackend::File(b) => b.get_object(req).await,
            AnyBackend::Mem(b) => b.get_object(req).await,
            #[cfg(feature = "s3")]
            AnyBackend::S3(b) => b.get_object(req).await,
            #[cfg(feature = "gcs")]
            AnyBackend::Gcs(b) => b.get_object(req).await,
        }
    }

    async fn read_object(
        &self,
        req: ReadObjectRequest,
    ) -> Result<(ObjectReader, Object), FilerError> {
        match self {
            AnyBackend::File(b) => b.read_object(req).await,
            AnyBackend::Mem(b) => b.read_object(req).await,
            #[cfg(feature = "s3")]
            AnyBackend::S3(b) => b.read_object(req).await,
            #[cfg(feature = "gcs")]
            AnyBackend::Gcs(b) => b.read_object(req).await,
        }
    }

    async fn list_objects(&self, req: ListObjectsRequest) -> Result<Vec<Object>, FilerError> {
        match self {
            AnyBackend::File(b) => b.list_objects(req).await,
            AnyBackend::Mem(b) => b.list_objects(req).await,
            #[cfg(feature = "s3")]
            AnyBackend::S3(b) => b.list_objects(req).await,
            #[cfg(feature = "gcs")]
            AnyBackend::Gcs(b) => b.list_objects(req).await,
        }
    }

    async fn delete_object(&self, req: DeleteObjectRequest) -> Result<Object, FilerError> {
        match self {
            AnyBackend::File(b) => b.delete_object(req).await,
            AnyBackend::Mem(b) => b.delete_object(req).await,
            #[cfg(feature = "s3")]
            AnyBackend::S3(b) => b.delete_object(req).await,
            #[cfg(feature = "gcs")]
            AnyBackend::Gcs(b) => b.delete_object(req).await,
        }
    }

    async fn delete_objects(&self, req: DeleteObjectsRequest) -> Result<Vec<Object>, FilerError> {
        match self {
            AnyBackend::File(b) => b.delete_objects(req).await,
            AnyBackend::Mem(b) => b.delete_objects(req).await,
            #[cfg(feature = "s3")]
            AnyBackend::S3(b) => b.delete_objects(req).await,
            #[cfg(feature = "gcs")]
            AnyBackend::Gcs(b) => b.delete_objects(req).await,
        }
    }

    async fn close(&self) -> Result<(), FilerError> {
        match self {
            AnyBackend::File(b) => b.close().await,
            AnyBackend::Mem(b) => b.close().await,
            #[cfg(feature = "s3")]
            AnyBackend::S3(b) => b.close().await,
            #[cfg(feature = "gcs")]
            AnyBackend::Gcs(b) => b.close().await,
        }
    }
}
