//! Shared stream aliases that cross the [`Backend`](crate::Backend) boundary.
//!
//! Every backend accepts an ingest body as a `BodyStream` and hands back a
//! `ObjectReader` for reads, so streaming never buffers a whole object in
//! RAM (§9 "Streaming vs buffering").

use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio::io::AsyncRead;

/// A chunked request body the backend writes out as it is received.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// A streaming handle for a `ReadObject` response. Callers must consume (or
/// drop) it promptly; dropping closes the underlying file/connection.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Wrap an in-memory buffer as a [`BodyStream`], for backends/tests that
/// already have the full payload available.
pub fn body_from_bytes(bytes: Bytes) -> BodyStream {
    Box::pin(futures::stream::once(async move { Ok(bytes) }))
}
