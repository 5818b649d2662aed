//! Shared request/response records, the `Object` model, backend
//! configuration and the upload-event taxonomy.
//!
//! This crate has no I/O of its own; it is the vocabulary `filegate-core`,
//! `filegate-server` and `filegate-client` all speak so a request built on
//! one side of an HTTP call deserializes cleanly on the other.

pub mod backend;
pub mod content_type;
pub mod error;
pub mod event;
pub mod object;
pub mod path;
pub mod request;

pub use backend::{BackendUrl, Scheme};
pub use error::{ErrorKind, FilerError};
pub use event::{DonePayload, ErrorPayload, FilePayload, StartPayload, UploadEvent};
pub use object::{Object, RESERVED_MODTIME_META_KEY};
pub use request::{
    CreateObjectRequest, DeleteObjectRequest, DeleteObjectsRequest, GetObjectRequest,
    ListObjectsRequest, ListObjectsResponse, ReadObjectRequest, MAX_LIST_LIMIT,
};
