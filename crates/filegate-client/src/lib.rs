//! The bulk directory-upload client (§4.4): walks an abstract directory,
//! probes remote state in parallel, encodes a lazily-streamed multipart
//! body, and drives the result off the gateway's SSE progress stream.
//!
//! This crate has no server-side knowledge — it only ever speaks the
//! gateway's public HTTP API, so it can be pulled in by any caller that
//! wants to bulk-upload a directory without linking `filegate-core`.

mod client;
mod error;
mod multipart;
mod preflight;
mod sse;
mod walk;

pub use client::{BulkClient, UploadOptions, UploadProgress};
pub use error::ClientError;
pub use preflight::{should_skip, DEFAULT_PARALLEL_HEADS};
pub use walk::{walk, EntryFilter, WalkEntry};
