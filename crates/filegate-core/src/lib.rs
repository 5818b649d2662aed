//! The blob backend abstraction and the manager that dispatches to it
//! (§4.1, §4.2). This crate has no HTTP or CLI surface of its own —
//! `filegate-server` is the only consumer of [`Manager`].

pub mod backend;
pub mod body;
pub mod manager;

pub use backend::{AnyBackend, Backend, FileBackend, FlatBackend, MemDriver};
pub use body::{BodyStream, ObjectReader};
pub use manager::{Manager, ManagerBuilder};

#[cfg(feature = "s3")]
pub use backend::S3Driver;
#[cfg(feature = "gcs")]
pub use backend::GcsDriver;
