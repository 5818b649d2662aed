//! Client-side error type (§4.4, §7). Unlike the server, which classifies
//! storage-driver errors into [`filegate_schema::ErrorKind`] at the
//! boundary, the client only ever sees the gateway's already-classified
//! JSON error body or a transport failure — so this enum just carries
//! those two shapes plus the handful of client-local failure modes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("local filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("upload cancelled")]
    Cancelled,

    #[error("{0}")]
    Joined(String),
}

impl ClientError {
    /// Combines a primary error with zero or more secondary messages into
    /// one joined error, mirroring the rollback-error-joining behaviour the
    /// gateway itself applies server-side (§4.3 "Rollback contract").
    pub fn join(primary: impl Into<String>, extra: impl IntoIterator<Item = String>) -> Self {
        let mut parts = vec![primary.into()];
        parts.extend(extra);
        ClientError::Joined(parts.join("; "))
    }
}
