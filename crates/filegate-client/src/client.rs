//! The bulk upload client (§4.4): walks a directory, probes the remote
//! state in parallel, streams a single multipart request, and consumes the
//! SSE progress stream it gets back.

use std::path::Path;
use std::sync::Arc;

use filegate_schema::{Object, UploadEvent};
use reqwest::header::ACCEPT;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::preflight::{self, DEFAULT_PARALLEL_HEADS};
use crate::walk::{self, EntryFilter, WalkEntry};
use crate::{multipart, sse};

/// One `file`/`complete`/`error` progress tick, handed to the caller's
/// callback as the SSE stream is consumed (§4.4 "per-file progress
/// callback").
#[derive(Debug, Clone)]
pub struct UploadProgress {
    pub index: usize,
    pub count: usize,
    pub path: String,
    pub written: u64,
    pub total: Option<u64>,
}

pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Tuning knobs for one [`BulkClient::create_objects`] call. All fields
/// have sensible defaults via [`UploadOptions::default`].
#[derive(Clone)]
pub struct UploadOptions {
    pub parallel_heads: Option<usize>,
    /// When false, every discovered file is uploaded unconditionally.
    pub skip_unchanged: bool,
    pub filter: Option<Arc<dyn EntryFilter>>,
    pub on_progress: Option<ProgressCallback>,
    pub cancellation: CancellationToken,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self {
            parallel_heads: None,
            skip_unchanged: true,
            filter: None,
            on_progress: None,
            cancellation: CancellationToken::new(),
        }
    }
}

/// Skip-unchanged is on by default (§4.4 "Skip-unchanged"); callers that
/// want every file re-uploaded set `skip_unchanged: false` explicitly.
impl Default for UploadOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP client for the file-gateway's bulk upload API.
#[derive(Clone)]
pub struct BulkClient {
    http: reqwest::Client,
    base_url: String,
}

impl BulkClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn with_http_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self { http, base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    fn object_url(&self, backend: &str, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, backend, path.trim_start_matches('/'))
    }

    /// HEAD-probes one remote path, returning `None` on 404 (§4.1
    /// `GetObject`, used here as the pre-flight check).
    async fn probe(&self, backend: &str, rel_path: &str) -> Result<Option<Object>, ClientError> {
        let url = self.object_url(backend, rel_path);
        let response = self.http.head(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ClientError::Server {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        let header = response
            .headers()
            .get("x-object-meta")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ClientError::Joined(format!("probe of {rel_path}: missing X-Object-Meta header")))?;
        let obj: Object = serde_json::from_str(header)
            .map_err(|e| ClientError::Joined(format!("probe of {rel_path}: malformed X-Object-Meta: {e}")))?;
        Ok(Some(obj))
    }

    /// Walks `local_root`, uploads every file that isn't already up to date
    /// on `backend` beneath `remote_dir`, and returns the committed
    /// `Object`s (§4.4 operations 1-4).
    pub async fn create_objects(
        &self,
        backend: &str,
        remote_dir: &str,
        local_root: &Path,
        opts: UploadOptions,
    ) -> Result<Vec<Object>, ClientError> {
        let remote_dir = remote_dir.trim_end_matches('/');
        let filter_ref: Option<&dyn EntryFilter> = opts.filter.as_deref();
        let entries = walk::walk(local_root, filter_ref)?;

        let parallel_heads = opts.parallel_heads.unwrap_or(DEFAULT_PARALLEL_HEADS);
        let (to_upload, probe_errors) = if opts.skip_unchanged {
            let backend = backend.to_string();
            let remote_dir = remote_dir.to_string();
            let client = self.clone();
            preflight::partition_unchanged(entries, parallel_heads, &opts.cancellation, move |entry: WalkEntry| {
                let client = client.clone();
                let backend = backend.clone();
                let remote_path = format!("{}/{}", remote_dir, entry.rel_path);
                async move {
                    let result = client.probe(&backend, &remote_path).await;
                    (entry, result)
                }
            })
            .await?
        } else {
            (entries, Vec::new())
        };

        if !probe_errors.is_empty() {
            tracing::warn!(errors = ?probe_errors, "pre-flight probe errors (non-fatal, files queued for upload)");
        }

        if to_upload.is_empty() {
            return Ok(Vec::new());
        }

        if opts.cancellation.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let form = multipart::build_form(&to_upload).await?;
        let url = format!("{}/{}{}", self.base_url, backend, {
            if remote_dir.is_empty() { String::new() } else { format!("/{remote_dir}/") }
        });

        let request = self
            .http
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .header("x-upload-count", to_upload.len().to_string())
            .multipart(form)
            .send();

        let response = tokio::select! {
            biased;
            _ = opts.cancellation.cancelled() => return Err(ClientError::Cancelled),
            result = request => result?,
        };

        if !response.status().is_success() {
            return Err(ClientError::Server {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let count = to_upload.len();
        let mut committed = Vec::new();
        let mut failure: Option<String> = None;

        let body_stream = response.bytes_stream();
        let on_progress = opts.on_progress.clone();
        let consume_fut = sse::consume(body_stream, |event| match event {
            UploadEvent::File(p) => {
                if let Some(cb) = &on_progress {
                    cb(UploadProgress { index: p.index, count, path: p.path, written: p.written, total: p.bytes });
                }
            }
            UploadEvent::Complete(obj) => committed.push(*obj),
            UploadEvent::Error(p) => failure = Some(format!("{}: {}", p.path, p.message)),
            UploadEvent::Start(_) | UploadEvent::Done(_) => {}
        });

        tokio::select! {
            biased;
            _ = opts.cancellation.cancelled() => return Err(ClientError::Cancelled),
            result = consume_fut => result?,
        }

        if let Some(message) = failure {
            return Err(ClientError::Joined(message));
        }

        Ok(committed)
    }
}
