//! HTTP handlers for the backend list, object CRUD and multipart upload
//! routes (§4.3, §6).
//!
//! Bodies are always streamed: GET never buffers more than the 512-byte
//! Content-Type sniff window, and multipart ingest hands each part straight
//! to the backend as it is read off the wire.

use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use filegate_schema::{
    content_type, path::clean, CreateObjectRequest, DeleteObjectRequest, DeleteObjectsRequest,
    DonePayload, ErrorPayload, FilePayload, FilerError, GetObjectRequest, ListObjectsRequest,
    Object, ReadObjectRequest, StartPayload, UploadEvent, MAX_LIST_LIMIT,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::io::ReaderStream;

use crate::conditional;
use crate::errors::AppError;
use crate::state::AppState;

const PROGRESS_CHUNK: u64 = 64 * 1024;

/// `GET /` — the configured backend names, mapped to the URL each was
/// registered with.
pub async fn list_backends(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json((*state.backend_urls).clone())
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    path: Option<String>,
    #[serde(default)]
    recursive: bool,
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

/// `GET /{name}` — list objects under `?path=` (defaults to the root).
pub async fn list_objects(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let req = ListObjectsRequest {
        path: clean(q.path.as_deref().unwrap_or("/")),
        recursive: q.recursive,
        offset: q.offset,
        limit: q.limit.unwrap_or(MAX_LIST_LIMIT),
    };
    let resp = state.manager.list_objects(&name, req).await?;
    Ok(axum::Json(resp))
}

fn meta_from_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();
    for (name, value) in headers.iter() {
        let key = name.as_str();
        if let Some(stripped) = key.strip_prefix("x-meta-") {
            if let Ok(v) = value.to_str() {
                meta.insert(stripped.to_ascii_lowercase(), v.to_string());
            }
        }
    }
    meta
}

fn content_type_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn modtime_from_headers(headers: &HeaderMap) -> Option<chrono::DateTime<chrono::Utc>> {
    headers
        .get(header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(conditional::parse_http_date)
}

/// Builds the GET/HEAD/PUT response headers common to all three (§4.3
/// "Response headers on GET/HEAD").
fn set_object_headers(headers: &mut HeaderMap, obj: &Object, content_type: &str) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(filegate_schema::content_type::BINARY_FALLBACK)),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&obj.size.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    if let Some(modtime) = obj.effective_modtime() {
        if let Ok(v) = HeaderValue::from_str(&modtime.to_rfc2822()) {
            headers.insert(header::LAST_MODIFIED, v);
        }
    }
    if !obj.etag.is_empty() {
        if let Ok(v) = HeaderValue::from_str(&format!("\"{}\"", obj.etag)) {
            headers.insert(header::ETAG, v);
        }
    }
    if let Ok(v) = HeaderValue::from_str(&format!("inline; filename=\"{}\"", obj.basename())) {
        headers.insert(header::CONTENT_DISPOSITION, v);
    }
    if let Ok(v) = HeaderValue::from_str(&obj.path) {
        headers.insert("x-path", v);
    }
    let mut wire = obj.clone();
    wire.meta = obj.visible_meta();
    if let Ok(json) = serde_json::to_string(&wire) {
        if let Ok(v) = HeaderValue::from_str(&json) {
            headers.insert("x-object-meta", v);
        }
    }
}

/// Reads up to 512 bytes off `reader` for Content-Type sniffing, then hands
/// back a reader that replays those bytes before continuing the stream —
/// the sniff must never consume bytes the caller is owed.
async fn sniff_and_rechain(
    mut reader: filegate_core::ObjectReader,
) -> io::Result<(Vec<u8>, filegate_core::ObjectReader)> {
    let mut head = vec![0u8; 512];
    let mut filled = 0;
    while filled < head.len() {
        let n = reader.read(&mut head[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    head.truncate(filled);
    let chained: filegate_core::ObjectReader = Box::pin(std::io::Cursor::new(head.clone()).chain(reader));
    Ok((head, chained))
}

/// `HEAD /{name}/{path...}` — same headers as GET, no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path((name, path)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let full_path = clean(&format!("/{path}"));
    let obj = state
        .manager
        .get_object(&name, GetObjectRequest { path: full_path })
        .await?;
    conditional::evaluate(&headers, &obj, true)?;

    let resolved_ct = content_type::resolve_for_response(&obj.content_type, &[], &obj.path);
    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &obj, &resolved_ct);
    Ok(response)
}

/// `GET /{name}/{path...}` — stream body + `X-Object-Meta`.
pub async fn get_object(
    State(state): State<AppState>,
    Path((name, path)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let full_path = clean(&format!("/{path}"));
    let obj = state
        .manager
        .get_object(&name, GetObjectRequest { path: full_path.clone() })
        .await?;
    conditional::evaluate(&headers, &obj, true)?;

    let (reader, obj) = state
        .manager
        .read_object(&name, ReadObjectRequest { path: full_path })
        .await?;
    let (head, reader) = sniff_and_rechain(reader).await.map_err(FilerError::from)?;
    let resolved_ct = content_type::resolve_for_response(&obj.content_type, &head, &obj.path);

    let body = Body::from_stream(ReaderStream::new(reader));
    let mut response = Response::new(body);
    set_object_headers(response.headers_mut(), &obj, &resolved_ct);
    Ok(response)
}

/// `PUT /{name}/{path...}` — single-object streamed put.
pub async fn put_object(
    State(state): State<AppState>,
    Path((name, path)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let full_path = clean(&format!("/{path}"));

    let baseline = match state
        .manager
        .get_object(&name, GetObjectRequest { path: full_path.clone() })
        .await
    {
        Ok(obj) => obj,
        Err(_) => Object::new(&name, &full_path),
    };
    conditional::evaluate(&headers, &baseline, false)?;

    let if_not_exists = headers
        .get("if-none-match")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "*")
        .unwrap_or(false);

    let req = CreateObjectRequest {
        path: full_path,
        content_type: content_type_from_headers(&headers),
        modtime: modtime_from_headers(&headers),
        meta: meta_from_headers(&headers),
        if_not_exists,
    };

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| io::Error::other(err.to_string())));

    let obj = state.manager.create_object(&name, req, Box::pin(stream)).await?;

    let resolved_ct = content_type::resolve_for_response(&obj.content_type, &[], &obj.path);
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::CREATED;
    set_object_headers(response.headers_mut(), &obj, &resolved_ct);
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    recursive: bool,
}

/// `DELETE /{name}/{path...}` — single object, or `?recursive=true` for a
/// bulk prefix delete.
pub async fn delete_object(
    State(state): State<AppState>,
    Path((name, path)): Path<(String, String)>,
    Query(q): Query<DeleteQuery>,
) -> Result<Response, AppError> {
    let full_path = clean(&format!("/{path}"));

    if q.recursive {
        let deleted = state
            .manager
            .delete_objects(&name, DeleteObjectsRequest { path: full_path, recursive: true })
            .await?;
        Ok((StatusCode::OK, axum::Json(deleted)).into_response())
    } else {
        let deleted = state
            .manager
            .delete_object(&name, DeleteObjectRequest { path: full_path })
            .await?;
        Ok((StatusCode::OK, axum::Json(deleted)).into_response())
    }
}

/// Where a multipart POST's parts land: the directory they're uploaded
/// into, and whether more than one part is allowed at all.
struct UploadTarget {
    dir: String,
    is_directory: bool,
}

fn resolve_upload_target(full_path: &str, raw_path: &str) -> UploadTarget {
    let is_directory = raw_path.is_empty() || raw_path == "/" || raw_path.ends_with('/');
    UploadTarget { dir: clean(full_path), is_directory }
}

fn part_object_path(target: &UploadTarget, resolved_name: Option<&str>) -> Result<String, FilerError> {
    if target.is_directory {
        let name = resolved_name
            .ok_or_else(|| FilerError::bad_request("multipart part is missing a filename"))?;
        Ok(clean(&format!("{}/{}", target.dir.trim_end_matches('/'), name)))
    } else {
        Ok(target.dir.clone())
    }
}

fn part_filename<'a>(headers: &'a HeaderMap, file_name: Option<&'a str>) -> Option<&'a str> {
    headers
        .get("x-path")
        .and_then(|v| v.to_str().ok())
        .or(file_name)
}

struct ProgressStream<S> {
    inner: S,
    written: u64,
    last_emitted: u64,
    tx: mpsc::UnboundedSender<u64>,
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, axum::extract::multipart::MultipartError>> + Unpin,
{
    type Item = Result<Bytes, axum::extract::multipart::MultipartError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(Some(Ok(ref bytes))) = poll {
            self.written += bytes.len() as u64;
            if self.written - self.last_emitted >= PROGRESS_CHUNK {
                self.last_emitted = self.written;
                let _ = self.tx.send(self.written);
            }
        }
        poll
    }
}

/// Deletes every already-committed object when a later file fails,
/// joining any deletion errors to the originating error (§4.3 "Rollback
/// contract").
async fn rollback_and_join(state: &AppState, name: &str, committed: Vec<Object>, original: FilerError) -> FilerError {
    let mut messages = vec![original.message.clone()];
    for obj in committed {
        if let Err(e) = state
            .manager
            .delete_object(name, DeleteObjectRequest { path: obj.path.clone() })
            .await
        {
            messages.push(format!("rollback of {} failed: {e}", obj.path));
        }
    }
    FilerError::new(original.kind, messages.join("; "))
}

/// Streamed, rollback-on-failure commit shared by JSON and SSE upload
/// modes; `on_event` is invoked for every `file`/`complete` transition so
/// both modes can drive off the same loop.
async fn commit_multipart(
    state: &AppState,
    name: &str,
    target: UploadTarget,
    mut multipart: Multipart,
    mut on_event: impl FnMut(UploadEvent),
) -> Result<Vec<Object>, FilerError> {
    let mut committed: Vec<Object> = Vec::new();
    let mut index = 0usize;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return Err(rollback_and_join(state, name, committed, FilerError::bad_request(e.to_string())).await);
            }
        };

        if index >= 1 && !target.is_directory {
            return Err(rollback_and_join(
                state,
                name,
                committed,
                FilerError::bad_request("multipart upload targets a single file; only one part is allowed"),
            )
            .await);
        }

        let headers = field.headers().clone();
        let file_name = field.file_name().map(str::to_string);
        let object_path = match part_object_path(&target, part_filename(&headers, file_name.as_deref())) {
            Ok(p) => p,
            Err(e) => return Err(rollback_and_join(state, name, committed, e).await),
        };

        on_event(UploadEvent::File(FilePayload { index, path: object_path.clone(), written: 0, bytes: None }));

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<u64>();
        let inner: Pin<Box<dyn Stream<Item = Result<Bytes, axum::extract::multipart::MultipartError>> + Send>> =
            Box::pin(field);
        let progress = ProgressStream { inner, written: 0, last_emitted: 0, tx: progress_tx };
        let body_stream: filegate_core::BodyStream =
            Box::pin(progress.map(|chunk| chunk.map_err(|e| io::Error::other(e.to_string()))));

        let req = CreateObjectRequest {
            path: object_path.clone(),
            content_type: content_type_from_headers(&headers),
            modtime: modtime_from_headers(&headers),
            meta: meta_from_headers(&headers),
            if_not_exists: false,
        };

        let path_for_progress = object_path.clone();
        let commit_fut = state.manager.create_object(name, req, body_stream);
        tokio::pin!(commit_fut);

        let mut channel_open = true;
        let result = loop {
            if !channel_open {
                break (&mut commit_fut).await;
            }
            tokio::select! {
                written = progress_rx.recv() => {
                    match written {
                        Some(written) => on_event(UploadEvent::File(FilePayload {
                            index,
                            path: path_for_progress.clone(),
                            written,
                            bytes: None,
                        })),
                        None => channel_open = false,
                    }
                }
                result = &mut commit_fut => break result,
            }
        };

        match result {
            Ok(obj) => {
                on_event(UploadEvent::Complete(Box::new(obj.clone())));
                committed.push(obj);
            }
            Err(e) => {
                let joined = rollback_and_join(state, name, committed, e).await;
                let message = joined.message.clone();
                on_event(UploadEvent::Error(ErrorPayload { index, path: object_path, message }));
                return Err(joined);
            }
        }

        index += 1;
    }

    Ok(committed)
}

fn files_hint(headers: &HeaderMap) -> Option<usize> {
    headers
        .get("x-upload-count")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn wants_sse(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

async fn upload(
    state: AppState,
    name: String,
    full_path: String,
    raw_path: &str,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let target = resolve_upload_target(&full_path, raw_path);

    if wants_sse(&headers) {
        let (tx, rx) = mpsc::unbounded_channel::<UploadEvent>();
        let files = files_hint(&headers);

        tokio::spawn(async move {
            let _ = tx.send(UploadEvent::Start(StartPayload { files: files.unwrap_or(0), bytes: None }));
            let emit_tx = tx.clone();
            let result = commit_multipart(&state, &name, target, multipart, |ev| {
                let _ = emit_tx.send(ev);
            })
            .await;
            if let Ok(committed) = result {
                let bytes = committed.iter().map(|o| o.size).sum();
                let _ = tx.send(UploadEvent::Done(DonePayload { files: committed.len(), bytes }));
            }
        });

        let stream = UnboundedReceiverStream::new(rx).map(|ev| {
            Ok::<_, std::convert::Infallible>(
                Event::default().event(ev.name()).data(ev.payload_json().unwrap_or_default()),
            )
        });
        let sse = Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default());
        return Ok(([("x-accel-buffering", "no")], sse).into_response());
    }

    let committed = commit_multipart(&state, &name, target, multipart, |_| {}).await?;
    Ok((StatusCode::CREATED, axum::Json(committed)).into_response())
}

/// `POST /{name}` — multipart upload to the backend root.
pub async fn upload_root(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, AppError> {
    upload(state, name, "/".to_string(), "/", headers, multipart).await
}

/// `POST /{name}/{path...}` — multipart upload into a directory, or a
/// single-part replace of the exact file at `path`.
pub async fn upload_into(
    State(state): State<AppState>,
    Path((name, path)): Path<(String, String)>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let full_path = clean(&format!("/{path}"));
    upload(state, name, full_path, &path, headers, multipart).await
}
