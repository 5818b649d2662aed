//! URL scheme (§4.3, §6):
//!
//! ```text
//! GET    /                         backend list
//! GET    /{name}                   list objects at backend root
//! POST   /{name}                   multipart upload to backend root
//! GET    /{name}/{path...}         stream body + X-Object-Meta
//! HEAD   /{name}/{path...}         headers only
//! PUT    /{name}/{path...}         single object
//! POST   /{name}/{path...}         multipart upload into a directory
//! DELETE /{name}/{path...}         single or, with ?recursive=, bulk delete
//! ```

use axum::{middleware::from_fn, routing::get, Router};

use crate::handlers::health_handlers::{healthz, readyz};
use crate::handlers::object_handlers::{
    delete_object, get_object, head_object, list_backends, list_objects, put_object, upload_into,
    upload_root,
};
use crate::middleware::request_id_layer;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/", get(list_backends))
        .route("/{name}", get(list_objects).post(upload_root))
        .route(
            "/{name}/{*path}",
            get(get_object)
                .head(head_object)
                .put(put_object)
                .post(upload_into)
                .delete(delete_object),
        )
        .layer(from_fn(request_id_layer))
}
