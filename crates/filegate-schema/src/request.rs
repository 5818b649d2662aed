//! Request/response records for the blob backend contract (§3).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::object::Object;

/// Backends accept paging but always return the full matching set; the
/// manager (§4.2) performs the actual slicing. `MaxListLimit` bounds the
/// manager's slice regardless of what a caller asks for.
pub const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct CreateObjectRequest {
    pub path: String,
    pub content_type: Option<String>,
    pub modtime: Option<DateTime<Utc>>,
    pub meta: BTreeMap<String, String>,
    /// Reject with `Conflict` if an object already exists at `path`.
    pub if_not_exists: bool,
}

impl CreateObjectRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content_type: None,
            modtime: None,
            meta: BTreeMap::new(),
            if_not_exists: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GetObjectRequest {
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct ReadObjectRequest {
    pub path: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListObjectsRequest {
    pub path: String,
    pub recursive: bool,
    pub offset: usize,
    /// `0` means count-only: the manager nils the body but still reports
    /// `Count`.
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListObjectsResponse {
    /// Total matching objects before offset/limit was applied.
    pub count: usize,
    /// `None` when `limit == 0` (count-only request).
    pub body: Option<Vec<Object>>,
}

#[derive(Debug, Clone)]
pub struct DeleteObjectRequest {
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct DeleteObjectsRequest {
    pub path: String,
    pub recursive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_defaults_are_permissive() {
        let req = CreateObjectRequest::new("/a.txt");
        assert!(!req.if_not_exists);
        assert!(req.meta.is_empty());
        assert!(req.modtime.is_none());
    }
}
