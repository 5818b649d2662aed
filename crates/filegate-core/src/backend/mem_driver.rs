//! `mem` scheme: an in-process flat keyspace, useful for tests and for
//! ephemeral scratch backends (§3 "Backend").

use std::collections::BTreeMap;
use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use filegate_schema::FilerError;
use futures::StreamExt;

use crate::backend::{DriverAttrs, FlatDriver};
use crate::body::{BodyStream, ObjectReader};

struct Entry {
    bytes: Bytes,
    content_type: String,
    meta: BTreeMap<String, String>,
    etag: String,
    modtime: DateTime<Utc>,
}

impl Entry {
    fn attrs(&self) -> DriverAttrs {
        DriverAttrs {
            size: self.bytes.len() as u64,
            modtime: Some(self.modtime),
            etag: self.etag.clone(),
            content_type: self.content_type.clone(),
            meta: self.meta.clone(),
        }
    }
}

/// A `DashMap`-backed store; every key maps to its full payload in RAM.
/// No phantom markers are ever created internally, but the generic
/// [`FlatBackend`](crate::backend::FlatBackend) phantom-directory check
/// still guards against a real object shadowing a key namespace that
/// other objects live under.
pub struct MemDriver {
    entries: DashMap<String, Entry>,
}

impl MemDriver {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl Default for MemDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FlatDriver for MemDriver {
    fn scheme_name(&self) -> &'static str {
        "mem"
    }

    async fn put(
        &self,
        key: &str,
        mut body: BodyStream,
        content_type: Option<&str>,
        meta: &BTreeMap<String, String>,
    ) -> Result<DriverAttrs, FilerError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(FilerError::from)?;
            buf.extend_from_slice(&chunk);
        }
        let bytes = buf.freeze();
        let etag = format!("{:x}", md5::compute(&bytes));
        let entry = Entry {
            bytes,
            content_type: content_type.unwrap_or_default().to_string(),
            meta: meta.clone(),
            etag,
            modtime: Utc::now(),
        };
        let attrs = entry.attrs();
        self.entries.insert(key.to_string(), entry);
        Ok(attrs)
    }

    async fn attributes(&self, key: &str) -> Result<Option<DriverAttrs>, FilerError> {
        Ok(self.entries.get(key).map(|e| e.attrs()))
    }

    async fn get_stream(&self, key: &str) -> Result<(ObjectReader, DriverAttrs), FilerError> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| FilerError::not_found(format!("no object at key `{key}`")))?;
        let attrs = entry.attrs();
        let bytes = entry.bytes.clone();
        drop(entry);
        let stream = futures::stream::once(async move { Ok::<_, io::Error>(bytes) });
        let reader = tokio_util::io::StreamReader::new(stream);
        Ok((Box::pin(reader), attrs))
    }

    async fn list(
        &self,
        prefix: &str,
        limit: Option<usize>,
    ) -> Result<Vec<(String, DriverAttrs)>, FilerError> {
        let mut matches: Vec<(String, DriverAttrs)> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().attrs()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some(limit) = limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn delete(&self, key: &str) -> Result<(), FilerError> {
        match self.entries.remove(key) {
            Some(_) => Ok(()),
            None => Err(FilerError::not_found(format!("no object at key `{key}`"))),
        }
    }
}
