//! The central entity: a single stored blob and its metadata.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved `meta` key used to smuggle a caller-supplied modtime through a
/// backend that has no native per-object mod-time field (see §4.1 modtime
/// override). Handlers and clients must never echo this key back to callers
/// as user metadata.
pub const RESERVED_MODTIME_META_KEY: &str = "last-modified";

/// One stored blob, as returned by every read-path operation
/// (`CreateObject`, `GetObject`, `ReadObject`, `ListObjects`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Object {
    /// Backend identifier the object belongs to.
    pub name: String,

    /// Absolute, cleaned, forward-slash-separated path starting with `/`.
    pub path: String,

    /// Size in bytes. Always non-negative.
    pub size: u64,

    /// Wall-clock last-modification time. `None` when the backend does not
    /// supply one and no `last-modified` override was recorded.
    pub modtime: Option<DateTime<Utc>>,

    /// MIME media type. Empty string when unknown.
    #[serde(default)]
    pub content_type: String,

    /// Opaque strong-consistency token. MD5 hex when the backend exposes an
    /// MD5, the backend's own opaque ETag otherwise.
    #[serde(default)]
    pub etag: String,

    /// User-defined metadata, lowercase keys, preserved verbatim.
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

impl Object {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size: 0,
            modtime: None,
            content_type: String::new(),
            etag: String::new(),
            meta: BTreeMap::new(),
        }
    }

    /// User-visible metadata: the reserved modtime key is internal and must
    /// never be handed back to a caller as though it were user metadata.
    pub fn visible_meta(&self) -> BTreeMap<String, String> {
        self.meta
            .iter()
            .filter(|(k, _)| k.as_str() != RESERVED_MODTIME_META_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Resolve the effective modtime: the RFC 3339 value stashed in
    /// `meta[last-modified]` if present (a caller-supplied override takes
    /// priority over the backend's own write-time stamp), else the `modtime`
    /// field itself, else `None`.
    pub fn effective_modtime(&self) -> Option<DateTime<Utc>> {
        self.meta
            .get(RESERVED_MODTIME_META_KEY)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .or(self.modtime)
    }

    /// The basename of `path` (last `/`-delimited segment), used for
    /// Content-Disposition filenames.
    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_meta_hides_reserved_key() {
        let mut obj = Object::new("b", "/a.txt");
        obj.meta.insert(RESERVED_MODTIME_META_KEY.into(), "2024-01-01T00:00:00Z".into());
        obj.meta.insert("author".into(), "jane".into());
        let visible = obj.visible_meta();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible.get("author"), Some(&"jane".to_string()));
    }

    #[test]
    fn effective_modtime_falls_back_to_meta() {
        let mut obj = Object::new("b", "/a.txt");
        obj.meta
            .insert(RESERVED_MODTIME_META_KEY.into(), "2024-03-05T12:00:00Z".into());
        let mt = obj.effective_modtime().expect("parsed modtime");
        assert_eq!(mt.to_rfc3339(), "2024-03-05T12:00:00+00:00");
    }

    #[test]
    fn basename_extracts_last_segment() {
        let obj = Object::new("b", "/sub/dir/file.txt");
        assert_eq!(obj.basename(), "file.txt");
    }
}
