//! `file` scheme: a hierarchical backend rooted at a local directory.
//!
//! Unlike the flat schemes, the stored path IS the storage key — there is
//! no bucket-prefix transform and no phantom-directory ambiguity, because
//! the filesystem itself already disambiguates files from directories
//! (§4.1). Traversal is prevented by running every path through
//! [`path::clean`] before joining it to the root, so no `..` segment ever
//! survives to reach `std::fs`.
//!
//! The filesystem has no native slot for arbitrary user metadata or a
//! content type, so both are persisted in a JSON sidecar kept in a shadow
//! tree (`<root>/.filegate-meta/<relpath>.json`) that recursive listing
//! skips entirely. Modification time IS natively supported (`set_modified`),
//! so — unlike the flat backends — the reserved `last-modified` meta key is
//! never needed here.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use filegate_schema::{
    path, CreateObjectRequest, DeleteObjectRequest, DeleteObjectsRequest, ErrorKind, FilerError,
    GetObjectRequest, ListObjectsRequest, Object, ReadObjectRequest,
};
use futures::StreamExt;
use md5::Context;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::backend::Backend;
use crate::body::{BodyStream, ObjectReader};

const META_SHADOW_DIR: &str = ".filegate-meta";
const MAX_DELETE_PASSES: u32 = 10;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    meta: BTreeMap<String, String>,
}

pub struct FileBackend {
    name: String,
    root: PathBuf,
}

impl FileBackend {
    pub fn new(name: impl Into<String>, root: PathBuf) -> Result<Self, FilerError> {
        if !root.is_absolute() {
            return Err(FilerError::bad_request(format!(
                "file backend root `{}` must be absolute",
                root.display()
            )));
        }
        Ok(Self {
            name: name.into(),
            root,
        })
    }

    fn fs_path(&self, logical_path: &str) -> PathBuf {
        let cleaned = path::clean(logical_path);
        let trimmed = path::trim_leading_slash(&cleaned);
        if trimmed.is_empty() {
            self.root.clone()
        } else {
            self.root.join(trimmed)
        }
    }

    fn sidecar_path(&self, logical_path: &str) -> PathBuf {
        let cleaned = path::clean(logical_path);
        let trimmed = path::trim_leading_slash(&cleaned);
        self.root
            .join(META_SHADOW_DIR)
            .join(format!("{trimmed}.json"))
    }

    fn logical_path(&self, fs_path: &Path) -> String {
        let rel = fs_path.strip_prefix(&self.root).unwrap_or(fs_path);
        path::clean(&format!("/{}", rel.to_string_lossy().replace('\\', "/")))
    }

    async fn read_sidecar(&self, logical_path: &str) -> Sidecar {
        let path = self.sidecar_path(logical_path);
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Sidecar::default(),
        }
    }

    async fn write_sidecar(&self, logical_path: &str, sidecar: &Sidecar) -> Result<(), FilerError> {
        let path = self.sidecar_path(logical_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec(sidecar)
            .map_err(|e| FilerError::internal(format!("serialising sidecar: {e}")))?;
        fs::write(&path, json).await?;
        Ok(())
    }

    async fn remove_sidecar(&self, logical_path: &str) {
        let path = self.sidecar_path(logical_path);
        let _ = fs::remove_file(&path).await;
    }

    async fn stat_object(&self, logical_path: &str) -> Result<Object, FilerError> {
        let fs_path = self.fs_path(logical_path);
        let metadata = fs::metadata(&fs_path).await?;
        if metadata.is_dir() {
            return Err(FilerError::bad_request(format!(
                "{logical_path} is a directory on backend `{}`",
                self.name
            )));
        }
        let sidecar = self.read_sidecar(logical_path).await;
        let modtime: Option<DateTime<Utc>> = metadata.modified().ok().map(DateTime::<Utc>::from);
        let etag = file_etag(&fs_path).await?;
        Ok(Object {
            name: self.name.clone(),
            path: logical_path.to_string(),
            size: metadata.len(),
            modtime,
            content_type: sidecar.content_type,
            etag,
            meta: sidecar.meta,
        })
    }

    /// Recursively enumerate every regular file beneath `dir`, skipping the
    /// metadata shadow tree. Returns logical paths.
    async fn walk(&self, dir: &Path) -> Result<Vec<String>, FilerError> {
        let mut out = Vec::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                if entry_path == self.root.join(META_SHADOW_DIR) {
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(entry_path);
                } else if file_type.is_file() {
                    out.push(self.logical_path(&entry_path));
                }
            }
        }
        Ok(out)
    }
}

async fn file_etag(fs_path: &Path) -> Result<String, FilerError> {
    let bytes = fs::read(fs_path).await?;
    Ok(format!("{:x}", md5::compute(&bytes)))
}

#[async_trait]
impl Backend for FileBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_object(
        &self,
        req: CreateObjectRequest,
        mut body: BodyStream,
    ) -> Result<Object, FilerError> {
        let cleaned = path::clean(&req.path);
        if cleaned == "/" {
            return Err(FilerError::bad_request("cannot create an object at the backend root"));
        }
        let fs_path = self.fs_path(&cleaned);

        if req.if_not_exists && fs::metadata(&fs_path).await.is_ok() {
            return Err(FilerError::conflict(format!(
                "{cleaned} already exists on backend `{}`",
                self.name
            )));
        }
        if let Ok(metadata) = fs::metadata(&fs_path).await {
            if metadata.is_dir() {
                return Err(FilerError::bad_request(format!(
                    "{cleaned} is a directory on backend `{}`",
                    self.name
                )));
            }
        }

        let parent = fs_path
            .parent()
            .ok_or_else(|| FilerError::bad_request(format!("{cleaned} has no parent directory")))?;
        fs::create_dir_all(parent).await?;

        let tmp_path = parent.join(format!(".filegate-tmp-{}", Uuid::new_v4()));
        let mut file = fs::File::create(&tmp_path).await?;
        let mut digest = Context::new();
        while let Some(chunk) = body.next().await {
            let chunk: Bytes = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(e.into());
                }
            };
            digest.consume(&chunk);
            if let Err(e) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(e.into());
            }
        }
        if let Err(e) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        if let Err(e) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        drop(file);

        if let Err(e) = fs::rename(&tmp_path, &fs_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        if let Some(modtime) = req.modtime {
            let target = fs_path.clone();
            let system_time: std::time::SystemTime = modtime.into();
            tokio::task::spawn_blocking(move || {
                std::fs::File::open(&target).and_then(|f| f.set_modified(system_time))
            })
            .await
            .map_err(|e| FilerError::internal(format!("set_modified join error: {e}")))??;
        }

        let sidecar = Sidecar {
            content_type: req.content_type.clone().unwrap_or_default(),
            meta: req.meta.clone(),
        };
        self.write_sidecar(&cleaned, &sidecar).await?;

        self.stat_object(&cleaned).await
    }

    async fn get_object(&self, req: GetObjectRequest) -> Result<Object, FilerError> {
        let cleaned = path::clean(&req.path);
        self.stat_object(&cleaned).await
    }

    async fn read_object(
        &self,
        req: ReadObjectRequest,
    ) -> Result<(ObjectReader, Object), FilerError> {
        let cleaned = path::clean(&req.path);
        let object = self.stat_object(&cleaned).await?;
        let fs_path = self.fs_path(&cleaned);
        let file = fs::File::open(&fs_path).await?;
        Ok((Box::pin(file), object))
    }

    async fn list_objects(&self, req: ListObjectsRequest) -> Result<Vec<Object>, FilerError> {
        let cleaned = path::clean(&req.path);
        let fs_path = self.fs_path(&cleaned);
        let metadata = match fs::metadata(&fs_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        if !metadata.is_dir() {
            return Ok(vec![self.stat_object(&cleaned).await?]);
        }

        let files = self.walk(&fs_path).await?;
        let mut out = Vec::with_capacity(files.len());
        for logical in files {
            let matches = if req.recursive {
                path::has_prefix(&logical, &cleaned)
            } else {
                path::is_immediate_child(&logical, &cleaned)
            };
            if matches {
                out.push(self.stat_object(&logical).await?);
            }
        }
        Ok(out)
    }

    async fn delete_object(&self, req: DeleteObjectRequest) -> Result<Object, FilerError> {
        let cleaned = path::clean(&req.path);
        let object = self.stat_object(&cleaned).await?;
        let fs_path = self.fs_path(&cleaned);
        match fs::remove_file(&fs_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.remove_sidecar(&cleaned).await;
        Ok(object)
    }

    async fn delete_objects(&self, req: DeleteObjectsRequest) -> Result<Vec<Object>, FilerError> {
        let mut deleted = Vec::new();
        let mut pass = 0u32;
        loop {
            pass += 1;
            let batch = self
                .list_objects(ListObjectsRequest {
                    path: req.path.clone(),
                    recursive: req.recursive,
                    offset: 0,
                    limit: usize::MAX,
                })
                .await?;
            if batch.is_empty() {
                break;
            }
            for obj in &batch {
                let fs_path = self.fs_path(&obj.path);
                match fs::remove_file(&fs_path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                self.remove_sidecar(&obj.path).await;
            }
            deleted.extend(batch);
            if pass >= MAX_DELETE_PASSES {
                tracing::warn!(
                    backend = %self.name,
                    path = %req.path,
                    "DeleteObjects hit the {MAX_DELETE_PASSES}-pass limit; store may have a lingering object"
                );
                break;
            }
        }
        Ok(deleted)
    }

    async fn close(&self) -> Result<(), FilerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filegate_schema::CreateObjectRequest;

    fn body(data: &'static str) -> BodyStream {
        crate::body::body_from_bytes(Bytes::from_static(data.as_bytes()))
    }

    fn backend(dir: &tempfile::TempDir) -> FileBackend {
        FileBackend::new("fsbucket", dir.path().to_path_buf()).unwrap()
    }

    #[tokio::test]
    async fn create_then_read_round_trips_payload_and_meta() {
        let dir = tempfile::tempdir().unwrap();
        let be = backend(&dir);

        let mut req = CreateObjectRequest::new("/sub/a.txt");
        req.content_type = Some("text/plain".to_string());
        req.meta.insert("author".to_string(), "jane".to_string());
        let created = be.create_object(req, body("hello")).await.unwrap();
        assert_eq!(created.size, 5);
        assert_eq!(created.content_type, "text/plain");
        assert_eq!(created.meta.get("author"), Some(&"jane".to_string()));

        let (mut reader, obj) = be.read_object(ReadObjectRequest { path: "/sub/a.txt".into() }).await.unwrap();
        assert_eq!(obj.size, 5);
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn modtime_is_stored_natively_not_via_reserved_meta() {
        let dir = tempfile::tempdir().unwrap();
        let be = backend(&dir);
        let modtime = DateTime::parse_from_rfc3339("2022-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let mut req = CreateObjectRequest::new("/a.txt");
        req.modtime = Some(modtime);
        let created = be.create_object(req, body("x")).await.unwrap();

        assert!(!created.meta.contains_key(filegate_schema::RESERVED_MODTIME_META_KEY));
        assert_eq!(created.modtime.map(|t| t.timestamp()), Some(modtime.timestamp()));
    }

    #[tokio::test]
    async fn if_not_exists_conflicts_on_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let be = backend(&dir);
        be.create_object(CreateObjectRequest::new("/a.txt"), body("x")).await.unwrap();

        let mut req = CreateObjectRequest::new("/a.txt");
        req.if_not_exists = true;
        let err = be.create_object(req, body("y")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn create_refuses_to_overwrite_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let be = backend(&dir);
        be.create_object(CreateObjectRequest::new("/sub/child.txt"), body("x")).await.unwrap();

        let err = be.create_object(CreateObjectRequest::new("/sub"), body("oops")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn list_skips_the_metadata_shadow_tree() {
        let dir = tempfile::tempdir().unwrap();
        let be = backend(&dir);
        be.create_object(CreateObjectRequest::new("/a.txt"), body("x")).await.unwrap();
        be.create_object(CreateObjectRequest::new("/sub/b.txt"), body("y")).await.unwrap();

        let listed = be
            .list_objects(ListObjectsRequest { path: "/".into(), recursive: true, offset: 0, limit: 0 })
            .await
            .unwrap();
        let paths: Vec<&str> = listed.iter().map(|o| o.path.as_str()).collect();
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&"/a.txt"));
        assert!(paths.contains(&"/sub/b.txt"));
        assert!(!paths.iter().any(|p| p.contains(META_SHADOW_DIR)));
    }

    #[tokio::test]
    async fn delete_removes_payload_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let be = backend(&dir);
        let mut req = CreateObjectRequest::new("/a.txt");
        req.meta.insert("k".to_string(), "v".to_string());
        be.create_object(req, body("x")).await.unwrap();

        be.delete_object(DeleteObjectRequest { path: "/a.txt".into() }).await.unwrap();

        let err = be.get_object(GetObjectRequest { path: "/a.txt".into() }).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(!be.sidecar_path("/a.txt").exists());
    }

    #[tokio::test]
    async fn root_requires_absolute_path() {
        let err = FileBackend::new("fsbucket", PathBuf::from("relative/root")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn delete_objects_recursive_clears_a_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let be = backend(&dir);
        be.create_object(CreateObjectRequest::new("/sub/a.txt"), body("a")).await.unwrap();
        be.create_object(CreateObjectRequest::new("/sub/b.txt"), body("b")).await.unwrap();

        let deleted = be
            .delete_objects(DeleteObjectsRequest { path: "/sub".into(), recursive: true })
            .await
            .unwrap();
        assert_eq!(deleted.len(), 2);

        let remaining = be
            .list_objects(ListObjectsRequest { path: "/sub".into(), recursive: true, offset: 0, limit: 0 })
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }
}
