//! Streaming multipart encoding for the bulk upload request (§4.4
//! operation 3): every file handle stays open until the HTTP round trip
//! completes, since the body is encoded lazily part-by-part rather than
//! assembled up front.

use reqwest::header::{HeaderMap, HeaderValue};
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

use filegate_schema::content_type;

use crate::error::ClientError;
use crate::walk::WalkEntry;

/// Builds one multipart `Form` covering every surviving file. `X-Path` is
/// attached to each part so the server recovers the full sub-directory
/// path instead of the RFC 7578-truncated basename (§4.3 "Filename
/// resolution").
pub async fn build_form(files: &[WalkEntry]) -> Result<reqwest::multipart::Form, ClientError> {
    let mut form = reqwest::multipart::Form::new();
    for entry in files {
        let mut file = tokio::fs::File::open(&entry.local_path).await?;

        let mut head = vec![0u8; 512];
        let mut filled = 0;
        while filled < head.len() {
            let n = file.read(&mut head[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        head.truncate(filled);
        file.seek(SeekFrom::Start(0)).await?;

        let resolved_ct = content_type::resolve_for_upload(&entry.rel_path, &head);
        let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file));

        let mut part = reqwest::multipart::Part::stream_with_length(body, entry.size)
            .file_name(basename(&entry.rel_path).to_string());
        part = part
            .mime_str(&resolved_ct)
            .map_err(|e| ClientError::Joined(format!("invalid content type `{resolved_ct}`: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert("x-path", HeaderValue::from_str(&format!("/{}", entry.rel_path))
            .map_err(|e| ClientError::Joined(format!("invalid X-Path for `{}`: {e}", entry.rel_path)))?);
        if let Some(modtime) = entry.modtime {
            if let Ok(v) = HeaderValue::from_str(&modtime.to_rfc2822()) {
                headers.insert(reqwest::header::LAST_MODIFIED, v);
            }
        }
        part = part.headers(headers);

        form = form.part(entry.rel_path.clone(), part);
    }
    Ok(form)
}

fn basename(rel_path: &str) -> &str {
    rel_path.rsplit('/').next().unwrap_or(rel_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn basename_extracts_last_segment() {
        assert_eq!(basename("sub/dir/file.txt"), "file.txt");
        assert_eq!(basename("file.txt"), "file.txt");
    }

    #[tokio::test]
    async fn build_form_opens_every_entry_without_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"world").unwrap();

        let entries = vec![
            WalkEntry {
                rel_path: "a.txt".into(),
                local_path: dir.path().join("a.txt"),
                size: 5,
                modtime: None,
            },
            WalkEntry {
                rel_path: "sub/b.txt".into(),
                local_path: dir.path().join("sub/b.txt"),
                size: 5,
                modtime: None,
            },
        ];

        build_form(&entries).await.unwrap();
    }
}
