//! Backend configuration: the named, schemed endpoint a manager dispatches
//! requests to (§3 "Backend").

use serde::{Deserialize, Serialize};

use crate::error::FilerError;

/// One of the four storage drivers this gateway fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    File,
    Mem,
    S3,
    Gs,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::File => "file",
            Scheme::Mem => "mem",
            Scheme::S3 => "s3",
            Scheme::Gs => "gs",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "file" => Some(Scheme::File),
            "mem" => Some(Scheme::Mem),
            "s3" => Some(Scheme::S3),
            "gs" => Some(Scheme::Gs),
            _ => None,
        }
    }
}

/// A configured endpoint, as parsed from a `<scheme>://<name>[/<prefix>]`
/// command-line/config flag (§6 "Backend URL syntax").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendUrl {
    pub scheme: Scheme,
    pub name: String,
    /// For `file`: the local root directory (must be absolute).
    /// For others: the optional bucket prefix (empty string if none given).
    pub path: String,
}

/// Backend names must match `[A-Za-z][A-Za-z0-9_-]{0,63}` (§3 invariant).
pub fn is_valid_backend_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() {
        return false;
    }
    if name.len() > 64 {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl BackendUrl {
    /// Parse `<scheme>://<name>[/<prefix>]`.
    pub fn parse(spec: &str) -> Result<Self, FilerError> {
        let (scheme_raw, rest) = spec
            .split_once("://")
            .ok_or_else(|| FilerError::bad_request(format!("backend spec `{spec}` missing `://`")))?;
        let scheme = Scheme::parse(scheme_raw)
            .ok_or_else(|| FilerError::bad_request(format!("unknown backend scheme `{scheme_raw}`")))?;

        let (name, path) = match rest.split_once('/') {
            Some((name, path)) => (name, format!("/{path}")),
            None => (rest, String::new()),
        };
        if name.is_empty() {
            return Err(FilerError::bad_request(format!(
                "backend spec `{spec}` missing a name between `://` and `/`"
            )));
        }

        if !is_valid_backend_name(name) {
            return Err(FilerError::bad_request(format!(
                "invalid backend name `{name}`"
            )));
        }

        if scheme == Scheme::File && !path.starts_with('/') {
            return Err(FilerError::bad_request(format!(
                "file backend `{name}` requires an absolute root path"
            )));
        }

        Ok(BackendUrl {
            scheme,
            name: name.to_string(),
            path,
        })
    }

    /// Non-filesystem schemes carry their `path` as a bucket prefix with no
    /// leading or trailing slash.
    pub fn bucket_prefix(&self) -> String {
        self.path.trim_matches('/').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_file_backend_without_name() {
        // A file spec must still carry a name segment before the root path.
        assert!(BackendUrl::parse("file:///var/data/store").is_err());
    }

    #[test]
    fn parses_file_backend_single_segment_name() {
        let url = BackendUrl::parse("file://local/srv/data").unwrap();
        assert_eq!(url.scheme, Scheme::File);
        assert_eq!(url.name, "local");
        assert_eq!(url.path, "/srv/data");
    }

    #[test]
    fn parses_mem_backend_with_no_prefix() {
        let url = BackendUrl::parse("mem://testbucket").unwrap();
        assert_eq!(url.scheme, Scheme::Mem);
        assert_eq!(url.name, "testbucket");
        assert_eq!(url.bucket_prefix(), "");
    }

    #[test]
    fn parses_s3_backend_with_prefix() {
        let url = BackendUrl::parse("s3://media/uploads").unwrap();
        assert_eq!(url.scheme, Scheme::S3);
        assert_eq!(url.name, "media");
        assert_eq!(url.bucket_prefix(), "uploads");
    }

    #[test]
    fn parses_gcs_backend() {
        let url = BackendUrl::parse("gs://archive").unwrap();
        assert_eq!(url.scheme, Scheme::Gs);
        assert_eq!(url.bucket_prefix(), "");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(BackendUrl::parse("ftp://x").is_err());
    }

    #[test]
    fn rejects_invalid_name() {
        assert!(BackendUrl::parse("mem://1bad").is_err());
        assert!(BackendUrl::parse("mem://has space").is_err());
    }

    #[test]
    fn backend_name_validation() {
        assert!(is_valid_backend_name("a"));
        assert!(is_valid_backend_name("testbucket"));
        assert!(is_valid_backend_name("a-b_c9"));
        assert!(!is_valid_backend_name(""));
        assert!(!is_valid_backend_name("9start"));
        assert!(!is_valid_backend_name("has space"));
    }
}
