//! RFC 7232 precondition evaluation (§4.3), implemented exactly once and
//! shared by the GET/HEAD/PUT object handlers.
//!
//! Must run before the response body (or, for PUT, the backend write) is
//! opened, so a 304/412 outcome never touches a stream.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use filegate_schema::{FilerError, Object};

pub(crate) fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// One comma-separated entry of an `If-Match`/`If-None-Match` header value.
struct EtagSpec<'a> {
    weak: bool,
    value: &'a str,
}

fn parse_etag_list(raw: &str) -> Vec<EtagSpec<'_>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|spec| {
            if let Some(rest) = spec.strip_prefix("W/") {
                EtagSpec { weak: true, value: rest.trim_matches('"') }
            } else {
                EtagSpec { weak: false, value: spec.trim_matches('"') }
            }
        })
        .collect()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `If-Match` evaluation: 412 unless a *strong* comparison matches, or the
/// header is the literal wildcard `*` and the object has a non-empty ETag.
fn if_match_satisfied(raw: &str, etag: &str) -> bool {
    if raw.trim() == "*" {
        return !etag.is_empty();
    }
    parse_etag_list(raw)
        .iter()
        .any(|spec| !spec.weak && spec.value == etag)
}

/// `If-None-Match` evaluation: weak comparison, so a `W/` prefix on either
/// side is ignored once stripped.
fn if_none_match_satisfied(raw: &str, etag: &str) -> bool {
    if raw.trim() == "*" {
        return !etag.is_empty();
    }
    parse_etag_list(raw).iter().any(|spec| spec.value == etag)
}

/// Evaluate the conditional-request headers against the current state of
/// `current` (the object as it exists right now, pre-write for PUT, the
/// fetched metadata for GET/HEAD).
///
/// `read_semantics` gates `If-None-Match`/`If-Modified-Since`: those two
/// only produce a 304 outcome on GET/HEAD (§4.3 step 3/4); PUT stops after
/// steps 1/2 and handles `If-None-Match: *` itself as the `if_not_exists`
/// flag rather than through this evaluator.
pub fn evaluate(headers: &HeaderMap, current: &Object, read_semantics: bool) -> Result<(), FilerError> {
    if let Some(raw) = header_str(headers, "if-match") {
        if !if_match_satisfied(raw, &current.etag) {
            return Err(FilerError::precondition_failed("If-Match did not match current ETag"));
        }
        // Passed: RFC 7232 §6 continues on to step 3, it does not return early.
    } else if let Some(raw) = header_str(headers, "if-unmodified-since") {
        if let Some(header_time) = parse_http_date(raw) {
            if let Some(modtime) = current.effective_modtime() {
                if modtime > header_time {
                    return Err(FilerError::precondition_failed(
                        "If-Unmodified-Since precondition failed",
                    ));
                }
            }
        }
        // Passed: fall through to step 3, same as the If-Match case above.
    }

    if read_semantics {
        if let Some(raw) = header_str(headers, "if-none-match") {
            return if if_none_match_satisfied(raw, &current.etag) {
                Err(FilerError::not_modified())
            } else {
                Ok(())
            };
        }

        if let Some(raw) = header_str(headers, "if-modified-since") {
            if let Some(header_time) = parse_http_date(raw) {
                if let Some(modtime) = current.effective_modtime() {
                    if modtime <= header_time {
                        return Err(FilerError::not_modified());
                    }
                }
            }
            return Ok(());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn object_with_etag(etag: &str) -> Object {
        let mut obj = Object::new("b", "/a.txt");
        obj.etag = etag.to_string();
        obj
    }

    #[test]
    fn if_match_wildcard_passes_when_etag_present() {
        let mut headers = HeaderMap::new();
        headers.insert("if-match", HeaderValue::from_static("*"));
        assert!(evaluate(&headers, &object_with_etag("abc"), true).is_ok());
    }

    #[test]
    fn if_match_mismatch_is_precondition_failed() {
        let mut headers = HeaderMap::new();
        headers.insert("if-match", HeaderValue::from_static("\"xyz\""));
        let err = evaluate(&headers, &object_with_etag("abc"), true).unwrap_err();
        assert_eq!(err.kind, filegate_schema::ErrorKind::PreconditionFailed);
    }

    #[test]
    fn if_match_weak_etag_never_matches() {
        let mut headers = HeaderMap::new();
        headers.insert("if-match", HeaderValue::from_static("W/\"abc\""));
        let err = evaluate(&headers, &object_with_etag("abc"), true).unwrap_err();
        assert_eq!(err.kind, filegate_schema::ErrorKind::PreconditionFailed);
    }

    #[test]
    fn if_none_match_weak_match_yields_not_modified_on_read() {
        let mut headers = HeaderMap::new();
        headers.insert("if-none-match", HeaderValue::from_static("\"abc\""));
        let err = evaluate(&headers, &object_with_etag("abc"), true).unwrap_err();
        assert_eq!(err.kind, filegate_schema::ErrorKind::NotModified);
    }

    #[test]
    fn if_none_match_ignored_when_not_read_semantics() {
        let mut headers = HeaderMap::new();
        headers.insert("if-none-match", HeaderValue::from_static("\"abc\""));
        assert!(evaluate(&headers, &object_with_etag("abc"), false).is_ok());
    }

    #[test]
    fn no_headers_always_passes() {
        let headers = HeaderMap::new();
        assert!(evaluate(&headers, &object_with_etag("abc"), true).is_ok());
    }

    #[test]
    fn if_match_takes_precedence_over_if_unmodified_since() {
        let mut headers = HeaderMap::new();
        headers.insert("if-match", HeaderValue::from_static("\"abc\""));
        headers.insert(
            "if-unmodified-since",
            HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"),
        );
        // If-Match matches, so If-Unmodified-Since must never be consulted.
        assert!(evaluate(&headers, &object_with_etag("abc"), true).is_ok());
    }

    #[test]
    fn if_match_pass_falls_through_to_if_none_match() {
        let mut headers = HeaderMap::new();
        headers.insert("if-match", HeaderValue::from_static("\"abc\""));
        headers.insert("if-none-match", HeaderValue::from_static("\"abc\""));
        // If-Match passes, so evaluation must continue to If-None-Match
        // rather than returning Ok(()) immediately.
        let err = evaluate(&headers, &object_with_etag("abc"), true).unwrap_err();
        assert_eq!(err.kind, filegate_schema::ErrorKind::NotModified);
    }

    #[test]
    fn if_unmodified_since_pass_falls_through_to_if_modified_since() {
        let mut obj = object_with_etag("abc");
        obj.modtime = Some(
            DateTime::parse_from_rfc2822("Wed, 09 Nov 1994 08:49:37 GMT")
                .unwrap()
                .with_timezone(&Utc),
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            "if-unmodified-since",
            HeaderValue::from_static("Thu, 10 Nov 1994 08:49:37 GMT"),
        );
        headers.insert(
            "if-modified-since",
            HeaderValue::from_static("Thu, 10 Nov 1994 08:49:37 GMT"),
        );
        let err = evaluate(&headers, &obj, true).unwrap_err();
        assert_eq!(err.kind, filegate_schema::ErrorKind::NotModified);
    }
}
