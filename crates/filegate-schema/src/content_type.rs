//! Content-Type resolution shared by the HTTP handlers (GET response) and
//! the bulk client (upload request). Both sides need the same priority
//! order so a file uploaded without an explicit type round-trips to the
//! same guess on read (§4.3 "Content-Type resolution").

/// The hardcoded fallback used when nothing else identifies a type.
pub const BINARY_FALLBACK: &str = "application/octet-stream";

/// Extensions the OS MIME database tends to miss, mapped explicitly so
/// source files don't all collapse to the binary fallback.
const EXT_OVERRIDES: &[(&str, &str)] = &[
    ("rs", "text/x-rust"),
    ("go", "text/x-go"),
    ("py", "text/x-python"),
    ("rb", "text/x-ruby"),
    ("ts", "text/typescript"),
    ("tsx", "text/typescript"),
    ("jsx", "text/javascript"),
    ("toml", "text/x-toml"),
    ("yaml", "text/yaml"),
    ("yml", "text/yaml"),
    ("md", "text/markdown"),
    ("sh", "text/x-shellscript"),
    ("sql", "text/x-sql"),
    ("proto", "text/x-protobuf"),
];

/// Guess a Content-Type from a path's extension, checking the well-known
/// override table before falling back to the OS MIME database.
pub fn guess_from_path(path: &str) -> Option<String> {
    let ext = path.rsplit('/').next().unwrap_or(path).rsplit('.').next()?;
    if ext == path || ext.is_empty() {
        return None;
    }
    let lower = ext.to_ascii_lowercase();
    if let Some((_, mime)) = EXT_OVERRIDES.iter().find(|(e, _)| *e == lower) {
        return Some((*mime).to_string());
    }
    mime_guess::from_ext(&lower).first().map(|m| m.to_string())
}

/// Sniff a Content-Type from the first bytes of a body (at most 512, per
/// the conventional sniffing window).
pub fn sniff_from_bytes(head: &[u8]) -> Option<String> {
    let window = &head[..head.len().min(512)];
    infer::get(window).map(|kind| kind.mime_type().to_string())
}

/// Full GET-response resolution order (§4.3):
/// 1. stored type, unless it's the binary fallback
/// 2. sniffed from the first 512 bytes
/// 3. guessed from the path extension
/// 4. stored type as-is
/// 5. hardcoded fallback
pub fn resolve_for_response(stored: &str, head: &[u8], path: &str) -> String {
    if !stored.is_empty() && stored != BINARY_FALLBACK {
        return stored.to_string();
    }
    if let Some(sniffed) = sniff_from_bytes(head) {
        return sniffed;
    }
    if let Some(guessed) = guess_from_path(path) {
        return guessed;
    }
    if !stored.is_empty() {
        return stored.to_string();
    }
    BINARY_FALLBACK.to_string()
}

/// Upload-side resolution used by the bulk client when a file carries no
/// explicit type: extension lookup first, then a sniff of the bytes
/// already buffered for the progress reader, falling back to the binary
/// default.
pub fn resolve_for_upload(path: &str, head: &[u8]) -> String {
    guess_from_path(path)
        .or_else(|| sniff_from_bytes(head))
        .unwrap_or_else(|| BINARY_FALLBACK.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_override_beats_os_database() {
        assert_eq!(guess_from_path("/src/main.rs").as_deref(), Some("text/x-rust"));
    }

    #[test]
    fn falls_back_to_mime_guess_for_common_types() {
        assert_eq!(guess_from_path("/a/b.png").as_deref(), Some("image/png"));
    }

    #[test]
    fn no_extension_returns_none() {
        assert_eq!(guess_from_path("/a/Makefile"), None);
    }

    #[test]
    fn sniffs_png_signature() {
        let png_header = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        assert_eq!(sniff_from_bytes(&png_header).as_deref(), Some("image/png"));
    }

    #[test]
    fn response_resolution_prefers_stored_type() {
        let resolved = resolve_for_response("text/plain", b"hello", "/a.txt");
        assert_eq!(resolved, "text/plain");
    }

    #[test]
    fn response_resolution_falls_through_to_sniff_then_extension() {
        let png_header = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        let resolved = resolve_for_response(BINARY_FALLBACK, &png_header, "/a.bin");
        assert_eq!(resolved, "image/png");
    }

    #[test]
    fn response_resolution_falls_back_to_extension_when_sniff_fails() {
        let resolved = resolve_for_response("", b"plain text body", "/a.rs");
        assert_eq!(resolved, "text/x-rust");
    }

    #[test]
    fn response_resolution_hardcoded_fallback() {
        let resolved = resolve_for_response("", b"\x00\x01", "/a.unknownext");
        assert_eq!(resolved, BINARY_FALLBACK);
    }
}
