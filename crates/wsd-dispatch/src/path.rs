//! Upgrade path normalization.

use wsd_protocol::{DispatchError, DispatchResult};

/// Sanitize a configured base path.
///
/// Trims whitespace, forces a leading `/`, collapses repeated slashes and
/// drops a trailing slash, so `" v1//chat/ "` becomes `"/v1/chat"`. A blank
/// path becomes `"/"`. Every segment must be a valid URI path segment.
pub fn sanitize_base_path(raw: &str) -> DispatchResult<String> {
    let mut path = String::with_capacity(raw.len() + 1);
    for segment in raw.trim().split('/').filter(|s| !s.is_empty()) {
        validate_segment(segment)?;
        path.push('/');
        path.push_str(segment);
    }
    if path.is_empty() {
        path.push('/');
    }
    Ok(path)
}

/// Normalize the path of an incoming upgrade request for lookup.
///
/// Same slash handling as [`sanitize_base_path`], minus validation, after
/// cutting off any query string or fragment. A request path that would not
/// pass validation simply matches nothing.
pub fn normalize_request_path(raw: &str) -> String {
    let without_query = raw.split(['?', '#']).next().unwrap_or_default();
    let mut path = String::with_capacity(without_query.len() + 1);
    for segment in without_query.split('/').filter(|s| !s.is_empty()) {
        path.push('/');
        path.push_str(segment);
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

fn validate_segment(segment: &str) -> DispatchResult<()> {
    if segment == "." || segment == ".." {
        return Err(DispatchError::configuration(format!(
            "dot segment '{segment}' is not allowed in a base path"
        )));
    }

    let bytes = segment.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'%' {
            let escaped = bytes.get(i + 1..i + 3);
            if !escaped.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
                return Err(DispatchError::configuration(format!(
                    "malformed percent-escape in base path segment '{segment}'"
                )));
            }
            i += 3;
            continue;
        }
        if !is_pchar(b) {
            return Err(DispatchError::configuration(format!(
                "invalid character {:?} in base path segment '{segment}'",
                b as char
            )));
        }
        i += 1;
    }
    Ok(())
}

// RFC 3986 pchar without pct-encoded
fn is_pchar(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'-' | b'.' | b'_' | b'~' | b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+'
                | b',' | b';' | b'=' | b':' | b'@'
        )
}
