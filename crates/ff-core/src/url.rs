//! URL normalization utilities for site matching
//!
//! Rules and locations go through the same normalization so that they can be
//! compared as plain strings.

// =============================================================================
// Scheme Handling
// =============================================================================

/// Schemes that belong to the extension's own privileged surface.
pub const INTERNAL_SCHEMES: &[&str] = &[
    "chrome-extension://",
    "moz-extension://",
    "safari-web-extension://",
    "extension://",
];

/// Strip a leading `http://` or `https://`, ignoring case.
#[inline]
pub fn strip_web_scheme(url: &str) -> &str {
    let bytes = url.as_bytes();
    if bytes.len() >= 8 && bytes[..8].eq_ignore_ascii_case(b"https://") {
        &url[8..]
    } else if bytes.len() >= 7 && bytes[..7].eq_ignore_ascii_case(b"http://") {
        &url[7..]
    } else {
        url
    }
}

/// Position after "://", if the URL has one.
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let colon_pos = url.find(':')?;
    if url[colon_pos..].starts_with("://") {
        Some(colon_pos + 3)
    } else {
        None
    }
}

/// Whether `location` points into the extension itself.
pub fn is_internal_location(location: &str) -> bool {
    let trimmed = location.trim_start();
    INTERNAL_SCHEMES.iter().any(|scheme| {
        trimmed.len() >= scheme.len()
            && trimmed.as_bytes()[..scheme.len()].eq_ignore_ascii_case(scheme.as_bytes())
    })
}

// =============================================================================
// Normalization
// =============================================================================

/// Normalize a rule or a location.
///
/// Lowercase, strip `http://`/`https://`, strip a leading `www.`, strip one
/// trailing `/`.
pub fn normalize_site(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    let rest = strip_web_scheme(&lowered);
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    rest.to_string()
}

// =============================================================================
// Host Extraction
// =============================================================================

/// Start and end of the host inside a scheme-less string.
#[inline]
pub fn get_host_position(rest: &str) -> (usize, usize) {
    let bytes = rest.as_bytes();

    // Skip userinfo
    let mut host_start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'@' {
            host_start = i + 1;
            break;
        }
        if b == b'/' || b == b'?' || b == b'#' {
            break;
        }
    }

    let mut host_end = bytes.len();
    for (i, &b) in bytes[host_start..].iter().enumerate() {
        if b == b'/' || b == b'?' || b == b'#' || b == b':' {
            host_end = host_start + i;
            break;
        }
    }

    (host_start, host_end)
}

/// Host component of an already normalized location.
#[inline]
pub fn normalized_host(normalized: &str) -> &str {
    let (start, end) = get_host_position(normalized);
    &normalized[start..end]
}

/// Host of a full URL, without port or userinfo.
pub fn extract_host(url: &str) -> Option<&str> {
    let scheme_end = get_scheme_end(url)?;
    let rest = &url[scheme_end..];
    let (start, end) = get_host_position(rest);
    let host = &rest[start..end];
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}
