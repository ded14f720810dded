// src/path.rs
//! Slash-delimited path helpers shared by the controller, the proxy engine
//! and the parameter tree. Leading and trailing slashes are not significant.

/// Trim leading and trailing slashes.
pub fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

/// Split a path into its non-empty segments.
pub fn segments(path: &str) -> Vec<&str> {
    normalize(path)
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Split a path into `(selector, remainder)` on the first slash.
///
/// The remainder is passed down unmodified apart from normalization, so
/// `"proxy/peer/state/"` becomes `("proxy", "peer/state")`.
pub fn split_selector(path: &str) -> (&str, &str) {
    let path = normalize(path);
    match path.split_once('/') {
        Some((selector, remainder)) => (selector, normalize(remainder)),
        None => (path, ""),
    }
}

/// Join a parent path and a child path, skipping empty parts.
pub fn join(parent: &str, child: &str) -> String {
    match (normalize(parent), normalize(child)) {
        ("", child) => child.to_string(),
        (parent, "") => parent.to_string(),
        (parent, child) => format!("{}/{}", parent, child),
    }
}
