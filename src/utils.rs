use http::Method;
use std::str::FromStr;

/// Verbs a route can be registered for, in the order they are probed when
/// looking for an alternative route on the same path
pub(crate) const VERBS: [Method; 9] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
    Method::HEAD,
    Method::OPTIONS,
    Method::CONNECT,
    Method::TRACE,
];

pub trait MethodExtension {
    fn any() -> Self;
    fn is_any(&self) -> bool;
}

impl MethodExtension for Method {
    /// Represent a method for which any Http method will be accepted
    #[inline]
    fn any() -> Self {
        Method::from_str("ANY").expect("This is a valid method str")
    }

    fn is_any(&self) -> bool {
        self.as_str() == "ANY" || self.as_str() == "*"
    }
}

/// Collapse repeated slashes, ensure a leading slash and strip the trailing
/// one (except for the root path)
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }

    if normalized.is_empty() {
        normalized.push('/');
    }

    normalized
}

/// Remove the application context path from `path`. Returns `None` when the
/// path lives outside of the context path.
pub fn strip_context_path<'a>(context_path: &str, path: &'a str) -> Option<&'a str> {
    if context_path == "/" || context_path.is_empty() {
        return Some(path);
    }

    match path.strip_prefix(context_path) {
        Some("") => Some("/"),
        Some(rest) if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("//a///b/"), "/a/b");
        assert_eq!(normalize_path("a/b"), "/a/b");
    }

    #[test]
    fn context_path() {
        assert_eq!(strip_context_path("/", "/a"), Some("/a"));
        assert_eq!(strip_context_path("/app", "/app"), Some("/"));
        assert_eq!(strip_context_path("/app", "/app/a"), Some("/a"));
        assert_eq!(strip_context_path("/app", "/application"), None);
        assert_eq!(strip_context_path("/app", "/other"), None);
    }

    #[test]
    fn any_method() {
        assert!(Method::any().is_any());
        assert!(!Method::GET.is_any());
    }
}
