//! # Route Matcher
//!
//! Resolves `(path, method)` to a route entry and extracts path parameters.
//!
//! The route table is an ordered list; matching scans in declaration order and
//! the first match wins, never the most specific one. Segments are literals,
//! `{name}` placeholders binding exactly one segment, or a trailing `*`
//! wildcard capturing the remaining tail.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::types::Route;

/// Result of a successful table lookup
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched route entry
    pub route: Arc<Route>,

    /// Placeholder bindings, keyed by placeholder name
    pub params: HashMap<String, String>,

    /// Inbound segments consumed by a trailing `*`, joined with `/`.
    /// `None` when the route has no tail wildcard.
    pub wildcard_tail: Option<String>,
}

/// Ordered route table
///
/// Matching is O(routes × segments); route tables here are small enough that
/// no index is warranted.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes: routes.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the first route matching the inbound path and method
    pub fn find(&self, path: &str, method: &str) -> Option<RouteMatch> {
        let segments = split_segments(path);
        self.routes.iter().find_map(|route| {
            if route.method != "*" && route.method != method {
                return None;
            }
            match_path(&route.path, &segments).map(|(params, wildcard_tail)| RouteMatch {
                route: route.clone(),
                params,
                wildcard_tail,
            })
        })
    }
}

/// Split a path on `/`, dropping leading and trailing empties
fn split_segments(path: &str) -> Vec<&str> {
    path.trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

/// Placeholder name of a `{name}` segment, if it is one
fn placeholder_name(segment: &str) -> Option<&str> {
    segment
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
}

/// Match inbound segments against a route pattern
///
/// Returns the placeholder bindings, plus the wildcard tail when the pattern
/// ends in `*`. Literal segments are case-sensitive; a placeholder never
/// consumes more than one segment.
fn match_path(
    pattern: &str,
    inbound: &[&str],
) -> Option<(HashMap<String, String>, Option<String>)> {
    let route_segments = split_segments(pattern);

    if let Some((last, prefix)) = route_segments.split_last() {
        if *last == "*" {
            if inbound.len() < prefix.len() {
                return None;
            }
            let params = bind_segments(prefix, &inbound[..prefix.len()])?;
            let tail = inbound[prefix.len()..].join("/");
            return Some((params, Some(tail)));
        }
    }

    if route_segments.len() != inbound.len() {
        return None;
    }
    let params = bind_segments(&route_segments, inbound)?;
    Some((params, None))
}

/// Match a fixed-length run of pattern segments, collecting bindings
fn bind_segments(pattern: &[&str], inbound: &[&str]) -> Option<HashMap<String, String>> {
    let mut params = HashMap::new();
    for (route_segment, inbound_segment) in pattern.iter().zip(inbound) {
        if let Some(name) = placeholder_name(route_segment) {
            params.insert(name.to_string(), inbound_segment.to_string());
        } else if route_segment != inbound_segment {
            return None;
        }
    }
    Some(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RouteMode;
    use std::collections::HashMap as Map;

    fn route(path: &str, method: &str) -> Route {
        Route {
            path: path.to_string(),
            method: method.to_string(),
            mode: RouteMode::Proxy,
            strategy: None,
            upstream: Some("auth".to_string()),
            target_path: None,
            auth_required: false,
            upstreams: Vec::new(),
            metadata: Map::new(),
        }
    }

    fn table(routes: &[(&str, &str)]) -> RouteTable {
        RouteTable::new(routes.iter().map(|(p, m)| route(p, m)).collect())
    }

    #[test]
    fn test_literal_match_and_method_check() {
        let table = table(&[("/api/v1/plants", "GET")]);
        assert!(table.find("/api/v1/plants", "GET").is_some());
        assert!(table.find("/api/v1/plants", "POST").is_none());
        assert!(table.find("/api/v1/Plants", "GET").is_none());
    }

    #[test]
    fn test_method_wildcard() {
        let table = table(&[("/api/v1/plants", "*")]);
        assert!(table.find("/api/v1/plants", "GET").is_some());
        assert!(table.find("/api/v1/plants", "DELETE").is_some());
    }

    #[test]
    fn test_placeholder_binding() {
        let table = table(&[("/api/v1/users/{id}", "GET")]);
        let matched = table.find("/api/v1/users/42", "GET").unwrap();
        assert_eq!(matched.params.get("id"), Some(&"42".to_string()));
        assert!(matched.wildcard_tail.is_none());
    }

    #[test]
    fn test_placeholder_consumes_exactly_one_segment() {
        let table = table(&[("/{id}", "GET")]);
        assert!(table.find("/1", "GET").is_some());
        assert!(table.find("/1/2", "GET").is_none());
    }

    #[test]
    fn test_tail_wildcard_boundaries() {
        let table = table(&[("/a/*", "GET")]);
        // tail may be empty or span several segments
        for path in ["/a", "/a/", "/a/b", "/a/b/c"] {
            assert!(table.find(path, "GET").is_some(), "expected match: {path}");
        }
        assert!(table.find("/a2/b", "GET").is_none());
    }

    #[test]
    fn test_tail_capture() {
        let table = table(&[("/api/v1/auth/*", "*")]);
        let matched = table.find("/api/v1/auth/login/refresh", "POST").unwrap();
        assert_eq!(matched.wildcard_tail.as_deref(), Some("login/refresh"));

        let matched = table.find("/api/v1/auth", "GET").unwrap();
        assert_eq!(matched.wildcard_tail.as_deref(), Some(""));
    }

    #[test]
    fn test_placeholder_inside_wildcard_prefix() {
        let table = table(&[("/api/v1/plants/{id}/*", "GET")]);
        let matched = table.find("/api/v1/plants/7/photos/latest", "GET").unwrap();
        assert_eq!(matched.params.get("id"), Some(&"7".to_string()));
        assert_eq!(matched.wildcard_tail.as_deref(), Some("photos/latest"));
    }

    #[test]
    fn test_bare_wildcard_matches_everything() {
        let table = table(&[("/*", "*")]);
        assert!(table.find("/", "GET").is_some());
        assert!(table.find("/anything/at/all", "PATCH").is_some());
    }

    #[test]
    fn test_declaration_order_wins_over_specificity() {
        let table = table(&[("/api/*", "GET"), ("/api/v1/plants", "GET")]);
        let matched = table.find("/api/v1/plants", "GET").unwrap();
        assert_eq!(matched.route.path, "/api/*");
    }

    #[test]
    fn test_match_is_deterministic() {
        let table = table(&[("/api/v1/users/{id}", "GET"), ("/api/*", "*")]);
        let first = table.find("/api/v1/users/9", "GET").unwrap();
        let second = table.find("/api/v1/users/9", "GET").unwrap();
        assert_eq!(first.route.path, second.route.path);
        assert_eq!(first.params, second.params);
    }

    #[test]
    fn test_trailing_slash_is_insignificant() {
        let table = table(&[("/api/v1/plants", "GET")]);
        assert!(table.find("/api/v1/plants/", "GET").is_some());
    }
}
