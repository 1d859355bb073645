// ABOUTME: Pure request classification: which instance slug does this request target
// ABOUTME: Subdomain routing keeps the path; path routing strips the prefix segment

/// How the request addressed the instance. Forwarded to backends in the
/// `X-Roost-Routing` header so they can reconstruct their external URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Subdomain,
    Path,
}

impl RouteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteKind::Subdomain => "subdomain",
            RouteKind::Path => "path",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub slug: String,
    pub kind: RouteKind,
    /// Path-and-query to forward to the backend. Unchanged for subdomain
    /// routing; prefix and slug stripped for path routing.
    pub forward_path: String,
}

/// Classify a request by host and path-and-query. Returns `None` when the
/// request targets no instance (apex host, reserved labels, unmatched path).
/// The `/healthz` and `/api` exemptions never reach this function; the API
/// router claims those routes first.
pub fn classify(
    host: &str,
    path_and_query: &str,
    base_domain: &str,
    route_prefix: &str,
    api_subdomain: &str,
) -> Option<RouteTarget> {
    let host = host.split(':').next().unwrap_or(host);

    // Suffix match on a label boundary: "demo1.roost.test" yields "demo1",
    // "evilroost.test" yields nothing.
    if let Some(label) = host
        .strip_suffix(base_domain)
        .and_then(|h| h.strip_suffix('.'))
    {
        if !label.is_empty() && !label.contains('.') && label != "www" && label != api_subdomain {
            return Some(RouteTarget {
                slug: label.to_string(),
                kind: RouteKind::Subdomain,
                forward_path: path_and_query.to_string(),
            });
        }
    }

    let prefix = format!("/{}/", route_prefix);
    if let Some(rest) = path_and_query.strip_prefix(&prefix) {
        let slug_end = rest.find(['/', '?']).unwrap_or(rest.len());
        let slug = &rest[..slug_end];
        if !slug.is_empty() {
            let remainder = &rest[slug_end..];
            let forward_path = if remainder.is_empty() || remainder.starts_with('?') {
                format!("/{}", remainder)
            } else {
                remainder.to_string()
            };
            return Some(RouteTarget {
                slug: slug.to_string(),
                kind: RouteKind::Path,
                forward_path,
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(host: &str, path: &str) -> Option<RouteTarget> {
        classify(host, path, "roost.test", "i", "api")
    }

    #[test]
    fn subdomain_routing_keeps_path() {
        let target = run("demo1.roost.test", "/app/page?x=1").unwrap();
        assert_eq!(target.slug, "demo1");
        assert_eq!(target.kind, RouteKind::Subdomain);
        assert_eq!(target.forward_path, "/app/page?x=1");
    }

    #[test]
    fn host_port_is_ignored() {
        let target = run("demo1.roost.test:4000", "/").unwrap();
        assert_eq!(target.slug, "demo1");
    }

    #[test]
    fn reserved_labels_do_not_route() {
        assert_eq!(run("www.roost.test", "/"), None);
        assert_eq!(run("api.roost.test", "/"), None);
        assert_eq!(run("roost.test", "/"), None);
    }

    #[test]
    fn nested_labels_do_not_route() {
        assert_eq!(run("a.b.roost.test", "/"), None);
    }

    #[test]
    fn unrelated_hosts_do_not_route() {
        assert_eq!(run("elsewhere.example.com", "/"), None);
        // Suffix match must be on a label boundary.
        assert_eq!(run("evilroost.test", "/"), None);
    }

    #[test]
    fn path_routing_strips_prefix_and_slug() {
        let target = run("roost.test", "/i/demo1/app/page?x=1").unwrap();
        assert_eq!(target.slug, "demo1");
        assert_eq!(target.kind, RouteKind::Path);
        assert_eq!(target.forward_path, "/app/page?x=1");
    }

    #[test]
    fn bare_path_route_forwards_root() {
        let target = run("roost.test", "/i/demo1").unwrap();
        assert_eq!(target.forward_path, "/");

        let target = run("roost.test", "/i/demo1?x=1").unwrap();
        assert_eq!(target.forward_path, "/?x=1");
    }

    #[test]
    fn subdomain_takes_precedence_over_path() {
        let target = run("demo1.roost.test", "/i/other/page").unwrap();
        assert_eq!(target.slug, "demo1");
        assert_eq!(target.kind, RouteKind::Subdomain);
        assert_eq!(target.forward_path, "/i/other/page");
    }

    #[test]
    fn unmatched_paths_do_not_route() {
        assert_eq!(run("roost.test", "/"), None);
        assert_eq!(run("roost.test", "/i/"), None);
        assert_eq!(run("roost.test", "/other/demo1"), None);
    }
}
