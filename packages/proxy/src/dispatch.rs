// ABOUTME: Forwarding dispatcher: resolves the slug, proxies verbatim to the gateway port
// ABOUTME: Plain requests go through the pooled client; upgrades get a raw byte bridge

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response, StatusCode, Uri};
use hyper::upgrade::OnUpgrade;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tracing::{debug, warn};

use roost_registry::{InstanceRegistry, InstanceStatus};

use crate::classify::{classify, RouteTarget};

/// Connection-scoped headers that must not be forwarded on plain requests.
/// Upgrade requests keep theirs; the handshake depends on them.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub base_domain: String,
    pub route_prefix: String,
    pub api_subdomain: String,
    /// Scheme clients used to reach us; TLS terminates upstream, so this is
    /// reported rather than observed.
    pub external_scheme: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            base_domain: "roost.local".to_string(),
            route_prefix: "i".to_string(),
            api_subdomain: "api".to_string(),
            external_scheme: "https".to_string(),
        }
    }
}

/// Stateless per-request dispatcher. Holds the registry for slug resolution
/// and one pooled client for all plain forwarding.
pub struct ProxyDispatcher {
    registry: Arc<InstanceRegistry>,
    config: ProxyConfig,
    client: Client<HttpConnector, Body>,
}

impl ProxyDispatcher {
    pub fn new(registry: Arc<InstanceRegistry>, config: ProxyConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            registry,
            config,
            client,
        }
    }

    /// Route one inbound request. Always produces a response; routing and
    /// backend failures become 404/502/503 rather than errors.
    pub async fn dispatch(&self, req: Request<Body>) -> Response<Body> {
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| req.uri().host().map(str::to_string))
            .unwrap_or_default();
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let Some(target) = classify(
            &host,
            &path_and_query,
            &self.config.base_domain,
            &self.config.route_prefix,
            &self.config.api_subdomain,
        ) else {
            return error_response(
                StatusCode::NOT_FOUND,
                &format!("No route for this request on {}", self.config.base_domain),
            );
        };

        let instance = match self.registry.find_by_slug(&target.slug).await {
            Ok(Some(instance)) => instance,
            Ok(None) => {
                return error_response(
                    StatusCode::NOT_FOUND,
                    &format!(
                        "No instance '{}' on {}",
                        target.slug, self.config.base_domain
                    ),
                );
            }
            Err(e) => {
                warn!("Registry lookup failed for slug {}: {}", target.slug, e);
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Registry unavailable");
            }
        };

        if instance.status != InstanceStatus::Running {
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &format!(
                    "Instance '{}' is {}",
                    target.slug,
                    instance.status.as_str()
                ),
            );
        }

        debug!(
            "Proxying {} {} -> 127.0.0.1:{}{} ({})",
            req.method(),
            path_and_query,
            instance.gateway_port,
            target.forward_path,
            target.kind.as_str()
        );
        self.forward(req, &host, &target, instance.gateway_port)
            .await
    }

    async fn forward(
        &self,
        mut req: Request<Body>,
        original_host: &str,
        target: &RouteTarget,
        gateway_port: u16,
    ) -> Response<Body> {
        let uri: Uri = match format!("http://127.0.0.1:{}{}", gateway_port, target.forward_path)
            .parse()
        {
            Ok(uri) => uri,
            Err(e) => {
                warn!("Invalid forward uri for slug {}: {}", target.slug, e);
                return error_response(StatusCode::BAD_GATEWAY, "Invalid upstream path");
            }
        };

        let is_upgrade = req.headers().contains_key(header::UPGRADE);
        let downstream_upgrade = req.extensions_mut().remove::<OnUpgrade>();

        *req.uri_mut() = uri;
        if !is_upgrade {
            for name in HOP_BY_HOP {
                req.headers_mut().remove(*name);
            }
        }
        set_forwarding_headers(&mut req, original_host, &self.config.external_scheme, target);

        let mut resp = match self.client.request(req).await {
            Ok(resp) => resp.map(Body::new),
            Err(e) => {
                warn!(
                    "Backend 127.0.0.1:{} unreachable for slug {}: {}",
                    gateway_port, target.slug, e
                );
                return error_response(StatusCode::BAD_GATEWAY, "Instance backend unreachable");
            }
        };

        if resp.status() == StatusCode::SWITCHING_PROTOCOLS {
            if let Some(downstream) = downstream_upgrade {
                let upstream = hyper::upgrade::on(&mut resp);
                let slug = target.slug.clone();
                tokio::spawn(async move {
                    bridge_upgraded(downstream, upstream, &slug).await;
                });
            } else {
                warn!(
                    "Backend switched protocols for slug {} but the client connection is not upgradable",
                    target.slug
                );
            }
        }

        resp
    }
}

fn set_forwarding_headers(
    req: &mut Request<Body>,
    original_host: &str,
    scheme: &str,
    target: &RouteTarget,
) {
    let headers = req.headers_mut();
    if let Ok(value) = HeaderValue::from_str(original_host) {
        headers.insert("x-forwarded-host", value);
    }
    if let Ok(value) = HeaderValue::from_str(scheme) {
        headers.insert("x-forwarded-proto", value);
    }
    headers.insert(
        "x-roost-routing",
        HeaderValue::from_static(target.kind.as_str()),
    );
}

/// Join the two upgraded connections and shovel bytes both ways until either
/// side closes.
async fn bridge_upgraded(downstream: OnUpgrade, upstream: OnUpgrade, slug: &str) {
    let (downstream, upstream) = match tokio::join!(downstream, upstream) {
        (Ok(d), Ok(u)) => (d, u),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Upgrade handshake failed for slug {}: {}", slug, e);
            return;
        }
    };

    let mut downstream = TokioIo::new(downstream);
    let mut upstream = TokioIo::new(upstream);
    match tokio::io::copy_bidirectional(&mut downstream, &mut upstream).await {
        Ok((from_client, from_backend)) => {
            debug!(
                "Upgraded connection for slug {} closed ({}B up, {}B down)",
                slug, from_client, from_backend
            );
        }
        Err(e) => {
            debug!("Upgraded connection for slug {} ended: {}", slug, e);
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    let body = serde_json::json!({ "error": message }).to_string();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
