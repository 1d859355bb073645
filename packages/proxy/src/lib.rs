// ABOUTME: Stateless request router resolving inbound traffic to instance gateways
// ABOUTME: Subdomain routing, path-prefix routing, and WebSocket upgrade pass-through

mod classify;
mod dispatch;

pub use classify::{classify, RouteKind, RouteTarget};
pub use dispatch::{ProxyConfig, ProxyDispatcher};
