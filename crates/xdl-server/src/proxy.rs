//! Forwarding requests to the packager
//!
//! `/bundle` and `/map` are rewritten to the entry point's bundle and source
//! map; every other path is forwarded verbatim.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};

use xdl_core::prelude::*;
use xdl_core::Environment;

use crate::server::ServerState;

/// Header carrying the client platform for bundle requests
pub const PLATFORM_HEADER: &str = "exponent-platform";

/// Platform assumed when the client does not say
pub const DEFAULT_PLATFORM: &str = "ios";

/// Largest request body forwarded to the packager
const MAX_FORWARD_BODY: usize = 64 * 1024 * 1024;

/// Headers that describe a single connection and must not be forwarded.
///
/// `host` and `content-length` are recomputed by the client for the new hop.
fn hop_by_hop() -> [HeaderName; 11] {
    [
        header::CONNECTION,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-connection"),
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
        header::HOST,
        header::CONTENT_LENGTH,
    ]
}

/// Artifact served for a rewritten route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Bundle,
    SourceMap,
}

impl Artifact {
    /// Artifact for request paths under `/bundle` or `/map`
    pub fn for_path(path: &str) -> Option<Self> {
        if under(path, "/bundle") {
            Some(Artifact::Bundle)
        } else if under(path, "/map") {
            Some(Artifact::SourceMap)
        } else {
            None
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Artifact::Bundle => "bundle",
            Artifact::SourceMap => "map",
        }
    }
}

/// `path` is `prefix` itself or a sub-path of it
fn under(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// `/<main module>.<ext>?<query>&platform=<platform>`
pub fn rewrite_path(
    artifact: Artifact,
    main_module_path: &str,
    query: Option<&str>,
    platform: Option<&str>,
) -> String {
    let mut path = format!("/{}.{}?", main_module_path, artifact.extension());
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        path.push_str(query);
        path.push('&');
    }
    path.push_str("platform=");
    path.push_str(platform.unwrap_or(DEFAULT_PLATFORM));
    path
}

/// Path and query to request from the packager for `request`
pub fn upstream_path(request: &Request, main_module_path: &str) -> String {
    let uri = request.uri();
    match Artifact::for_path(uri.path()) {
        Some(artifact) => {
            let platform = request
                .headers()
                .get(PLATFORM_HEADER)
                .and_then(|value| value.to_str().ok());
            rewrite_path(artifact, main_module_path, uri.query(), platform)
        }
        None => uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
    }
}

/// Fallback handler: forward to the packager.
pub async fn proxy_handler<E: Environment>(
    State(state): State<ServerState<E>>,
    request: Request,
) -> Response {
    let path = upstream_path(&request, &state.main_module_path);
    let target = format!("http://localhost:{}{}", state.packager_port, path);
    trace!("proxy {} {} -> {}", request.method(), request.uri(), target);

    match forward(&state.client, request, &target).await {
        Ok(response) => response,
        Err(e) => {
            warn!("{}", e);
            (StatusCode::BAD_GATEWAY, format!("{}\n", e)).into_response()
        }
    }
}

async fn forward(client: &reqwest::Client, request: Request, target: &str) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_FORWARD_BODY)
        .await
        .map_err(|e| Error::proxy(format!("failed to read request body: {}", e)))?;

    let upstream = client
        .request(parts.method, target)
        .headers(strip_hop_by_hop(parts.headers))
        .body(body)
        .send()
        .await
        .map_err(|e| Error::proxy(format!("packager unreachable at {}: {}", target, e)))?;

    let mut response = Response::builder().status(upstream.status());
    if let Some(headers) = response.headers_mut() {
        *headers = strip_hop_by_hop(upstream.headers().clone());
    }

    response
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| Error::proxy(format!("failed to build proxied response: {}", e)))
}

fn strip_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    for name in hop_by_hop() {
        headers.remove(name);
    }
    headers
}
