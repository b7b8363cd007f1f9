//! Local reverse-proxy passthrough.
//!
//! Each configured proxy mounts `/{name}/{*rest}` and forwards the request
//! to `http://127.0.0.1:{port}/{rest}`, rewriting the Host header to the
//! target and recording the inbound host in X-Forwarded-Host. Independent of
//! the health-check core.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderName, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, on, MethodFilter};
use axum::Router;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::config::{ConfigError, ProxyConfig};

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

struct Target {
    name: String,
    authority: String,
}

/// Mount every configured passthrough on the router.
pub fn mount(mut router: Router, proxies: &[ProxyConfig]) -> Result<Router, ConfigError> {
    if proxies.is_empty() {
        return Ok(router);
    }

    let client: Client<HttpConnector, Body> =
        Client::builder(TokioExecutor::new()).build(HttpConnector::new());

    for proxy in proxies {
        let target = Arc::new(Target {
            name: proxy.name.clone(),
            authority: format!("127.0.0.1:{}", proxy.port),
        });
        let client = client.clone();
        let handler = move |request: Request<Body>| {
            let target = target.clone();
            let client = client.clone();
            async move { passthrough(target, client, request).await }
        };

        let path = format!("/{}/{{*rest}}", proxy.name);
        router = match method_filter(&proxy.methods).map_err(|message| {
            ConfigError::InvalidProxy {
                name: proxy.name.clone(),
                message,
            }
        })? {
            Some(filter) => router.route(&path, on(filter, handler)),
            None => router.route(&path, any(handler)),
        };
        tracing::info!(proxy = %proxy.name, port = proxy.port, "passthrough mounted");
    }

    Ok(router)
}

fn method_filter(methods: &[String]) -> Result<Option<MethodFilter>, String> {
    let mut filter: Option<MethodFilter> = None;
    for method in methods {
        let parsed = match method.to_uppercase().as_str() {
            "GET" => MethodFilter::GET,
            "POST" => MethodFilter::POST,
            "PUT" => MethodFilter::PUT,
            "DELETE" => MethodFilter::DELETE,
            "PATCH" => MethodFilter::PATCH,
            "HEAD" => MethodFilter::HEAD,
            "OPTIONS" => MethodFilter::OPTIONS,
            "TRACE" => MethodFilter::TRACE,
            other => return Err(format!("unsupported method {other}")),
        };
        filter = Some(match filter {
            Some(existing) => existing.or(parsed),
            None => parsed,
        });
    }
    Ok(filter)
}

async fn passthrough(
    target: Arc<Target>,
    client: Client<HttpConnector, Body>,
    mut request: Request<Body>,
) -> Response {
    // Strip the mount prefix; the upstream sees only the rest of the path.
    let prefix = format!("/{}/", target.name);
    let rest = request
        .uri()
        .path()
        .strip_prefix(&prefix)
        .unwrap_or("")
        .to_owned();
    let path_and_query = match request.uri().query() {
        Some(query) => format!("/{rest}?{query}"),
        None => format!("/{rest}"),
    };

    let uri = match Uri::try_from(format!("http://{}{}", target.authority, path_and_query)) {
        Ok(uri) => uri,
        Err(err) => {
            tracing::warn!(proxy = %target.name, error = %err, "unbuildable upstream uri");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if let Some(host) = request.headers().get(header::HOST).cloned() {
        request.headers_mut().insert(X_FORWARDED_HOST, host);
    }
    if let Ok(value) = header::HeaderValue::from_str(&target.authority) {
        request.headers_mut().insert(header::HOST, value);
    }
    *request.uri_mut() = uri;

    match client.request(request).await {
        Ok(response) => response.map(Body::new).into_response(),
        Err(err) => {
            tracing::warn!(proxy = %target.name, target = %target.authority, error = %err, "upstream request failed");
            (StatusCode::BAD_GATEWAY, "upstream request failed").into_response()
        }
    }
}
