pub mod classify;
pub mod emit;
pub mod error;
pub mod fetch;
pub mod headers;
pub mod hosts;
pub mod ratelimit;
pub mod rewrite;

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use chrono::Utc;
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri, header};
use hyper::{
    Body,
    server::conn::AddrStream,
    service::{make_service_fn, service_fn},
};
use serde_json::json;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{error, info, warn};
use url::Url;

use crate::{
    classify::{ContentClass, classify},
    emit::{
        ASSET_CACHE, ErrorPage, apply_frame_headers, cache_control, json_response, text_response,
    },
    error::{FetchError, ProxyError},
    fetch::{HttpClient, UpstreamResponse, build_client, decode_body_with_encoding, fetch_upstream},
    hosts::profile_for,
    ratelimit::{Decision, RateLimiter},
    rewrite::{RewriteContext, css::rewrite_css, html::rewrite_html},
};

const PROXY_CHECK_TIMEOUT: Duration = Duration::from_secs(8);
/// Fallback countdown when a target answers 429 without a Retry-After.
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub bind_addr: SocketAddr,
    /// Hourly request cap per client for rate-guarded hosts.
    pub hourly_cap: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            hourly_cap: 60,
        }
    }
}

pub struct ProxyHandle {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ProxyHandle {
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

struct AppState {
    client: HttpClient,
    limiter: RateLimiter,
}

pub async fn spawn_proxy(config: ProxyConfig) -> Result<ProxyHandle, ProxyError> {
    let listener = std::net::TcpListener::bind(config.bind_addr)?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;

    let state = Arc::new(AppState {
        client: build_client(),
        limiter: RateLimiter::new(config.hourly_cap),
    });

    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let state = state.clone();
        let remote = conn.remote_addr();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let state = state.clone();
                async move { Ok::<_, hyper::Error>(handle_request(state, remote, req).await) }
            }))
        }
    });

    let server = hyper::Server::from_tcp(listener)?.serve(make_svc);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let graceful = server.with_graceful_shutdown(async move {
        let _ = shutdown_rx.await;
    });
    let task = tokio::spawn(async move {
        if let Err(err) = graceful.await {
            error!(%err, "proxy server error");
        }
    });

    Ok(ProxyHandle {
        addr: local_addr,
        shutdown: Some(shutdown_tx),
        task,
    })
}

async fn handle_request(
    state: Arc<AppState>,
    remote: SocketAddr,
    req: Request<Body>,
) -> Response<Body> {
    match req.uri().path() {
        "/health" => json_response(
            StatusCode::OK,
            json!({
                "status": "healthy",
                "timestamp": Utc::now().to_rfc3339(),
            }),
        ),
        "/api/proxy" => handle_proxy(state, remote, req).await,
        "/api/proxy-check" => handle_proxy_check(state, req).await,
        _ => text_response(StatusCode::NOT_FOUND, "Not found"),
    }
}

async fn handle_proxy(
    state: Arc<AppState>,
    remote: SocketAddr,
    req: Request<Body>,
) -> Response<Body> {
    let Some(raw_url) = query_param(req.uri(), "url") else {
        return ErrorPage::InvalidInput {
            message: "URL parameter is required",
        }
        .into_response();
    };
    let Some(mut target) = parse_target(&raw_url) else {
        return ErrorPage::InvalidInput {
            message: &format!("The URL \"{raw_url}\" is not valid"),
        }
        .into_response();
    };

    let rotation = query_param(req.uri(), "referrer_rotation").as_deref() == Some("true");
    let client = client_ip(req.headers(), remote);
    let hostname = target.host_str().unwrap_or("").to_ascii_lowercase();
    let profile = profile_for(&hostname);

    if let Some(substitute) = profile.substitute_host(&hostname)
        && target.set_host(Some(substitute)).is_err()
    {
        warn!(host = %hostname, substitute, "host substitution failed");
    }

    if let Some(cooldown) = profile.cooldown {
        let key = format!("{client}|{hostname}");
        match state.limiter.check(&key, cooldown, Instant::now()) {
            Decision::Proceed => {}
            Decision::Throttled {
                retry_after,
                exhausted,
            } => {
                info!(%client, host = %hostname, ?retry_after, exhausted, "request throttled");
                return ErrorPage::Throttled {
                    host: &hostname,
                    retry_after_secs: retry_after.as_secs().max(1),
                    alternatives: profile.alternatives,
                    exhausted,
                }
                .into_response();
            }
        }
    }

    let outbound = headers::synthesize(&target, rotation, req.headers(), now_secs(), profile);

    info!(url = %target, %client, "proxying");
    let upstream = match fetch_upstream(
        &state.client,
        Method::GET,
        target.clone(),
        outbound,
        profile.timeout,
    )
    .await
    {
        Ok(upstream) => upstream,
        Err(FetchError::Timeout) => {
            warn!(url = %target, "upstream timed out");
            return ErrorPage::Timeout {
                host: &hostname,
                target: &target,
            }
            .into_response();
        }
        Err(FetchError::Network(message)) | Err(FetchError::InvalidUrl(message)) => {
            warn!(url = %target, %message, "upstream fetch failed");
            return ErrorPage::Unreachable {
                host: &hostname,
                message: &message,
                target: &target,
            }
            .into_response();
        }
    };

    info!(url = %upstream.final_url, status = %upstream.status, "upstream response");

    if upstream.status == StatusCode::TOO_MANY_REQUESTS {
        return ErrorPage::Throttled {
            host: &hostname,
            retry_after_secs: retry_after_secs(&upstream.headers),
            alternatives: profile.alternatives,
            exhausted: false,
        }
        .into_response();
    }
    if !upstream.status.is_success() {
        return ErrorPage::UpstreamStatus {
            host: &hostname,
            status: upstream.status,
            target: &target,
        }
        .into_response();
    }

    match classify(upstream.content_type()) {
        ContentClass::Html => {
            let decoded =
                match decode_body_with_encoding(&upstream.body, upstream.content_encoding()) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        warn!(%err, "failed to decode upstream body; skipping rewrite");
                        return passthrough_response(&upstream);
                    }
                };
            let ctx = RewriteContext::new(upstream.final_url.clone());
            let body = rewrite_html(&ctx, profile.css_patch, &decoded);
            content_response(
                "text/html; charset=utf-8",
                cache_control(profile.html_cache),
                body,
            )
        }
        ContentClass::Css => {
            let decoded =
                match decode_body_with_encoding(&upstream.body, upstream.content_encoding()) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        warn!(%err, "failed to decode upstream body; skipping rewrite");
                        return passthrough_response(&upstream);
                    }
                };
            let ctx = RewriteContext::new(upstream.final_url.clone());
            let body = rewrite_css(&ctx, &String::from_utf8_lossy(&decoded)).into_bytes();
            content_response("text/css; charset=utf-8", ASSET_CACHE, body)
        }
        ContentClass::Passthrough => passthrough_response(&upstream),
    }
}

async fn handle_proxy_check(state: Arc<AppState>, req: Request<Body>) -> Response<Body> {
    let Some(raw_url) = query_param(req.uri(), "url") else {
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({ "success": false, "error": "URL parameter is required" }),
        );
    };
    let Some(target) = parse_target(&raw_url) else {
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({ "success": false, "error": format!("Invalid URL: {raw_url}") }),
        );
    };

    let referrer = query_param(req.uri(), "referrer").filter(|r| r != "none");
    let hostname = target.host_str().unwrap_or("").to_ascii_lowercase();
    let profile = profile_for(&hostname);
    let mut outbound = headers::synthesize(&target, false, req.headers(), now_secs(), profile);
    if let Some(referrer) = referrer.as_deref()
        && let Ok(value) = header::HeaderValue::from_str(referrer)
    {
        outbound.insert(header::REFERER, value);
        outbound.insert("Sec-Fetch-Site", header::HeaderValue::from_static("same-origin"));
    }

    info!(url = %target, referrer = referrer.as_deref().unwrap_or("none"), "probing");
    let started = Instant::now();
    match fetch_upstream(
        &state.client,
        Method::HEAD,
        target.clone(),
        outbound,
        PROXY_CHECK_TIMEOUT,
    )
    .await
    {
        Ok(upstream) => {
            let load_time = started.elapsed().as_millis() as u64;
            json_response(
                StatusCode::OK,
                json!({
                    "success": upstream.status.is_success(),
                    "status": upstream.status.as_u16(),
                    "statusText": upstream.status.canonical_reason().unwrap_or(""),
                    "loadTime": load_time,
                    "url": upstream.final_url.as_str(),
                    "referrer": referrer.as_deref().unwrap_or("none"),
                    "accessible": upstream.status.is_success(),
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            )
        }
        Err(err) => {
            let (status_text, message) = match &err {
                FetchError::Timeout => ("timeout", "Request timed out".to_string()),
                FetchError::Network(message) => ("network", message.clone()),
                FetchError::InvalidUrl(message) => ("invalid-url", message.clone()),
            };
            json_response(
                StatusCode::OK,
                json!({
                    "success": false,
                    "status": 0,
                    "statusText": status_text,
                    "loadTime": -1,
                    "url": target.as_str(),
                    "referrer": referrer.as_deref().unwrap_or("none"),
                    "accessible": false,
                    "error": message,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            )
        }
    }
}

fn content_response(content_type: &str, cache: &str, body: Vec<u8>) -> Response<Body> {
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, cache)
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap();
    apply_frame_headers(response.headers_mut());
    response
}

/// Forwards non-text payloads byte-identical: original Content-Type and
/// Content-Encoding preserved, frame/CORS headers added on top.
fn passthrough_response(upstream: &UpstreamResponse) -> Response<Body> {
    let mut builder = Response::builder()
        .status(upstream.status)
        .header(header::CACHE_CONTROL, ASSET_CACHE)
        .header(header::CONTENT_LENGTH, upstream.body.len());
    for name in [header::CONTENT_TYPE, header::CONTENT_ENCODING] {
        if let Some(value) = upstream.headers.get(&name) {
            builder = builder.header(name, value.clone());
        }
    }
    let mut response = builder.body(Body::from(upstream.body.clone())).unwrap();
    apply_frame_headers(response.headers_mut());
    response
}

fn parse_target(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    Some(url)
}

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn client_ip(headers: &HeaderMap, remote: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| remote.ip().to_string())
}

fn retry_after_secs(headers: &HeaderMap) -> u64 {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
