use http::{HeaderMap, HeaderValue, StatusCode, header};
use hyper::{Body, Response};
use serde_json::Value;
use url::Url;

use crate::hosts::CacheClass;
use crate::rewrite::PROXY_ENDPOINT;

/// The proxy's entire purpose is to let third-party content render framed,
/// so its own responses carry a deliberately permissive policy.
pub const PERMISSIVE_CSP: &str = "frame-ancestors *; default-src * data: blob: 'unsafe-inline' 'unsafe-eval'; script-src * 'unsafe-inline' 'unsafe-eval'; style-src * 'unsafe-inline'; img-src * data: blob:; connect-src *; media-src *; object-src *; frame-src *; child-src *;";

pub const ASSET_CACHE: &str = "public, max-age=3600";

pub fn cache_control(class: CacheClass) -> &'static str {
    match class {
        CacheClass::NoStore => "no-cache, no-store, must-revalidate",
        CacheClass::SearchHtml => "private, max-age=60",
        CacheClass::Html => "public, max-age=300",
    }
}

pub fn apply_frame_headers(headers: &mut HeaderMap) {
    headers.insert(
        "x-frame-options",
        HeaderValue::from_static("SAMEORIGIN"),
    );
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static(PERMISSIVE_CSP),
    );
    add_cors_headers(headers);
}

pub fn add_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, PATCH, OPTIONS, HEAD"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "access-control-expose-headers",
        HeaderValue::from_static("*"),
    );
}

pub fn text_response(status: StatusCode, body: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn json_response(status: StatusCode, value: Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

/// The closed set of in-frame error pages. Upstream failures all render as
/// HTTP 200 so the host application's own error handling never fires for a
/// failing *target*; only proxy-internal faults surface as non-200.
pub enum ErrorPage<'a> {
    /// Missing or unparsable `url` query parameter. The one 400 case.
    InvalidInput { message: &'a str },
    Unreachable {
        host: &'a str,
        message: &'a str,
        target: &'a Url,
    },
    Timeout { host: &'a str, target: &'a Url },
    UpstreamStatus {
        host: &'a str,
        status: StatusCode,
        target: &'a Url,
    },
    Throttled {
        host: &'a str,
        retry_after_secs: u64,
        alternatives: &'a [(&'static str, &'static str)],
        exhausted: bool,
    },
    Internal,
}

impl ErrorPage<'_> {
    pub fn into_response(self) -> Response<Body> {
        let (status, title, inner) = match self {
            ErrorPage::InvalidInput { message } => (
                StatusCode::BAD_REQUEST,
                "Error".to_string(),
                format!(
                    "<p>{}</p>{}",
                    escape(message),
                    back_button()
                ),
            ),
            ErrorPage::Unreachable {
                host,
                message,
                target,
            } => (
                StatusCode::OK,
                "Connection Error".to_string(),
                format!(
                    "<p>Could not connect to <strong>{}</strong></p>\
                     <p><small>{}</small></p>{}{}",
                    escape(host),
                    escape(message),
                    back_button(),
                    open_in_new_tab(target)
                ),
            ),
            ErrorPage::Timeout { host, target } => (
                StatusCode::OK,
                "Timeout".to_string(),
                format!(
                    "<p>The website took too long to respond</p>\
                     <p><strong>{}</strong></p>{}{}",
                    escape(host),
                    back_button(),
                    open_in_new_tab(target)
                ),
            ),
            ErrorPage::UpstreamStatus {
                host,
                status,
                target,
            } => (
                StatusCode::OK,
                "Website Error".to_string(),
                format!(
                    "<p>Failed to load: <strong>{}</strong></p>\
                     <p>Status: {} {}</p>{}{}",
                    escape(host),
                    status.as_u16(),
                    status.canonical_reason().unwrap_or(""),
                    back_button(),
                    open_in_new_tab(target)
                ),
            ),
            ErrorPage::Throttled {
                host,
                retry_after_secs,
                alternatives,
                exhausted,
            } => {
                let alternatives_html = if exhausted && !alternatives.is_empty() {
                    let links: String = alternatives
                        .iter()
                        .map(|(name, url)| {
                            let encoded: String =
                                url::form_urlencoded::byte_serialize(url.as_bytes()).collect();
                            format!(
                                "<li><a href=\"{PROXY_ENDPOINT}?url={encoded}\">{}</a></li>",
                                escape(name)
                            )
                        })
                        .collect();
                    format!("<p>In the meantime, these work the same way:</p><ul>{links}</ul>")
                } else {
                    String::new()
                };
                let reload = if exhausted {
                    String::new()
                } else {
                    format!(
                        "<script>setTimeout(() => window.location.reload(), {});</script>",
                        retry_after_secs.max(1) * 1000
                    )
                };
                (
                    StatusCode::OK,
                    "Slow Down".to_string(),
                    format!(
                        "{reload}<p>Requests to <strong>{}</strong> are rate limited</p>\
                         <p>Try again in about {retry_after_secs} second(s)</p>\
                         {alternatives_html}{}",
                        escape(host),
                        back_button()
                    ),
                )
            }
            ErrorPage::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server Error".to_string(),
                format!(
                    "<p>Something went wrong with the proxy</p>{}",
                    back_button()
                ),
            ),
        };

        let page = shell(&title, &inner);
        let mut response = Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .header(header::CACHE_CONTROL, "no-store")
            .body(Body::from(page))
            .unwrap();
        apply_frame_headers(response.headers_mut());
        response
    }
}

fn shell(title: &str, inner: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body style=\"font-family: system-ui, sans-serif; padding: 40px; text-align: center;\">\
         <h2>{title}</h2>{inner}</body></html>"
    )
}

fn back_button() -> &'static str {
    "<p><button onclick=\"history.back()\">Go Back</button> \
     <button onclick=\"location.reload()\">Retry</button></p>"
}

fn open_in_new_tab(target: &Url) -> String {
    format!(
        "<p><a href=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\">Open in New Tab Instead</a></p>",
        escape(target.as_str())
    )
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
