use http::{HeaderMap, HeaderValue, header};
use url::Url;

use crate::hosts::HostProfile;

/// Values are reused within a coarse time bucket so rotation is smooth
/// instead of re-randomized on every call.
const ROTATION_BUCKET_SECS: u64 = 10;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
];

const REFERRERS: &[&str] = &[
    "https://www.google.com/",
    "https://duckduckgo.com/",
    "https://en.wikipedia.org/",
    "https://www.bing.com/",
    "https://search.yahoo.com/",
    "https://news.ycombinator.com/",
];

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";

/// Builds the outbound header set for one fetch. Pure function of the
/// target, the rotation flag, the caller's own headers and the wall clock
/// (`now_secs`, unix seconds) so tests can pin the time bucket.
pub fn synthesize(
    target: &Url,
    rotation_enabled: bool,
    inbound: &HeaderMap,
    now_secs: u64,
    profile: &HostProfile,
) -> HeaderMap {
    let bucket = (now_secs / ROTATION_BUCKET_SECS) as usize;
    let mut headers = HeaderMap::new();

    headers.insert(
        header::USER_AGENT,
        HeaderValue::from_static(USER_AGENTS[bucket % USER_AGENTS.len()]),
    );
    headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(
        header::ACCEPT_ENCODING,
        HeaderValue::from_static("gzip, deflate, br"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        "Upgrade-Insecure-Requests",
        HeaderValue::from_static("1"),
    );
    headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
    headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
    headers.insert("Sec-Fetch-User", HeaderValue::from_static("?1"));
    headers.insert(
        "Sec-Fetch-Site",
        HeaderValue::from_static(if rotation_enabled { "cross-site" } else { "none" }),
    );

    if rotation_enabled {
        headers.insert(
            header::REFERER,
            HeaderValue::from_static(REFERRERS[bucket % REFERRERS.len()]),
        );
    } else if target.path() != "/" && !target.path().is_empty() {
        // Deep links look like in-site navigation from the target's root.
        let origin_referer = format!("{}/", target.origin().ascii_serialization());
        if let Ok(value) = HeaderValue::from_str(&origin_referer) {
            headers.insert(header::REFERER, value);
        }
    }

    // The caller's language preference and cookies carry through so the
    // target renders for them, not for the proxy host.
    for name in [header::ACCEPT_LANGUAGE, header::COOKIE] {
        if let Some(value) = inbound.get(&name) {
            headers.insert(name, value.clone());
        }
    }

    for (name, value) in profile.extra_headers {
        if let (Ok(name), Ok(value)) = (
            header::HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }

    headers
}
