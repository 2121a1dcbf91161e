pub mod css;
pub mod html;

use url::Url;

/// Path of the proxy endpoint that rewritten URLs point back at.
pub const PROXY_ENDPOINT: &str = "/api/proxy";

/// Schemes that must never be rewritten.
const EXCLUDED_SCHEMES: &[&str] = &["data:", "blob:", "javascript:", "mailto:", "tel:", "about:"];

/// Shared URL-to-proxy-URL mapping used by both the HTML and CSS
/// rewriters. Built once per request from the *final* (post-redirect)
/// upstream URL, which is the base for relative resolution.
pub struct RewriteContext {
    base: Url,
}

impl RewriteContext {
    pub fn new(final_url: Url) -> Self {
        Self { base: final_url }
    }

    pub fn target_hostname(&self) -> &str {
        self.base.host_str().unwrap_or("")
    }

    /// Maps an absolute URL to a proxy URL. Injective: percent-decoding
    /// the `url` query parameter yields back the exact absolute URL.
    pub fn proxy_url_for(&self, absolute: &Url) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(absolute.as_str().as_bytes())
            .collect();
        format!("{PROXY_ENDPOINT}?url={encoded}")
    }

    /// Rewrites one raw attribute or `url()` value. `None` means "leave
    /// the markup untouched": empty values, fragments, excluded schemes,
    /// unresolvable references and anything already pointing at the proxy
    /// endpoint (idempotence).
    pub fn rewrite(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }
        if trimmed.starts_with(PROXY_ENDPOINT) {
            return None;
        }
        let lower = trimmed.to_ascii_lowercase();
        if EXCLUDED_SCHEMES.iter().any(|s| lower.starts_with(s)) {
            return None;
        }

        let absolute = self.base.join(trimmed).ok()?;
        if !matches!(absolute.scheme(), "http" | "https") {
            return None;
        }
        Some(self.proxy_url_for(&absolute))
    }
}
