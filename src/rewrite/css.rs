use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::RewriteContext;

// Tolerant token scan; no semantic CSS parsing. Quotes are optional and
// everything outside url() tokens stays byte-identical.
static URL_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)url\(\s*(['"]?)([^'")]+)(['"]?)\s*\)"#).expect("url() pattern"));

/// Rewrites every `url(...)` reference in stylesheet text through the
/// shared proxy mapping. Used for `text/css` bodies and inline `<style>`
/// blocks alike.
pub fn rewrite_css(ctx: &RewriteContext, css: &str) -> String {
    URL_TOKEN
        .replace_all(css, |caps: &Captures| match ctx.rewrite(&caps[2]) {
            Some(proxied) => format!("url(\"{proxied}\")"),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn ctx() -> RewriteContext {
        RewriteContext::new(Url::parse("https://example.com/styles/site.css").unwrap())
    }

    #[test]
    fn rewrites_quoted_and_bare_url_tokens() {
        let css = "body { background: url('/bg.png'); }\n.a { mask: url(icons.svg); }";
        let out = rewrite_css(&ctx(), css);
        assert!(out.contains("url(\"/api/proxy?url=https%3A%2F%2Fexample.com%2Fbg.png\")"));
        assert!(
            out.contains("url(\"/api/proxy?url=https%3A%2F%2Fexample.com%2Fstyles%2Ficons.svg\")")
        );
    }

    #[test]
    fn data_and_blob_urls_survive_untouched() {
        let css = ".b { background: url(data:image/gif;base64,R0lGOD); cursor: url(\"blob:https://example.com/x\"); }";
        assert_eq!(rewrite_css(&ctx(), css), css);
    }

    #[test]
    fn non_url_syntax_is_byte_identical() {
        let css = "@media (min-width: 600px) { .c > .d { color: #fff; content: \"url(\"; } }";
        assert_eq!(rewrite_css(&ctx(), css), css);
    }
}
