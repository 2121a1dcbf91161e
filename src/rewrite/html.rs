use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use lol_html::{HtmlRewriter, Settings, element, html_content::ContentType, text};
use tracing::warn;

use super::{RewriteContext, css::rewrite_css};

// Fixed positioning inside a scrolling iframe detaches from the viewport;
// forcing absolute keeps overlays anchored to the document.
const COMPAT_CSS: &str = "\
* { box-sizing: border-box !important; }\n\
body { margin: 0 !important; overflow-x: auto !important; min-height: 100vh !important; }\n\
.fixed, [style*=\"position: fixed\"], [style*=\"position:fixed\"] { position: absolute !important; }\n\
a, button, [onclick], [role=\"button\"] { pointer-events: auto !important; }";

/// Rewrites an HTML document so it renders and navigates correctly when
/// framed from the proxy's origin: frame-blocking meta tags go away, every
/// URL routes back through the proxy endpoint, and compatibility CSS is
/// injected. On any rewriter error the original input is returned
/// unchanged; a partially broken render beats an error page here.
pub fn rewrite_html(ctx: &RewriteContext, css_patch: Option<&str>, input: &[u8]) -> Vec<u8> {
    match try_rewrite(ctx, css_patch, input) {
        Ok(output) => output,
        Err(err) => {
            warn!(%err, "html rewrite failed; serving original body");
            input.to_vec()
        }
    }
}

fn try_rewrite(
    ctx: &RewriteContext,
    css_patch: Option<&str>,
    input: &[u8],
) -> Result<Vec<u8>, lol_html::errors::RewritingError> {
    let mut output = Vec::with_capacity(input.len());
    let injected = Rc::new(Cell::new(false));
    let style_buf = Rc::new(RefCell::new(String::new()));
    let head_block = compat_block(css_patch);

    {
        let head_injected = injected.clone();
        let body_injected = injected.clone();
        let head_html = head_block.clone();
        let body_html = head_block.clone();
        let style_buf = style_buf.clone();

        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![
                    // An upstream <base> would re-root the URLs we rewrite.
                    element!("base", |el| {
                        el.remove();
                        Ok(())
                    }),
                    element!("meta", |el| {
                        if let Some(value) = el.get_attribute("http-equiv")
                            && (value.eq_ignore_ascii_case("x-frame-options")
                                || value.eq_ignore_ascii_case("content-security-policy"))
                        {
                            el.remove();
                        }
                        if let Some(value) = el.get_attribute("name")
                            && value.eq_ignore_ascii_case("referrer")
                        {
                            el.remove();
                        }
                        Ok(())
                    }),
                    element!("head", move |el| {
                        el.append(&head_html, ContentType::Html);
                        head_injected.set(true);
                        Ok(())
                    }),
                    element!("body", move |el| {
                        if !body_injected.get() {
                            el.prepend(&body_html, ContentType::Html);
                            body_injected.set(true);
                        }
                        Ok(())
                    }),
                    element!("[href]", |el| {
                        if let Some(href) = el.get_attribute("href")
                            && let Some(proxied) = ctx.rewrite(&href)
                        {
                            el.set_attribute("href", &proxied)?;
                            strip_sri(el);
                        }
                        Ok(())
                    }),
                    element!("[src]", |el| {
                        if let Some(src) = el.get_attribute("src")
                            && let Some(proxied) = ctx.rewrite(&src)
                        {
                            el.set_attribute("src", &proxied)?;
                            strip_sri(el);
                        }
                        Ok(())
                    }),
                    element!("form[action]", |el| {
                        if let Some(action) = el.get_attribute("action")
                            && let Some(proxied) = ctx.rewrite(&action)
                        {
                            el.set_attribute("action", &proxied)?;
                        }
                        Ok(())
                    }),
                    element!("[srcset]", |el| {
                        if let Some(srcset) = el.get_attribute("srcset")
                            && let Some(rewritten) = rewrite_srcset(ctx, &srcset)
                        {
                            el.set_attribute("srcset", &rewritten)?;
                        }
                        Ok(())
                    }),
                    text!("style", move |chunk| {
                        style_buf.borrow_mut().push_str(chunk.as_str());
                        if chunk.last_in_text_node() {
                            let css = std::mem::take(&mut *style_buf.borrow_mut());
                            chunk.replace(&rewrite_css(ctx, &css), ContentType::Html);
                        } else {
                            chunk.remove();
                        }
                        Ok(())
                    }),
                ],
                ..Settings::default()
            },
            |c: &[u8]| output.extend_from_slice(c),
        );

        rewriter.write(input)?;
        rewriter.end()?;
    }

    if !injected.get() {
        // Fragment without <head> or <body>; prepend the block raw.
        let mut fallback = head_block.into_bytes();
        fallback.extend_from_slice(&output);
        return Ok(fallback);
    }
    Ok(output)
}

fn compat_block(css_patch: Option<&str>) -> String {
    let mut css = String::from(COMPAT_CSS);
    if let Some(patch) = css_patch {
        css.push('\n');
        css.push_str(patch);
    }
    format!(
        "<style data-frameproxy=\"compat\">{css}</style>\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">"
    )
}

/// A rewritten URL serves different bytes for CSS, so a subresource
/// integrity hash would make the browser drop the asset.
fn strip_sri(el: &mut lol_html::html_content::Element) {
    el.remove_attribute("integrity");
    el.remove_attribute("crossorigin");
}

fn rewrite_srcset(ctx: &RewriteContext, srcset: &str) -> Option<String> {
    let mut changed = false;
    let rewritten: Vec<String> = srcset
        .split(',')
        .map(|candidate| {
            let candidate = candidate.trim();
            let mut parts = candidate.splitn(2, char::is_whitespace);
            let raw_url = parts.next().unwrap_or("");
            let descriptor = parts.next().map(str::trim).unwrap_or("");
            match ctx.rewrite(raw_url) {
                Some(proxied) => {
                    changed = true;
                    if descriptor.is_empty() {
                        proxied
                    } else {
                        format!("{proxied} {descriptor}")
                    }
                }
                None => candidate.to_string(),
            }
        })
        .collect();
    changed.then(|| rewritten.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn ctx() -> RewriteContext {
        RewriteContext::new(Url::parse("https://example.com/sub/page.html").unwrap())
    }

    fn rewrite(input: &str) -> String {
        String::from_utf8(rewrite_html(&ctx(), None, input.as_bytes())).unwrap()
    }

    #[test]
    fn strips_frame_blocking_meta_and_base_tags() {
        let out = rewrite(
            "<html><head>\
             <base href=\"https://cdn.example.com/\">\
             <meta http-equiv=\"X-Frame-Options\" content=\"DENY\">\
             <meta http-equiv=\"Content-Security-Policy\" content=\"frame-ancestors 'none'\">\
             <meta name=\"referrer\" content=\"origin\">\
             </head><body></body></html>",
        );
        assert!(!out.contains("<base"));
        assert!(!out.to_ascii_lowercase().contains("x-frame-options"));
        assert!(!out.to_ascii_lowercase().contains("content-security-policy"));
        assert!(!out.contains("name=\"referrer\""));
    }

    #[test]
    fn rewrites_href_src_and_action() {
        let out = rewrite(
            "<html><head><link rel=\"stylesheet\" href=\"/s.css\" integrity=\"sha384-x\" crossorigin=\"anonymous\"></head>\
             <body><a href=\"../p\">go</a><img src=\"img/a.png\">\
             <form action=\"/submit\"></form></body></html>",
        );
        assert!(out.contains("href=\"/api/proxy?url=https%3A%2F%2Fexample.com%2Fs.css\""));
        assert!(out.contains("href=\"/api/proxy?url=https%3A%2F%2Fexample.com%2Fp\""));
        assert!(out.contains("src=\"/api/proxy?url=https%3A%2F%2Fexample.com%2Fsub%2Fimg%2Fa.png\""));
        assert!(out.contains("action=\"/api/proxy?url=https%3A%2F%2Fexample.com%2Fsubmit\""));
        assert!(!out.contains("integrity"));
        assert!(!out.contains("crossorigin"));
    }

    #[test]
    fn rewrites_srcset_candidates_keeping_descriptors() {
        let out = rewrite(
            "<html><head></head><body>\
             <img srcset=\"/a.png 1x, /b.png 2x\" src=\"/a.png\">\
             </body></html>",
        );
        assert!(out.contains("/api/proxy?url=https%3A%2F%2Fexample.com%2Fa.png 1x"));
        assert!(out.contains("/api/proxy?url=https%3A%2F%2Fexample.com%2Fb.png 2x"));
    }

    #[test]
    fn leaves_excluded_schemes_and_proxied_urls_untouched() {
        let input = "<html><head></head><body>\
                     <a href=\"javascript:void(0)\">x</a>\
                     <img src=\"data:image/gif;base64,AA\">\
                     <a href=\"/api/proxy?url=https%3A%2F%2Fexample.com%2F\">done</a>\
                     </body></html>";
        let out = rewrite(input);
        assert!(out.contains("href=\"javascript:void(0)\""));
        assert!(out.contains("src=\"data:image/gif;base64,AA\""));
        // No double wrapping.
        assert!(!out.contains("url=%2Fapi%2Fproxy"));
    }

    #[test]
    fn injects_compat_styles_into_head() {
        let out = rewrite("<html><head><title>t</title></head><body></body></html>");
        assert!(out.contains("data-frameproxy=\"compat\""));
        assert!(out.contains("position: absolute !important"));
        let head_end = out.find("</head>").unwrap();
        let style_pos = out.find("data-frameproxy").unwrap();
        assert!(style_pos < head_end);
    }

    #[test]
    fn host_css_patch_is_appended() {
        let out = String::from_utf8(rewrite_html(
            &ctx(),
            Some("#gb { position: relative !important; }"),
            b"<html><head></head><body></body></html>",
        ))
        .unwrap();
        assert!(out.contains("#gb { position: relative !important; }"));
    }

    #[test]
    fn rewrites_inline_style_blocks() {
        let out = rewrite(
            "<html><head><style>body { background: url('/bg.png'); }</style></head><body></body></html>",
        );
        assert!(out.contains("url(\"/api/proxy?url=https%3A%2F%2Fexample.com%2Fbg.png\")"));
    }

    #[test]
    fn malformed_markup_never_escapes_as_an_error() {
        for mangled in [
            "<html><head><meta http-equiv=",
            "<div><a href='/x'>unclosed",
            "\u{0}\u{1}<not really html",
            "",
        ] {
            // Either rewritten output or the original input; never a panic.
            let _ = rewrite_html(&ctx(), None, mangled.as_bytes());
        }
    }

    #[test]
    fn headless_fragments_still_get_the_compat_block() {
        let out = rewrite("<div><a href=\"/p\">go</a></div>");
        assert!(out.contains("data-frameproxy=\"compat\""));
        assert!(out.contains("href=\"/api/proxy?url=https%3A%2F%2Fexample.com%2Fp\""));
    }
}
