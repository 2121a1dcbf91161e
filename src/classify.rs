/// Rewrite path for an upstream response, picked off its Content-Type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentClass {
    Html,
    Css,
    /// Bytes are streamed back unmodified apart from header adjustments.
    /// A missing Content-Type lands here too: mis-rewriting binary data
    /// corrupts it, while an unrewritten page only loses link proxying.
    Passthrough,
}

pub fn classify(content_type: Option<&str>) -> ContentClass {
    let Some(value) = content_type else {
        return ContentClass::Passthrough;
    };
    let value = value.trim().to_ascii_lowercase();
    if value.starts_with("text/html") {
        ContentClass::Html
    } else if value.starts_with("text/css") {
        ContentClass::Css
    } else {
        ContentClass::Passthrough
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_and_css_are_dispatched() {
        assert_eq!(classify(Some("text/html")), ContentClass::Html);
        assert_eq!(
            classify(Some("text/html; charset=utf-8")),
            ContentClass::Html
        );
        assert_eq!(classify(Some("TEXT/CSS")), ContentClass::Css);
    }

    #[test]
    fn everything_else_passes_through() {
        assert_eq!(classify(Some("image/png")), ContentClass::Passthrough);
        assert_eq!(
            classify(Some("application/javascript")),
            ContentClass::Passthrough
        );
        assert_eq!(classify(None), ContentClass::Passthrough);
    }
}
