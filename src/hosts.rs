use std::time::Duration;

/// Cache-control class for rewritten HTML from a host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheClass {
    /// Live/interactive content: `no-store`.
    NoStore,
    /// Search-result pages: short private max-age.
    SearchHtml,
    /// General pages: short public max-age.
    Html,
}

/// Per-host behavior expressed as data instead of inline branching: header
/// overrides, hostname substitution, layout patches, timeout and cooldown
/// budgets all live in one table.
pub struct HostProfile {
    matches: &'static [&'static str],
    pub timeout: Duration,
    pub extra_headers: &'static [(&'static str, &'static str)],
    /// Exact hostname replacements applied before fetching, e.g. steering
    /// a heavy desktop site to its lighter mobile variant.
    pub host_substitutes: &'static [(&'static str, &'static str)],
    /// Extra compatibility CSS the HTML rewriter appends for this host.
    pub css_patch: Option<&'static str>,
    /// Per-client cooldown window; `None` disables the rate guard.
    pub cooldown: Option<Duration>,
    /// Equivalent services suggested on the long-form throttle page.
    pub alternatives: &'static [(&'static str, &'static str)],
    pub html_cache: CacheClass,
}

const DEFAULT_PROFILE: HostProfile = HostProfile {
    matches: &[],
    timeout: Duration::from_secs(10),
    extra_headers: &[],
    host_substitutes: &[],
    css_patch: None,
    cooldown: None,
    alternatives: &[],
    html_cache: CacheClass::Html,
};

const PROFILES: &[HostProfile] = &[
    HostProfile {
        matches: &["google."],
        // Fail fast: search pages either answer quickly or block us.
        timeout: Duration::from_secs(8),
        extra_headers: &[
            ("Referer", "https://www.google.com/"),
            ("DNT", "1"),
            ("Sec-Fetch-Site", "same-origin"),
        ],
        host_substitutes: &[],
        css_patch: Some(
            "#searchform { position: relative !important; }\n\
             #gb { position: relative !important; }\n\
             .g { margin-bottom: 15px !important; }",
        ),
        cooldown: Some(Duration::from_secs(2)),
        alternatives: &[
            ("DuckDuckGo", "https://duckduckgo.com/"),
            ("Startpage", "https://www.startpage.com/"),
            ("Ecosia", "https://www.ecosia.org/"),
        ],
        html_cache: CacheClass::SearchHtml,
    },
    HostProfile {
        matches: &["youtube.com", "youtu.be"],
        timeout: Duration::from_secs(10),
        extra_headers: &[
            ("Origin", "https://www.youtube.com"),
            ("Referer", "https://www.youtube.com/"),
            ("X-YouTube-Client-Name", "1"),
            ("X-YouTube-Client-Version", "2.20231214.04.00"),
            ("X-Requested-With", "XMLHttpRequest"),
            ("DNT", "1"),
        ],
        host_substitutes: &[
            ("www.youtube.com", "m.youtube.com"),
            ("youtube.com", "m.youtube.com"),
        ],
        css_patch: Some(
            "#masthead, .ytd-masthead { position: relative !important; top: 0 !important; }\n\
             .ytd-app { padding-top: 0 !important; }",
        ),
        cooldown: None,
        alternatives: &[],
        html_cache: CacheClass::NoStore,
    },
];

pub fn profile_for(hostname: &str) -> &'static HostProfile {
    let hostname = hostname.to_ascii_lowercase();
    PROFILES
        .iter()
        .find(|profile| profile.matches.iter().any(|m| hostname.contains(m)))
        .unwrap_or(&DEFAULT_PROFILE)
}

impl HostProfile {
    pub fn substitute_host(&self, hostname: &str) -> Option<&'static str> {
        self.host_substitutes
            .iter()
            .find(|(from, _)| hostname.eq_ignore_ascii_case(from))
            .map(|(_, to)| *to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn google_matches_get_short_timeout_and_cooldown() {
        let profile = profile_for("www.google.com");
        assert_eq!(profile.timeout, Duration::from_secs(8));
        assert!(profile.cooldown.is_some());
        assert!(!profile.alternatives.is_empty());
    }

    #[test]
    fn youtube_is_steered_to_mobile_host() {
        let profile = profile_for("www.youtube.com");
        assert_eq!(profile.substitute_host("www.youtube.com"), Some("m.youtube.com"));
        assert_eq!(profile.substitute_host("music.youtube.com"), None);
    }

    #[test]
    fn unknown_hosts_get_the_default_profile() {
        let profile = profile_for("example.com");
        assert_eq!(profile.timeout, Duration::from_secs(10));
        assert!(profile.cooldown.is_none());
        assert_eq!(profile.html_cache, CacheClass::Html);
    }
}
