//! Classification of ad, tracking, and otherwise undesirable sub-requests.

use once_cell::sync::Lazy;
use regex::{RegexSet, RegexSetBuilder};

use crate::{GatewayError, Result};

/// Built-in patterns, matched case-insensitively against the full request URL.
pub const DEFAULT_PATTERNS: &[&str] = &[
    r"[/.]google-analytics\.com/",
    r"[/.]googletagmanager\.com/",
    r"[/.]googletagservices\.com/",
    r"[/.]googlesyndication\.com/",
    r"[/.]googleadservices\.com/",
    r"[/.]doubleclick\.net/",
    r"[/.]adservice\.google\.",
    r"[/.]analytics\.google\.com/",
    r"[/.]connect\.facebook\.net/",
    r"[/.]facebook\.com/tr[/?]",
    r"[/.]platform\.twitter\.com/",
    r"[/.]static\.ads-twitter\.com/",
    r"[/.]analytics\.twitter\.com/",
    r"[/.]platform\.linkedin\.com/",
    r"[/.]snap\.licdn\.com/",
    r"[/.]bat\.bing\.com/",
    r"[/.]clarity\.ms/",
    r"[/.]hotjar\.com/",
    r"[/.]mc\.yandex\.ru/",
    r"[/.]quantserve\.com/",
    r"[/.]scorecardresearch\.com/",
    r"[/.]chartbeat\.(com|net)/",
    r"[/.]newrelic\.com/",
    r"[/.]nr-data\.net/",
    r"[/.]segment\.(com|io)/",
    r"[/.]mixpanel\.com/",
    r"[/.]amplitude\.com/",
    r"[/.]optimizely\.com/",
    r"[/.]crazyegg\.com/",
    r"[/.]mouseflow\.com/",
    r"[/.]fullstory\.com/",
    r"[/.]taboola\.com/",
    r"[/.]outbrain\.com/",
    r"[/.]adnxs\.com/",
    r"[/.]criteo\.(com|net)/",
    r"[/.]amazon-adsystem\.com/",
    r"[/.]pubmatic\.com/",
    r"[/.]rubiconproject\.com/",
    r"[/.]moatads\.com/",
    r"[/.]disqus\.com/",
    r"[/.]disquscdn\.com/",
    r"[/.]addthis\.com/",
    r"[/.]sharethis\.com/",
    r"[/.]intercom\.io/",
    r"[/.]intercomcdn\.com/",
    r"[/.]zopim\.com/",
    r"[/.]tawk\.to/",
    r"[/.]youtube\.com/(embed|iframe_api)",
    r"[/.]player\.vimeo\.com/",
    r"[/.]stats\.wp\.com/",
    r"[/.]pixel\.wp\.com/",
    r"/ga\.js(\?|$)",
    r"/analytics\.js(\?|$)",
    r"/gtag/js",
    r"/pagead/",
    r"/beacon(\.js)?(\?|$)",
];

static DEFAULT_SET: Lazy<std::result::Result<RegexSet, regex::Error>> =
    Lazy::new(|| compile(DEFAULT_PATTERNS.iter().copied()));

fn compile<'a>(
    patterns: impl IntoIterator<Item = &'a str>,
) -> std::result::Result<RegexSet, regex::Error> {
    RegexSetBuilder::new(patterns).case_insensitive(true).build()
}

/// Immutable set of URL patterns. Matching has no side effects.
#[derive(Debug, Clone)]
pub struct BlockList {
    set: RegexSet,
}

impl BlockList {
    /// The built-in pattern list plus `extra` user patterns.
    pub fn with_patterns<S: AsRef<str>>(extra: &[S]) -> Result<Self> {
        let patterns = DEFAULT_PATTERNS
            .iter()
            .copied()
            .chain(extra.iter().map(AsRef::as_ref));
        let set = compile(patterns)
            .map_err(|err| GatewayError::Config(format!("Invalid blocklist pattern: {err}")))?;
        Ok(Self { set })
    }

    pub fn is_blocked(&self, url: &str) -> bool {
        self.set.is_match(url)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

impl Default for BlockList {
    fn default() -> Self {
        let set = match DEFAULT_SET.as_ref() {
            Ok(set) => set.clone(),
            Err(_) => RegexSet::empty(),
        };
        Self { set }
    }
}
