//! Supported gate sites.
//!
//! A compiled-in table mapping a site id to the gate base URL and the referer
//! the gate expects. Adding a site means adding one row to `SITES`.

use once_cell::sync::Lazy;
use regex::Regex;

/// Connection parameters for one gate site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteConfig {
    /// Registry key, e.g. `shr2link`
    pub id: &'static str,
    /// Prefix the cleaned path fragment is appended to
    pub gate_base_url: &'static str,
    /// Referer header the gate checks before serving the page
    pub referer: &'static str,
    /// Host of the public short links, used for detection
    pub short_host: &'static str,
}

static SITES: &[SiteConfig] = &[
    SiteConfig {
        id: "yorurl",
        gate_base_url: "https://go.yorurl.com/",
        referer: "https://how2guidess.com/",
        short_host: "yorurl.com",
    },
    SiteConfig {
        id: "linkjust",
        gate_base_url: "https://linkjust.com/",
        referer: "https://yjiur.xyz/",
        short_host: "linkjust.com",
    },
    SiteConfig {
        id: "shr2link",
        gate_base_url: "https://shr2link.com/",
        referer: "https://bigcarinsurance.com/",
        short_host: "shr2.link",
    },
    SiteConfig {
        id: "just2earn",
        gate_base_url: "https://go.just2earn.com/",
        referer: "https://mahitiportal.in/",
        short_host: "just2earn.com",
    },
    SiteConfig {
        id: "nitro-link",
        gate_base_url: "https://nitro-link.com/",
        referer: "https://finestart.online/",
        short_host: "nitro-link.com",
    },
];

static SCHEME_AND_HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^https?://[^/]*").expect("valid scheme regex"));

/// Look up a site by id.
pub fn lookup(id: &str) -> Option<&'static SiteConfig> {
    SITES.iter().find(|site| site.id == id)
}

/// Every supported site, in registry order.
pub fn all() -> &'static [SiteConfig] {
    SITES
}

/// Guess the site from a full short link by its host.
pub fn detect(url: &str) -> Option<&'static SiteConfig> {
    let lower = url.to_lowercase();
    SITES.iter().find(|site| lower.contains(site.short_host))
}

/// Strip a leading `scheme://host` and any leading slashes from a path fragment.
///
/// Idempotent: cleaning an already-clean fragment returns it unchanged.
pub fn clean_path(fragment: &str) -> String {
    let trimmed = fragment.trim();
    let without_host = SCHEME_AND_HOST.replace(trimmed, "");
    without_host.trim_start_matches('/').to_string()
}

/// Full gate URL for a site and a (possibly dirty) path fragment.
pub fn gate_url(site: &SiteConfig, fragment: &str) -> String {
    format!("{}{}", site.gate_base_url, clean_path(fragment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_lookup_known_and_unknown() {
        let site = lookup("shr2link").unwrap();
        assert_eq!(site.gate_base_url, "https://shr2link.com/");
        assert_eq!(site.referer, "https://bigcarinsurance.com/");
        assert!(lookup("bitly").is_none());
        assert!(lookup("").is_none());
        assert!(lookup("SHR2LINK").is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<_> = all().iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), all().len());
    }

    #[test]
    fn test_detect_from_short_link() {
        assert_eq!(detect("https://shr2.link/89BVVVXW").map(|s| s.id), Some("shr2link"));
        assert_eq!(detect("HTTPS://LinkJust.com/abc").map(|s| s.id), Some("linkjust"));
        assert_eq!(detect("https://go.just2earn.com/x").map(|s| s.id), Some("just2earn"));
        assert!(detect("https://example.com/abc").is_none());
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("89BVVVXW"), "89BVVVXW");
        assert_eq!(clean_path("/89BVVVXW"), "89BVVVXW");
        assert_eq!(clean_path("https://shr2.link/89BVVVXW"), "89BVVVXW");
        assert_eq!(clean_path("http://linkjust.com//abc?x=1"), "abc?x=1");
        assert_eq!(clean_path("https://shr2.link"), "");
        assert_eq!(clean_path("  abc  "), "abc");
    }

    #[test]
    fn test_clean_path_is_idempotent() {
        for raw in ["https://nitro-link.com/q1w2", "/q1w2", "q1w2/extra"] {
            let once = clean_path(raw);
            assert_eq!(clean_path(&once), once);
        }
    }

    #[test]
    fn test_gate_url_concatenation() {
        let site = lookup("linkjust").unwrap();
        assert_eq!(gate_url(site, "abc"), "https://linkjust.com/abc");
        assert_eq!(gate_url(site, "https://linkjust.com/abc"), "https://linkjust.com/abc");
        let site = lookup("yorurl").unwrap();
        assert_eq!(gate_url(site, "/Zx9"), "https://go.yorurl.com/Zx9");
    }
}
