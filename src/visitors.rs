//! Visitor tracking for the landing page.
//!
//! Remembers every `ip + user-agent` pair seen since startup and, for new ones,
//! builds a short report (platform, location) for the notifier.

use axum::http::HeaderMap;
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::notifications::escape_html;

/// In-memory seen-before set. Lives as long as the process.
#[derive(Debug, Default)]
pub struct VisitorLog {
    seen: Mutex<HashSet<String>>,
}

impl VisitorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the visitor and reports whether it was seen for the first time.
    pub fn is_new(&self, ip: &str, user_agent: &str) -> bool {
        let key = format!("{}-{}", ip, user_agent);
        match self.seen.lock() {
            Ok(mut seen) => seen.insert(key),
            Err(poisoned) => poisoned.into_inner().insert(key),
        }
    }
}

/// Client address, preferring proxy headers over the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let raw = header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "Unknown IP".to_string());

    normalize_ip(&raw)
}

/// First address of a forwarded list, with IPv4-mapped and loopback IPv6 unwrapped.
pub fn normalize_ip(raw: &str) -> String {
    let first = raw.split(',').next().unwrap_or(raw).trim();
    let first = first.strip_prefix("::ffff:").unwrap_or(first);
    if first == "::1" {
        "127.0.0.1".to_string()
    } else {
        first.to_string()
    }
}

/// Loopback and private ranges never go to the geolocation service.
pub fn is_local(ip: &str) -> bool {
    ip == "127.0.0.1"
        || ip == "localhost"
        || ip.starts_with("192.168.")
        || ip.starts_with("10.")
        || ip.starts_with("172.")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub browser: String,
}

static OS_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"Windows NT ([\d.]+)", "Windows"),
        (r"(?:iPhone|CPU) OS ([\d_]+)", "iOS"),
        (r"Android ([\d.]+)", "Android"),
        (r"CrOS", "ChromeOS"),
        (r"Mac OS X ([\d_.]+)", "macOS"),
        (r"Linux", "Linux"),
    ]
    .iter()
    .map(|(pattern, name)| (Regex::new(pattern).expect("valid os regex"), *name))
    .collect()
});

static BROWSER_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"Edg(?:e|A|iOS)?/([\d.]+)", "Edge"),
        (r"OPR/([\d.]+)", "Opera"),
        (r"SamsungBrowser/([\d.]+)", "Samsung Internet"),
        (r"UCBrowser/([\d.]+)", "UC Browser"),
        (r"Firefox/([\d.]+)", "Firefox"),
        (r"Chrome/([\d.]+)", "Chrome"),
        (r"Version/([\d.]+).*Safari", "Safari"),
    ]
    .iter()
    .map(|(pattern, name)| (Regex::new(pattern).expect("valid browser regex"), *name))
    .collect()
});

/// OS and browser names with up to two version components.
pub fn describe_user_agent(user_agent: &str) -> Platform {
    Platform {
        os: first_match(&OS_PATTERNS, user_agent, windows_release)
            .unwrap_or_else(|| "Unknown OS".to_string()),
        browser: first_match(&BROWSER_PATTERNS, user_agent, |_, v| v.to_string())
            .unwrap_or_else(|| "Unknown Browser".to_string()),
    }
}

fn first_match(
    patterns: &[(Regex, &'static str)],
    user_agent: &str,
    version_label: impl Fn(&str, &str) -> String,
) -> Option<String> {
    patterns.iter().find_map(|(re, name)| {
        let caps = re.captures(user_agent)?;
        let label = match caps.get(1) {
            Some(version) => {
                let version = short_version(version.as_str());
                format!("{} {}", name, version_label(name, &version))
            }
            None => name.to_string(),
        };
        Some(label)
    })
}

fn windows_release(name: &str, version: &str) -> String {
    if name != "Windows" {
        return version.to_string();
    }
    match version {
        "10.0" => "10".to_string(),
        "6.3" => "8.1".to_string(),
        "6.2" => "8".to_string(),
        "6.1" => "7".to_string(),
        other => other.to_string(),
    }
}

fn short_version(raw: &str) -> String {
    raw.split(['.', '_'])
        .filter(|part| !part.is_empty())
        .take(2)
        .collect::<Vec<_>>()
        .join(".")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoLocation {
    pub country: String,
    pub region: String,
    pub city: String,
    pub isp: String,
    pub timezone: String,
}

impl GeoLocation {
    fn filled(value: &str) -> Self {
        Self {
            country: value.to_string(),
            region: value.to_string(),
            city: value.to_string(),
            isp: value.to_string(),
            timezone: value.to_string(),
        }
    }

    pub fn unknown() -> Self {
        Self::filled("Unknown")
    }

    pub fn local() -> Self {
        Self {
            region: "Local Network".to_string(),
            ..Self::filled("Local")
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiReply {
    status: String,
    country: Option<String>,
    region_name: Option<String>,
    city: Option<String>,
    isp: Option<String>,
    timezone: Option<String>,
}

/// ip-api.com lookups.
#[derive(Clone)]
pub struct GeoLocator {
    client: reqwest::Client,
    enabled: bool,
}

impl GeoLocator {
    pub fn new(enabled: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, enabled }
    }

    pub async fn locate(&self, ip: &str) -> GeoLocation {
        if is_local(ip) {
            return GeoLocation::local();
        }
        if !self.enabled {
            return GeoLocation::unknown();
        }

        let url = format!(
            "http://ip-api.com/json/{}?fields=status,message,country,regionName,city,isp,timezone",
            ip
        );
        let reply = match self.client.get(&url).send().await {
            Ok(response) => response.json::<IpApiReply>().await,
            Err(e) => Err(e),
        };

        match reply {
            Ok(reply) if reply.status == "success" => {
                let or_unknown = |v: Option<String>| v.unwrap_or_else(|| "Unknown".to_string());
                GeoLocation {
                    country: or_unknown(reply.country),
                    region: or_unknown(reply.region_name),
                    city: or_unknown(reply.city),
                    isp: or_unknown(reply.isp),
                    timezone: or_unknown(reply.timezone),
                }
            }
            Ok(_) => GeoLocation::unknown(),
            Err(e) => {
                debug!(error = %e, ip, "geolocation lookup failed");
                GeoLocation::unknown()
            }
        }
    }
}

/// Everything the new-visitor report needs.
#[derive(Debug, Clone)]
pub struct Visitor {
    pub ip: String,
    pub user_agent: String,
    pub platform: Platform,
    pub location: GeoLocation,
    pub seen_at: DateTime<Local>,
}

impl Visitor {
    pub fn new(ip: String, user_agent: String, location: GeoLocation) -> Self {
        let platform = describe_user_agent(&user_agent);
        Self {
            ip,
            user_agent,
            platform,
            location,
            seen_at: Local::now(),
        }
    }

    /// Telegram HTML report.
    pub fn to_message(&self) -> String {
        let e = escape_html;
        format!(
            "🆕 <b>New Visitor</b>\n\n\
             📍 <b>IP:</b> <code>{}</code>\n\
             🏴 <b>Country:</b> {}\n\
             🏙️ <b>Region:</b> {}\n\
             🏢 <b>City:</b> {}\n\
             🌐 <b>ISP:</b> {}\n\
             🕒 <b>Timezone:</b> {}\n\n\
             🖥️ <b>OS:</b> {}\n\
             🌐 <b>Browser:</b> {}\n\
             🕒 <b>Time:</b> {}\n\n\
             📊 <b>User Agent:</b>\n<code>{}</code>",
            e(&self.ip),
            e(&self.location.country),
            e(&self.location.region),
            e(&self.location.city),
            e(&self.location.isp),
            e(&self.location.timezone),
            e(&self.platform.os),
            e(&self.platform.browser),
            self.seen_at.format("%Y-%m-%d %H:%M:%S"),
            e(&self.user_agent),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_visitor_seen_once() {
        let log = VisitorLog::new();
        assert!(log.is_new("1.2.3.4", "Mozilla/5.0"));
        assert!(!log.is_new("1.2.3.4", "Mozilla/5.0"));
        assert!(log.is_new("1.2.3.4", "curl/8.0"));
        assert!(!log.is_new("1.2.3.4", "curl/8.0"));
    }

    #[test]
    fn test_client_ip_precedence() {
        let peer: SocketAddr = "[::ffff:10.0.0.7]:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)), "10.0.0.7");
        assert_eq!(client_ip(&headers, None), "Unknown IP");

        headers.insert("x-real-ip", HeaderValue::from_static("8.8.4.4"));
        assert_eq!(client_ip(&headers, Some(peer)), "8.8.4.4");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.9");
    }

    #[test]
    fn test_normalize_ip() {
        assert_eq!(normalize_ip("::1"), "127.0.0.1");
        assert_eq!(normalize_ip("::ffff:192.168.1.5"), "192.168.1.5");
        assert!(is_local("192.168.1.5"));
        assert!(!is_local("8.8.8.8"));
    }

    #[test]
    fn test_describe_user_agent() {
        let chrome_win = describe_user_agent(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.6312.86 Safari/537.36",
        );
        assert_eq!(chrome_win.os, "Windows 10");
        assert_eq!(chrome_win.browser, "Chrome 123.0");

        let iphone = describe_user_agent(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Mobile/15E148 Safari/604.1",
        );
        assert_eq!(iphone.os, "iOS 17.4");
        assert_eq!(iphone.browser, "Safari 17.4");

        let android = describe_user_agent(
            "Mozilla/5.0 (Linux; Android 10; K) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
        );
        assert_eq!(android.os, "Android 10");

        let firefox_mac = describe_user_agent(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:124.0) Gecko/20100101 Firefox/124.0",
        );
        assert_eq!(firefox_mac.os, "macOS 10.15");
        assert_eq!(firefox_mac.browser, "Firefox 124.0");

        let unknown = describe_user_agent("curl/8.4.0");
        assert_eq!(unknown.os, "Unknown OS");
        assert_eq!(unknown.browser, "Unknown Browser");
    }

    #[tokio::test]
    async fn test_local_addresses_skip_lookup() {
        let geo = GeoLocator::new(true);
        assert_eq!(geo.locate("127.0.0.1").await, GeoLocation::local());
        let disabled = GeoLocator::new(false);
        assert_eq!(disabled.locate("8.8.8.8").await, GeoLocation::unknown());
    }

    #[test]
    fn test_report_escapes_user_agent() {
        let visitor = Visitor::new(
            "8.8.8.8".to_string(),
            "<script>x</script>".to_string(),
            GeoLocation::unknown(),
        );
        let message = visitor.to_message();
        assert!(message.contains("<code>8.8.8.8</code>"));
        assert!(message.contains("&lt;script&gt;"));
        assert!(!message.contains("<script>"));
    }
}
