//! Runtime configuration from the environment (and `.env` via dotenv).
//!
//! | Variable | Default |
//! |---|---|
//! | `PORT` | `3000` |
//! | `STATIC_DIR` | `public` |
//! | `MAX_SESSIONS` | `2` |
//! | `NAVIGATION_TIMEOUT_MS` | `60000` |
//! | `SETTLE_DELAY_MS` | `8000` |
//! | `RETRY_DELAY_MS` | `6000` |
//! | `CHROMIUM_PATH` | auto-detect |
//! | `HEADLESS` | `true` |
//! | `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID` | notifications off |
//! | `GEO_LOOKUP` | `true` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::extract::{PhraseSet, TargetRules};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub static_dir: PathBuf,
    /// Upper bound on concurrently open rendering sessions
    pub max_sessions: usize,
    pub resolver: ResolverConfig,
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    pub telegram: Option<TelegramConfig>,
    pub geo_lookup: bool,
}

/// Timing of one resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    pub navigation_timeout: Duration,
    /// Dwell between page load and the strict scan
    pub settle_delay: Duration,
    /// Extra dwell before the relaxed scan
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

/// One scan of the rendered page: wait `dwell`, then look for `phrases`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionStage {
    pub name: &'static str,
    pub dwell: Duration,
    pub phrases: PhraseSet,
    pub rules: TargetRules,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(60),
            settle_delay: Duration::from_secs(8),
            retry_delay: Duration::from_secs(6),
        }
    }
}

impl ResolverConfig {
    /// Ordered scans the engine runs until one yields a URL.
    pub fn stages(&self) -> Vec<ExtractionStage> {
        vec![
            ExtractionStage {
                name: "strict",
                dwell: self.settle_delay,
                phrases: PhraseSet::strict(),
                rules: TargetRules::strict(),
            },
            ExtractionStage {
                name: "relaxed",
                dwell: self.retry_delay,
                phrases: PhraseSet::relaxed(),
                rules: TargetRules::relaxed(),
            },
        ]
    }

    /// Longest a session may sit without browser traffic.
    pub fn idle_budget(&self) -> Duration {
        self.navigation_timeout + self.settle_delay + self.retry_delay + Duration::from_secs(30)
    }

    /// No dwell at all; used by tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(5),
            settle_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let millis = |key: &str, default: Duration| {
            parsed::<u64>(key, get(key))
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        let defaults = ResolverConfig::default();
        let resolver = ResolverConfig {
            navigation_timeout: millis("NAVIGATION_TIMEOUT_MS", defaults.navigation_timeout),
            settle_delay: millis("SETTLE_DELAY_MS", defaults.settle_delay),
            retry_delay: millis("RETRY_DELAY_MS", defaults.retry_delay),
        };

        let telegram = match (get("TELEGRAM_BOT_TOKEN"), get("TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig { bot_token, chat_id }),
            _ => None,
        };

        Self {
            port: parsed("PORT", get("PORT")).unwrap_or(3000),
            static_dir: get("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("public")),
            max_sessions: parsed::<usize>("MAX_SESSIONS", get("MAX_SESSIONS"))
                .filter(|n| *n > 0)
                .unwrap_or(2),
            resolver,
            chrome_path: get("CHROMIUM_PATH").map(PathBuf::from),
            headless: flag("HEADLESS", get("HEADLESS")).unwrap_or(true),
            telegram,
            geo_lookup: flag("GEO_LOOKUP", get("GEO_LOOKUP")).unwrap_or(true),
        }
    }
}

fn parsed<T: FromStr>(key: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("⚠️ Ignoring invalid {}={:?}, using default", key, raw);
            None
        }
    }
}

fn flag(key: &str, raw: Option<String>) -> Option<bool> {
    let raw = raw?;
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!("⚠️ Ignoring invalid {}={:?}, using default", key, raw);
            None
        }
    }
}
