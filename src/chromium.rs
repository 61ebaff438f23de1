//! Headless Chrome rendering sessions.
//!
//! Each session is its own Chrome process with one incognito tab. `headless_chrome`
//! is a blocking client, so every call is shipped to the blocking pool; a panic
//! inside it comes back as an ordinary error. Dropping a [`ChromeSession`] kills
//! the process even if `close` was never reached.

use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::browser::{GateSession, SessionFactory};
use crate::extract::{DocumentSnapshot, SNAPSHOT_JS};
use crate::stealth::BrowserIdentity;

/// Launches one Chrome process per session.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    /// Chrome/Chromium executable; auto-detected when `None`
    pub path: Option<PathBuf>,
    pub headless: bool,
    /// How long the DevTools connection may stay silent, which must cover
    /// the longest dwell period
    pub idle_timeout: Duration,
}

impl ChromeLauncher {
    pub fn new(path: Option<PathBuf>, headless: bool, idle_timeout: Duration) -> Self {
        Self {
            path,
            headless,
            idle_timeout,
        }
    }
}

#[async_trait]
impl SessionFactory for ChromeLauncher {
    async fn open(&self, identity: &BrowserIdentity) -> Result<Box<dyn GateSession>> {
        let launcher = self.clone();
        let identity = identity.clone();
        let session = blocking(move || launcher.launch(&identity)).await?;
        Ok(Box::new(session))
    }
}

impl ChromeLauncher {
    fn launch(&self, identity: &BrowserIdentity) -> Result<ChromeSession> {
        let mut flags = identity.launch_args();
        if self.headless {
            // New headless mode shares the regular Chrome fingerprint
            flags.push("--headless=new".to_string());
        }
        let args: Vec<&OsStr> = flags.iter().map(OsStr::new).collect();

        debug!(identity = identity.version, path = ?self.path, "launching chrome");
        let browser = Browser::new(LaunchOptions {
            headless: false,
            window_size: Some(identity.window_size),
            path: self.path.clone(),
            idle_browser_timeout: self.idle_timeout,
            args,
            ..Default::default()
        })
        .context("failed to launch chrome")?;

        let tab = browser.new_tab().context("failed to open tab")?;

        tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
            source: identity.injection_script(),
            world_name: None,
            include_command_line_api: None,
            run_immediately: None,
        })
        .context("failed to install stealth script")?;

        tab.set_user_agent(
            identity.user_agent,
            Some(identity.accept_language),
            Some(identity.platform),
        )
        .context("failed to override user agent")?;

        Ok(ChromeSession { browser, tab })
    }
}

pub struct ChromeSession {
    browser: Browser,
    tab: Arc<Tab>,
}

#[async_trait]
impl GateSession for ChromeSession {
    async fn set_referer(&mut self, referer: &str) -> Result<()> {
        let tab = self.tab.clone();
        let referer = referer.to_string();
        blocking(move || {
            let headers = HashMap::from([("Referer", referer.as_str())]);
            tab.set_extra_http_headers(headers)
                .context("failed to set referer header")
        })
        .await
    }

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        let tab = self.tab.clone();
        let url = url.to_string();
        blocking(move || {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&url)
                .with_context(|| format!("failed to start navigation to {}", url))?;
            tab.wait_until_navigated()
                .with_context(|| format!("navigation to {} did not finish within {:?}", url, timeout))?;
            Ok(())
        })
        .await
    }

    async fn snapshot(&mut self) -> Result<DocumentSnapshot> {
        let tab = self.tab.clone();
        blocking(move || capture_snapshot(&tab)).await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromeSession { browser, tab } = *self;
        blocking(move || {
            if let Err(e) = tab.close(false) {
                debug!(error = %e, "tab close failed, killing browser anyway");
            }
            drop(browser);
            Ok(())
        })
        .await
    }
}

/// Snapshot through the page script, falling back to parsing the serialized DOM.
fn capture_snapshot(tab: &Tab) -> Result<DocumentSnapshot> {
    match tab.evaluate(SNAPSHOT_JS, false) {
        Ok(result) => match result.value {
            Some(serde_json::Value::String(raw)) => match DocumentSnapshot::from_json(&raw) {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => warn!(error = %e, "unreadable page snapshot, parsing HTML instead"),
            },
            other => warn!(value = ?other, "snapshot script returned no JSON, parsing HTML instead"),
        },
        Err(e) => warn!(error = %e, "snapshot script failed, parsing HTML instead"),
    }

    let html = tab.get_content().context("failed to read page HTML")?;
    Ok(DocumentSnapshot::from_html(&html, &tab.get_url()))
}

async fn blocking<T, F>(job: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .context("browser task panicked")?
}
