//! Rendering session abstraction.
//!
//! The resolution engine only talks to these traits; `chromium` provides the
//! Headless Chrome implementation and tests use a scripted in-memory one.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::extract::DocumentSnapshot;
use crate::stealth::BrowserIdentity;

/// Opens isolated, single-use rendering sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Launch a fresh session presenting `identity`.
    async fn open(&self, identity: &BrowserIdentity) -> Result<Box<dyn GateSession>>;
}

/// One browser tab owned by exactly one resolution attempt.
#[async_trait]
pub trait GateSession: Send {
    /// Send `referer` with the navigation request.
    async fn set_referer(&mut self, referer: &str) -> Result<()>;
    /// Load `url`, failing if the document has not loaded within `timeout`.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;
    /// Capture the current DOM.
    async fn snapshot(&mut self) -> Result<DocumentSnapshot>;
    /// Tear the session down.
    async fn close(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted sessions that serve canned snapshots and record what the
    //! engine did with them.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    pub struct SessionLog {
        pub opened: AtomicUsize,
        pub closed: AtomicUsize,
        pub snapshots: AtomicUsize,
        pub referers: Mutex<Vec<String>>,
        pub navigations: Mutex<Vec<String>>,
    }

    impl SessionLog {
        pub fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        pub fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }

        pub fn snapshots(&self) -> usize {
            self.snapshots.load(Ordering::SeqCst)
        }

        pub fn navigations(&self) -> Vec<String> {
            self.navigations.lock().unwrap().clone()
        }

        pub fn referers(&self) -> Vec<String> {
            self.referers.lock().unwrap().clone()
        }
    }

    #[derive(Clone, Default)]
    pub struct ScriptedBrowser {
        /// Served one per `snapshot` call; the last one repeats
        pages: Vec<DocumentSnapshot>,
        fail_open: bool,
        fail_navigation: bool,
        fail_snapshot: bool,
        pub log: Arc<SessionLog>,
    }

    impl ScriptedBrowser {
        pub fn serving(pages: Vec<DocumentSnapshot>) -> Self {
            Self {
                pages,
                ..Default::default()
            }
        }

        /// Serves the same HTML page for every snapshot.
        pub fn serving_html(html: &str) -> Self {
            Self::serving(vec![DocumentSnapshot::from_html(html, "")])
        }

        pub fn failing_launch() -> Self {
            Self {
                fail_open: true,
                ..Default::default()
            }
        }

        pub fn failing_navigation() -> Self {
            Self {
                fail_navigation: true,
                ..Default::default()
            }
        }

        pub fn failing_snapshot() -> Self {
            Self {
                fail_snapshot: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl SessionFactory for ScriptedBrowser {
        async fn open(&self, _identity: &BrowserIdentity) -> Result<Box<dyn GateSession>> {
            if self.fail_open {
                anyhow::bail!("chrome executable not found");
            }
            self.log.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedSession {
                pages: self.pages.iter().cloned().collect(),
                last: DocumentSnapshot::default(),
                current_url: String::new(),
                fail_navigation: self.fail_navigation,
                fail_snapshot: self.fail_snapshot,
                log: self.log.clone(),
            }))
        }
    }

    struct ScriptedSession {
        pages: VecDeque<DocumentSnapshot>,
        last: DocumentSnapshot,
        current_url: String,
        fail_navigation: bool,
        fail_snapshot: bool,
        log: Arc<SessionLog>,
    }

    #[async_trait]
    impl GateSession for ScriptedSession {
        async fn set_referer(&mut self, referer: &str) -> Result<()> {
            self.log.referers.lock().unwrap().push(referer.to_string());
            Ok(())
        }

        async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
            self.log.navigations.lock().unwrap().push(url.to_string());
            if self.fail_navigation {
                anyhow::bail!("navigation to {} timed out after {:?}", url, timeout);
            }
            self.current_url = url.to_string();
            Ok(())
        }

        async fn snapshot(&mut self) -> Result<DocumentSnapshot> {
            self.log.snapshots.fetch_add(1, Ordering::SeqCst);
            if self.fail_snapshot {
                anyhow::bail!("Runtime.evaluate failed: target closed");
            }
            if let Some(next) = self.pages.pop_front() {
                self.last = next;
            }
            let mut page = self.last.clone();
            if page.url.is_empty() {
                page.url = self.current_url.clone();
            }
            Ok(page)
        }

        async fn close(self: Box<Self>) -> Result<()> {
            self.log.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
