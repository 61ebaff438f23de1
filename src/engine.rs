//! Link resolution engine.
//!
//! One [`Resolver::resolve`] call is one attempt: build the gate URL, open a
//! dedicated rendering session, load the gate with the site's referer, then run
//! the configured extraction stages (dwell, snapshot, scan) until one of them
//! yields the target URL. The session is closed before `resolve` returns, on
//! every path.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, field, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::browser::{GateSession, SessionFactory};
use crate::config::{ExtractionStage, ResolverConfig};
use crate::extract::find_candidate;
use crate::sites::{self, SiteConfig};
use crate::stealth::BrowserIdentity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// Unknown site id; not worth retrying
    #[error("site '{0}' is not supported")]
    UnsupportedSite(String),
    /// The gate rendered but no stage found an action element
    #[error("no download link found on the gate page")]
    NotFound,
    /// Launch, navigation or page evaluation failed; safe to retry
    #[error("rendering session failed: {0}")]
    SessionFailure(String),
}

impl ResolutionError {
    /// Stable name used at the HTTP boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolutionError::UnsupportedSite(_) => "UnsupportedSite",
            ResolutionError::NotFound => "NotFound",
            ResolutionError::SessionFailure(_) => "SessionFailure",
        }
    }

    fn session(context: &str, err: anyhow::Error) -> Self {
        ResolutionError::SessionFailure(format!("{}: {:#}", context, err))
    }
}

/// A successfully resolved short link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLink {
    /// Final destination revealed by the gate
    pub url: String,
    /// Gate page that was rendered
    pub gate_url: String,
    /// Extraction stage that found it
    pub stage: &'static str,
}

/// Where an attempt is in its lifecycle. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Constructing,
    Navigating,
    Extracting(&'static str),
    Resolved,
    Failed,
}

#[derive(Debug)]
struct Progress {
    phase: Phase,
}

impl Progress {
    fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    fn advance(&mut self, next: Phase) {
        debug!(from = ?self.phase, to = ?next, "phase");
        self.phase = next;
    }
}

pub struct Resolver {
    sessions: Arc<dyn SessionFactory>,
    identity: BrowserIdentity,
    config: ResolverConfig,
    stages: Vec<ExtractionStage>,
}

impl Resolver {
    pub fn new(sessions: Arc<dyn SessionFactory>, config: ResolverConfig) -> Self {
        let stages = config.stages();
        Self {
            sessions,
            identity: BrowserIdentity::default(),
            config,
            stages,
        }
    }

    pub fn with_identity(mut self, identity: BrowserIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve `path_fragment` on `site` to the link hidden behind its gate.
    pub async fn resolve(
        &self,
        site: &str,
        path_fragment: &str,
    ) -> Result<ResolvedLink, ResolutionError> {
        let span = info_span!(
            "resolve",
            attempt = %Uuid::new_v4(),
            site,
            gate_url = field::Empty
        );
        async move {
            let mut progress = Progress::new();
            let outcome = self.attempt(&mut progress, site, path_fragment).await;
            match &outcome {
                Ok(link) => {
                    progress.advance(Phase::Resolved);
                    info!(url = %link.url, stage = link.stage, "✅ Gate resolved");
                }
                Err(e) => {
                    progress.advance(Phase::Failed);
                    warn!(kind = e.kind(), error = %e, "❌ Gate not resolved");
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn attempt(
        &self,
        progress: &mut Progress,
        site: &str,
        path_fragment: &str,
    ) -> Result<ResolvedLink, ResolutionError> {
        progress.advance(Phase::Constructing);
        let site = sites::lookup(site)
            .ok_or_else(|| ResolutionError::UnsupportedSite(site.to_string()))?;
        let gate_url = sites::gate_url(site, path_fragment);
        Span::current().record("gate_url", gate_url.as_str());
        info!("🔗 Opening gate");

        let mut session = self
            .sessions
            .open(&self.identity)
            .await
            .map_err(|e| ResolutionError::session("launch", e))?;

        let outcome = self
            .drive(session.as_mut(), progress, site, &gate_url)
            .await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "session teardown reported an error");
        }
        outcome
    }

    async fn drive(
        &self,
        session: &mut dyn GateSession,
        progress: &mut Progress,
        site: &SiteConfig,
        gate_url: &str,
    ) -> Result<ResolvedLink, ResolutionError> {
        progress.advance(Phase::Navigating);
        session
            .set_referer(site.referer)
            .await
            .map_err(|e| ResolutionError::session("referer", e))?;
        session
            .navigate(gate_url, self.config.navigation_timeout)
            .await
            .map_err(|e| ResolutionError::session("navigation", e))?;

        for stage in &self.stages {
            progress.advance(Phase::Extracting(stage.name));
            if !stage.dwell.is_zero() {
                debug!(stage = stage.name, dwell = ?stage.dwell, "waiting for gate timers");
                sleep(stage.dwell).await;
            }

            let snapshot = session
                .snapshot()
                .await
                .map_err(|e| ResolutionError::session("snapshot", e))?;

            match find_candidate(&snapshot, &stage.phrases, stage.rules) {
                Some(candidate) => {
                    debug!(
                        stage = stage.name,
                        tag = %candidate.tag,
                        phrase = %candidate.phrase,
                        source = ?candidate.source,
                        position = candidate.position,
                        "candidate found"
                    );
                    return Ok(ResolvedLink {
                        url: candidate.url,
                        gate_url: gate_url.to_string(),
                        stage: stage.name,
                    });
                }
                None => debug!(
                    stage = stage.name,
                    elements = snapshot.elements.len(),
                    "no candidate"
                ),
            }
        }

        Err(ResolutionError::NotFound)
    }
}
