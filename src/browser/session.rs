//! One page's navigate, extract, close lifecycle.
//!
//! A [`RenderSession`] moves through
//! `launching -> navigating -> extracting -> closing -> done | failed`.
//! While navigating and extracting, a watcher task answers every paused
//! sub-request through [`filter::decide`] and raises the redirect-loop
//! guard when a response points back at the gateway itself.
//!
//! [`RenderSession::close`] consumes the session, so closing happens exactly
//! once on every path. A session dropped without being closed detaches its
//! watcher and closes the page in the background.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use super::filter::{self, AbortReason, RequestBudget, RequestFacts, Verdict};
use super::sanitize::sanitize_document;
use super::scripts::{NEUTRALIZE_SCRIPT, PAUSE_MEDIA_SCRIPT};
use crate::blocklist::BlockList;
use crate::engine::{BrowserHandle, InterceptedRequest, NetworkEvent, PageHandle};
use crate::target::RenderTarget;
use crate::{GatewayError, Result};

/// Default deadline for navigation plus network settling.
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for document extraction.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for each best-effort cleanup step.
pub const CLEANUP_STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// When navigation counts as settled: no more than `max_inflight` allowed
/// requests outstanding for `quiet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkIdle {
    pub quiet: Duration,
    pub max_inflight: usize,
}

impl Default for NetworkIdle {
    fn default() -> Self {
        Self {
            quiet: Duration::from_millis(500),
            max_inflight: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub budget: RequestBudget,
    pub navigation_timeout: Duration,
    pub render_timeout: Duration,
    pub idle: NetworkIdle,
    pub blocklist: Arc<BlockList>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            budget: RequestBudget::default(),
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            render_timeout: DEFAULT_RENDER_TIMEOUT,
            idle: NetworkIdle::default(),
            blocklist: Arc::new(BlockList::default()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Launching,
    Navigating,
    Extracting,
    Closing,
    Done,
    Failed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Launching => "launching",
            SessionPhase::Navigating => "navigating",
            SessionPhase::Extracting => "extracting",
            SessionPhase::Closing => "closing",
            SessionPhase::Done => "done",
            SessionPhase::Failed => "failed",
        }
    }
}

struct SessionState {
    started: Instant,
    allowed: AtomicUsize,
    extracted: AtomicBool,
    redirect_loop: Notify,
}

pub struct RenderSession {
    page: Arc<dyn PageHandle>,
    target: RenderTarget,
    policy: SessionPolicy,
    gateway_host: Option<String>,
    state: Arc<SessionState>,
    cancel: CancellationToken,
    watcher: Option<JoinHandle<()>>,
    phase: SessionPhase,
    produced: bool,
    closed: bool,
}

impl RenderSession {
    /// Opens a fresh page on `browser` for `target`.
    pub async fn open(
        browser: &dyn BrowserHandle,
        target: &RenderTarget,
        policy: SessionPolicy,
        gateway_host: Option<String>,
    ) -> Result<Self> {
        debug!(url = %target.key, phase = SessionPhase::Launching.as_str(), "render session");
        let page = browser.new_page().await.map_err(|err| match err {
            GatewayError::TransportFault(_) => err,
            other => GatewayError::BrowserUnavailable(other.to_string()),
        })?;

        Ok(Self {
            page,
            target: target.clone(),
            policy,
            gateway_host: gateway_host.map(|host| host.to_ascii_lowercase()),
            state: Arc::new(SessionState {
                started: Instant::now(),
                allowed: AtomicUsize::new(0),
                extracted: AtomicBool::new(false),
                redirect_loop: Notify::new(),
            }),
            cancel: CancellationToken::new(),
            watcher: None,
            phase: SessionPhase::Launching,
            produced: false,
            closed: false,
        })
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Requests the page has been allowed to send so far.
    pub fn allowed_requests(&self) -> usize {
        self.state.allowed.load(Ordering::SeqCst)
    }

    fn enter(&mut self, phase: SessionPhase) {
        self.phase = phase;
        debug!(
            url = %self.target.key,
            phase = phase.as_str(),
            elapsed_ms = self.state.started.elapsed().as_millis() as u64,
            "render session"
        );
    }

    /// Navigates to the target and extracts the document.
    pub async fn render(&mut self) -> Result<String> {
        let result = self.navigate_and_extract().await;
        self.produced = result.is_ok();
        result
    }

    async fn navigate_and_extract(&mut self) -> Result<String> {
        self.enter(SessionPhase::Navigating);
        self.page.set_viewport(self.target.options.viewport).await?;
        let mut inflight = self.attach().await?;

        let page = Arc::clone(&self.page);
        let url = self.target.navigation_url().to_string();
        let idle = self.policy.idle;
        let navigation = async move {
            page.goto(&url).await?;
            wait_for_idle(&mut inflight, idle).await;
            Ok::<(), GatewayError>(())
        };

        let state = Arc::clone(&self.state);
        let deadline = self.policy.navigation_timeout;
        tokio::select! {
            biased;
            _ = state.redirect_loop.notified() => return Err(GatewayError::InfiniteRedirect),
            outcome = timeout(deadline, navigation) => match outcome {
                Ok(result) => result?,
                Err(_) => return Err(GatewayError::RenderTimeout(deadline)),
            },
        }

        if let Err(err) = self.page.evaluate_in_frames(PAUSE_MEDIA_SCRIPT).await {
            debug!(url = %self.target.key, error = %err, "could not pause media");
        }

        self.enter(SessionPhase::Extracting);
        let deadline = self.policy.render_timeout;
        let html = match timeout(deadline, self.extract()).await {
            Ok(result) => result?,
            Err(_) => return Err(GatewayError::RenderTimeout(deadline)),
        };
        self.state.extracted.store(true, Ordering::SeqCst);
        Ok(html)
    }

    async fn attach(&mut self) -> Result<watch::Receiver<usize>> {
        let events = self.page.intercept().await?;
        let (inflight_tx, inflight_rx) = watch::channel(0usize);
        let watcher = NetworkWatcher {
            page: Arc::clone(&self.page),
            state: Arc::clone(&self.state),
            budget: self.policy.budget,
            blocklist: Arc::clone(&self.policy.blocklist),
            gateway_host: self.gateway_host.clone(),
            url: self.target.key.to_string(),
            inflight: HashSet::new(),
            inflight_tx,
        };
        self.watcher = Some(tokio::spawn(watcher.run(events, self.cancel.clone())));
        Ok(inflight_rx)
    }

    async fn extract(&self) -> Result<String> {
        let html = self.page.content().await?;
        if self.target.options.raw {
            return Ok(html);
        }
        let resolved = match self.page.current_url().await {
            Ok(Some(current)) => Url::parse(&current).ok(),
            _ => None,
        };
        let base = resolved
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or_else(|| self.target.url.clone());
        sanitize_document(&html, &base)
    }

    /// Tears the page down. Never fails.
    ///
    /// `neutralize` silences the page's scripts first; pass it only when this
    /// render is about to populate the cache.
    pub async fn close(mut self, neutralize: bool) -> SessionPhase {
        self.enter(SessionPhase::Closing);
        self.state.extracted.store(true, Ordering::SeqCst);

        if neutralize && self.produced {
            best_effort(
                "neutralize scripts",
                self.page.evaluate_in_frames(NEUTRALIZE_SCRIPT),
            )
            .await;
        }
        self.detach().await;
        best_effort("clear cookies", self.page.clear_cookies()).await;
        best_effort("close page", self.page.close()).await;

        self.closed = true;
        let terminal = if self.produced {
            SessionPhase::Done
        } else {
            SessionPhase::Failed
        };
        self.enter(terminal);
        terminal
    }

    async fn detach(&mut self) {
        self.cancel.cancel();
        if let Some(mut watcher) = self.watcher.take() {
            if timeout(CLEANUP_STEP_TIMEOUT, &mut watcher).await.is_err() {
                watcher.abort();
            }
        }
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.cancel.cancel();
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        let page = Arc::clone(&self.page);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(err) = page.close().await {
                    debug!(error = %err, "background page close failed");
                }
            });
        }
    }
}

async fn best_effort(step: &str, work: impl Future<Output = Result<()>>) {
    match timeout(CLEANUP_STEP_TIMEOUT, work).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(step, error = %err, "cleanup step failed"),
        Err(_) => debug!(step, "cleanup step timed out"),
    }
}

async fn wait_for_idle(inflight: &mut watch::Receiver<usize>, idle: NetworkIdle) {
    loop {
        let busy = *inflight.borrow_and_update() > idle.max_inflight;
        if busy {
            if inflight.changed().await.is_err() {
                return;
            }
            continue;
        }
        match timeout(idle.quiet, inflight.changed()).await {
            Err(_) | Ok(Err(_)) => return,
            Ok(Ok(())) => {}
        }
    }
}

struct NetworkWatcher {
    page: Arc<dyn PageHandle>,
    state: Arc<SessionState>,
    budget: RequestBudget,
    blocklist: Arc<BlockList>,
    gateway_host: Option<String>,
    url: String,
    inflight: HashSet<String>,
    inflight_tx: watch::Sender<usize>,
}

impl NetworkWatcher {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<NetworkEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match event {
                NetworkEvent::Request(request) => self.on_request(request).await,
                NetworkEvent::Response { url, location } => {
                    self.on_response(&url, location.as_deref())
                }
                NetworkEvent::Settled { network_id } => {
                    if self.inflight.remove(&network_id) {
                        self.inflight_tx.send_replace(self.inflight.len());
                    }
                }
            }
        }
    }

    async fn on_request(&mut self, request: InterceptedRequest) {
        let facts = RequestFacts {
            url: &request.url,
            resource: request.resource,
            elapsed: self.state.started.elapsed(),
            allowed_so_far: self.state.allowed.load(Ordering::SeqCst),
            extracted: self.state.extracted.load(Ordering::SeqCst),
        };
        let verdict = filter::decide(&facts, &self.budget, &self.blocklist);

        let applied = match verdict {
            Verdict::Pass => self.page.continue_request(&request.id).await,
            Verdict::Allow => {
                self.state.allowed.fetch_add(1, Ordering::SeqCst);
                if let Some(network_id) = &request.network_id {
                    self.inflight.insert(network_id.clone());
                    self.inflight_tx.send_replace(self.inflight.len());
                }
                self.page.continue_request(&request.id).await
            }
            Verdict::Abort(reason) => {
                if reason == AbortReason::BudgetExhausted {
                    debug!(url = %self.url, request = %request.url, "request budget exhausted");
                } else {
                    trace!(
                        url = %self.url,
                        request = %request.url,
                        reason = reason.as_str(),
                        "aborting request"
                    );
                }
                self.page.abort_request(&request.id).await
            }
        };
        if let Err(err) = applied {
            debug!(request = %request.url, error = %err, "request verdict not applied");
        }
    }

    fn on_response(&self, url: &str, location: Option<&str>) {
        let (Some(location), Some(host)) = (location, self.gateway_host.as_deref()) else {
            return;
        };
        if location.to_ascii_lowercase().contains(host) {
            warn!(url = %self.url, response = url, location, "response redirects back through the gateway");
            self.state.redirect_loop.notify_one();
        }
    }
}
