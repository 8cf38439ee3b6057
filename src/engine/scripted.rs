//! In-process engine that replays canned pages.
//!
//! Each [`ScriptedSite`] describes what a URL does when visited: the document
//! it serves, the sub-requests it issues, an optional redirect response, and
//! artificial delays or failures. Every page the engine opens is recorded so
//! callers can inspect request verdicts, evaluated scripts, cookie clears, and
//! closes after the fact.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    map_engine_error, BrowserHandle, InterceptedRequest, LaunchConfig, NetworkEvent, PageHandle,
    Renderer, ResourceClass,
};
use crate::{GatewayError, Result, Viewport};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// When the network reports a sub-request of a [`ScriptedSite`] as finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Settle {
    /// Right after the request is issued.
    #[default]
    Immediately,
    After(Duration),
    /// Sub-requests stay in flight until the page closes.
    Never,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedSite {
    pub html: String,
    /// URL reported after navigation, when the site redirects elsewhere.
    pub final_url: Option<String>,
    pub subrequests: Vec<(String, ResourceClass)>,
    /// `Location` header of a response emitted during navigation.
    pub redirect_location: Option<String>,
    pub navigation_delay: Duration,
    pub content_delay: Duration,
    /// Navigation fails with this engine message after the delay.
    pub failure: Option<String>,
    pub settle: Settle,
}

impl ScriptedSite {
    pub fn html(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..Self::default()
        }
    }

    pub fn with_subrequest(mut self, url: impl Into<String>, resource: ResourceClass) -> Self {
        self.subrequests.push((url.into(), resource));
        self
    }

    pub fn resolved_to(mut self, url: impl Into<String>) -> Self {
        self.final_url = Some(url.into());
        self
    }

    pub fn redirecting_to(mut self, location: impl Into<String>) -> Self {
        self.redirect_location = Some(location.into());
        self
    }

    pub fn slow_navigation(mut self, delay: Duration) -> Self {
        self.navigation_delay = delay;
        self
    }

    pub fn slow_content(mut self, delay: Duration) -> Self {
        self.content_delay = delay;
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn settling(mut self, settle: Settle) -> Self {
        self.settle = settle;
        self
    }
}

#[derive(Default)]
struct ScriptedState {
    sites: Mutex<HashMap<String, ScriptedSite>>,
    pages: Mutex<Vec<Arc<ScriptedPage>>>,
    browsers: Mutex<Vec<Arc<ScriptedBrowser>>>,
    launches: AtomicUsize,
    navigations: AtomicUsize,
    fail_launches: AtomicBool,
}

impl ScriptedState {
    fn site(&self, url: &str) -> Option<ScriptedSite> {
        lock(&self.sites).get(url).cloned()
    }
}

#[derive(Clone, Default)]
pub struct ScriptedRenderer {
    state: Arc<ScriptedState>,
}

impl ScriptedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_site(self, url: impl Into<String>, site: ScriptedSite) -> Self {
        self.insert_site(url, site);
        self
    }

    pub fn insert_site(&self, url: impl Into<String>, site: ScriptedSite) {
        lock(&self.state.sites).insert(url.into(), site);
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> usize {
        self.state.navigations.load(Ordering::SeqCst)
    }

    pub fn pages(&self) -> Vec<Arc<ScriptedPage>> {
        lock(&self.state.pages).clone()
    }

    pub fn fail_launches(&self, fail: bool) {
        self.state.fail_launches.store(fail, Ordering::SeqCst);
    }

    /// Drops the control channel of every launched browser.
    pub fn disconnect(&self) {
        for browser in lock(&self.state.browsers).iter() {
            browser.connected.store(false, Ordering::SeqCst);
        }
    }

    pub fn closed_browsers(&self) -> usize {
        lock(&self.state.browsers)
            .iter()
            .filter(|browser| browser.closed.load(Ordering::SeqCst))
            .count()
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn launch(&self, _config: &LaunchConfig) -> Result<Arc<dyn BrowserHandle>> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.state.fail_launches.load(Ordering::SeqCst) {
            return Err(GatewayError::BrowserUnavailable(
                "scripted engine refused to launch".to_string(),
            ));
        }
        let browser = Arc::new(ScriptedBrowser {
            state: Arc::clone(&self.state),
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });
        lock(&self.state.browsers).push(Arc::clone(&browser));
        Ok(browser)
    }
}

struct ScriptedBrowser {
    state: Arc<ScriptedState>,
    connected: AtomicBool,
    closed: AtomicBool,
}

#[async_trait]
impl BrowserHandle for ScriptedBrowser {
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>> {
        if !self.is_connected() {
            return Err(map_engine_error("new page", "WebSocket is not opened"));
        }
        let page = Arc::new(ScriptedPage::new(Arc::clone(&self.state)));
        lock(&self.state.pages).push(Arc::clone(&page));
        Ok(page)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestVerdict {
    Continued,
    Aborted,
}

pub struct ScriptedPage {
    state: Arc<ScriptedState>,
    events: Mutex<Option<mpsc::UnboundedSender<NetworkEvent>>>,
    requests: Mutex<Vec<(String, String)>>,
    verdicts: Mutex<HashMap<String, RequestVerdict>>,
    next_id: AtomicUsize,
    site: Mutex<Option<ScriptedSite>>,
    current_url: Mutex<Option<String>>,
    viewport: Mutex<Option<Viewport>>,
    scripts: Mutex<Vec<String>>,
    cookie_clears: AtomicUsize,
    closes: AtomicUsize,
}

impl ScriptedPage {
    fn new(state: Arc<ScriptedState>) -> Self {
        Self {
            state,
            events: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            verdicts: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            site: Mutex::new(None),
            current_url: Mutex::new(None),
            viewport: Mutex::new(None),
            scripts: Mutex::new(Vec::new()),
            cookie_clears: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    fn emit(&self, event: NetworkEvent) -> bool {
        match lock(&self.events).as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Issues a sub-request as if the page's scripts had started it.
    ///
    /// Returns the interception id. The request stays in flight until
    /// [`ScriptedPage::settle`] is called with the same id.
    pub fn emit_request(&self, url: impl Into<String>, resource: ResourceClass) -> String {
        let url = url.into();
        let id = format!("interception-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.requests).push((id.clone(), url.clone()));
        self.emit(NetworkEvent::Request(InterceptedRequest {
            id: id.clone(),
            network_id: Some(network_id(&id)),
            url,
            resource,
        }));
        id
    }

    /// Reports the request behind interception `id` as finished.
    pub fn settle(&self, id: &str) -> bool {
        self.emit(NetworkEvent::Settled {
            network_id: network_id(id),
        })
    }

    fn schedule_settle(&self, ids: Vec<String>, settle: Settle) {
        match settle {
            Settle::Immediately => {
                for id in &ids {
                    self.settle(id);
                }
            }
            Settle::After(delay) => {
                let Some(tx) = lock(&self.events).clone() else {
                    return;
                };
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for id in &ids {
                        let _ = tx.send(NetworkEvent::Settled {
                            network_id: network_id(id),
                        });
                    }
                });
            }
            Settle::Never => {}
        }
    }

    fn record(&self, id: &str, verdict: RequestVerdict) {
        lock(&self.verdicts).insert(id.to_string(), verdict);
    }

    pub fn verdict(&self, id: &str) -> Option<RequestVerdict> {
        lock(&self.verdicts).get(id).copied()
    }

    /// Verdicts in the order the requests were issued.
    pub fn verdicts(&self) -> Vec<(String, Option<RequestVerdict>)> {
        let verdicts = lock(&self.verdicts);
        lock(&self.requests)
            .iter()
            .map(|(id, url)| (url.clone(), verdicts.get(id).copied()))
            .collect()
    }

    pub fn urls_with(&self, verdict: RequestVerdict) -> Vec<String> {
        self.verdicts()
            .into_iter()
            .filter(|(_, v)| *v == Some(verdict))
            .map(|(url, _)| url)
            .collect()
    }

    /// Polls until `count` requests have verdicts or `within` elapses.
    pub async fn wait_for_verdicts(&self, count: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if lock(&self.verdicts).len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn applied_viewport(&self) -> Option<Viewport> {
        *lock(&self.viewport)
    }

    pub fn evaluated_scripts(&self) -> Vec<String> {
        lock(&self.scripts).clone()
    }

    pub fn cookie_clears(&self) -> usize {
        self.cookie_clears.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

fn network_id(interception_id: &str) -> String {
    interception_id.replacen("interception-", "network-", 1)
}

#[async_trait]
impl PageHandle for ScriptedPage {
    async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        *lock(&self.viewport) = Some(viewport);
        Ok(())
    }

    async fn intercept(&self) -> Result<mpsc::UnboundedReceiver<NetworkEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.events) = Some(tx);
        Ok(rx)
    }

    async fn continue_request(&self, id: &str) -> Result<()> {
        self.record(id, RequestVerdict::Continued);
        Ok(())
    }

    async fn abort_request(&self, id: &str) -> Result<()> {
        self.record(id, RequestVerdict::Aborted);
        Ok(())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.state.navigations.fetch_add(1, Ordering::SeqCst);
        let site = self
            .state
            .site(url)
            .ok_or_else(|| map_engine_error("navigation", "net::ERR_NAME_NOT_RESOLVED"))?;

        let document = self.emit_request(url, ResourceClass::Document);
        self.settle(&document);
        let issued = site
            .subrequests
            .iter()
            .map(|(sub_url, resource)| self.emit_request(sub_url.clone(), *resource))
            .collect();
        self.schedule_settle(issued, site.settle);
        if let Some(location) = &site.redirect_location {
            self.emit(NetworkEvent::Response {
                url: url.to_string(),
                location: Some(location.clone()),
            });
        }

        if !site.navigation_delay.is_zero() {
            tokio::time::sleep(site.navigation_delay).await;
        }
        if let Some(message) = &site.failure {
            return Err(map_engine_error("navigation", message));
        }

        *lock(&self.current_url) = Some(site.final_url.clone().unwrap_or_else(|| url.to_string()));
        *lock(&self.site) = Some(site);
        Ok(())
    }

    async fn current_url(&self) -> Result<Option<String>> {
        Ok(lock(&self.current_url).clone())
    }

    async fn content(&self) -> Result<String> {
        let site = lock(&self.site)
            .clone()
            .ok_or_else(|| map_engine_error("read document", "no document loaded"))?;
        if !site.content_delay.is_zero() {
            tokio::time::sleep(site.content_delay).await;
        }
        Ok(site.html)
    }

    async fn evaluate_in_frames(&self, script: &str) -> Result<()> {
        lock(&self.scripts).push(script.to_string());
        Ok(())
    }

    async fn clear_cookies(&self) -> Result<()> {
        self.cookie_clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        lock(&self.events).take();
        Ok(())
    }
}
