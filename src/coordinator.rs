//! Request coordination.
//!
//! For every inbound request the [`RequestCoordinator`] decides between
//! joining an in-flight render, serving from cache, and starting a new
//! render. [`PendingRenders`] holds at most one registration per
//! [`NormalizedUrl`]; the request that creates it (the leader) owns the
//! render and broadcasts the outcome to every request that joined while it
//! was running.
//!
//! The leader runs on its own task, so a client that disconnects does not
//! cancel a render other requests are waiting for.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::browser::{BrowserResource, RenderSession, SessionPolicy};
use crate::cache::CacheLayer;
use crate::engine::BrowserHandle;
use crate::probe::{ContentProbe, NoopProbe};
use crate::target::{NormalizedUrl, RenderTarget};
use crate::{GatewayError, Result, Viewport};

/// Default time a joined request waits for the leader's outcome.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Result of a render, as seen by every request waiting on it.
#[derive(Debug, Clone)]
pub enum RenderOutcome {
    Ready(Bytes),
    Failed(Arc<GatewayError>),
}

/// Where a served snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
    Cache,
    Render,
    /// Another request rendered or loaded the page.
    Joined,
}

impl ServedFrom {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServedFrom::Cache => "cache",
            ServedFrom::Render => "render",
            ServedFrom::Joined => "joined",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Served {
    pub content: Bytes,
    pub source: ServedFrom,
}

/// Registry of renders in flight, keyed by normalized URL.
#[derive(Clone, Default)]
pub struct PendingRenders {
    inner: Arc<DashMap<NormalizedUrl, broadcast::Sender<RenderOutcome>>>,
}

pub enum Admission {
    /// No render was in flight; the caller now owns the registration.
    Leader(PendingGuard),
    /// A render is in flight; its outcome arrives on this receiver.
    Joined(broadcast::Receiver<RenderOutcome>),
}

impl PendingRenders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the caller as leader for `key`, or subscribes it to the
    /// render already in flight. Check and insert happen atomically.
    pub fn admit(&self, key: &NormalizedUrl) -> Admission {
        match self.inner.entry(key.clone()) {
            Entry::Occupied(entry) => Admission::Joined(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (sender, _) = broadcast::channel(1);
                entry.insert(sender.clone());
                Admission::Leader(PendingGuard {
                    renders: self.clone(),
                    key: key.clone(),
                    sender,
                    finished: false,
                })
            }
        }
    }

    pub fn contains(&self, key: &NormalizedUrl) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn release(&self, key: &NormalizedUrl, sender: &broadcast::Sender<RenderOutcome>) {
        self.inner
            .remove_if(key, |_, current| current.same_channel(sender));
    }
}

/// Leader's hold on a [`PendingRenders`] entry.
///
/// Dropping the guard without completing it releases the entry and closes
/// the channel, so joiners observe [`GatewayError::Abandoned`].
pub struct PendingGuard {
    renders: PendingRenders,
    key: NormalizedUrl,
    sender: broadcast::Sender<RenderOutcome>,
    finished: bool,
}

impl PendingGuard {
    /// Releases the entry, then hands `outcome` to every joined request.
    /// Returns the number of joiners notified.
    pub fn complete(mut self, outcome: RenderOutcome) -> usize {
        self.renders.release(&self.key, &self.sender);
        self.finished = true;
        self.sender.send(outcome).unwrap_or(0)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.renders.release(&self.key, &self.sender);
        }
    }
}

#[derive(Clone)]
pub struct RequestCoordinator {
    browser: Arc<BrowserResource>,
    cache: CacheLayer,
    probe: Arc<dyn ContentProbe>,
    policy: SessionPolicy,
    pending: PendingRenders,
    wait_timeout: Duration,
    default_viewport: Viewport,
}

impl RequestCoordinator {
    pub fn new(browser: Arc<BrowserResource>, cache: CacheLayer, policy: SessionPolicy) -> Self {
        Self {
            browser,
            cache,
            probe: Arc::new(NoopProbe),
            policy,
            pending: PendingRenders::new(),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            default_viewport: Viewport::default(),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ContentProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn with_default_viewport(mut self, viewport: Viewport) -> Self {
        self.default_viewport = viewport;
        self
    }

    pub fn browser(&self) -> &Arc<BrowserResource> {
        &self.browser
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    /// Renders in flight right now.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Serves one inbound request for `raw_url`.
    ///
    /// `gateway_host` is the host the request was addressed to; responses
    /// redirecting back to it abort the render as a redirect loop.
    pub async fn handle(&self, raw_url: &str, gateway_host: Option<&str>) -> Result<Served> {
        let target = RenderTarget::parse(raw_url, self.default_viewport)?;
        self.probe.check(&target.key).await?;

        match self.pending.admit(&target.key) {
            Admission::Joined(receiver) => self.join(&target.key, receiver).await,
            Admission::Leader(guard) => {
                let leader = self.clone();
                let host = gateway_host.map(str::to_string);
                let key = target.key.clone();
                match tokio::spawn(async move { leader.lead(target, guard, host).await }).await {
                    Ok(result) => result,
                    Err(err) => {
                        warn!(url = %key, error = %err, "render task ended abnormally");
                        Err(GatewayError::Abandoned)
                    }
                }
            }
        }
    }

    async fn join(
        &self,
        key: &NormalizedUrl,
        mut receiver: broadcast::Receiver<RenderOutcome>,
    ) -> Result<Served> {
        debug!(url = %key, "joining in-flight render");
        match timeout(self.wait_timeout, receiver.recv()).await {
            Ok(Ok(RenderOutcome::Ready(content))) => {
                info!(url = %key, source = ServedFrom::Joined.as_str(), "served");
                Ok(Served {
                    content,
                    source: ServedFrom::Joined,
                })
            }
            Ok(Ok(RenderOutcome::Failed(err))) => Err(GatewayError::Shared(err)),
            Ok(Err(_)) => Err(GatewayError::Abandoned),
            Err(_) => {
                warn!(url = %key, waited = ?self.wait_timeout, "gave up waiting for in-flight render");
                Err(GatewayError::JoinTimeout(self.wait_timeout))
            }
        }
    }

    async fn lead(
        self,
        target: RenderTarget,
        guard: PendingGuard,
        gateway_host: Option<String>,
    ) -> Result<Served> {
        if let Some(content) = self.cache.lookup(&target.key).await {
            guard.complete(RenderOutcome::Ready(content.clone()));
            info!(url = %target.key, source = ServedFrom::Cache.as_str(), "served");
            return Ok(Served {
                content,
                source: ServedFrom::Cache,
            });
        }

        let started = Instant::now();
        match self.render(&target, gateway_host).await {
            Ok(content) => {
                let joiners = guard.complete(RenderOutcome::Ready(content.clone()));
                info!(
                    url = %target.key,
                    source = ServedFrom::Render.as_str(),
                    joiners,
                    bytes = content.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "served"
                );
                Ok(Served {
                    content,
                    source: ServedFrom::Render,
                })
            }
            Err(err) => {
                let err = Arc::new(err);
                let joiners = guard.complete(RenderOutcome::Failed(Arc::clone(&err)));
                warn!(
                    url = %target.key,
                    category = %err.category(),
                    joiners,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "render failed"
                );
                Err(GatewayError::Shared(err))
            }
        }
    }

    async fn render(&self, target: &RenderTarget, gateway_host: Option<String>) -> Result<Bytes> {
        let result = match self.browser.acquire().await {
            Ok(handle) => {
                let result = self.run_session(&handle, target, gateway_host).await;
                if matches!(&result, Err(err) if err.is_transport_fault()) {
                    self.browser.invalidate(&handle).await;
                }
                result
            }
            Err(err) => Err(err),
        };
        if result.is_err() {
            self.cache.invalidate(&target.key).await;
        }
        result
    }

    async fn run_session(
        &self,
        handle: &Arc<dyn BrowserHandle>,
        target: &RenderTarget,
        gateway_host: Option<String>,
    ) -> Result<Bytes> {
        let mut session =
            RenderSession::open(handle.as_ref(), target, self.policy.clone(), gateway_host)
                .await?;
        match session.render().await {
            Ok(html) => {
                let content = Bytes::from(html);
                let stored = self.cache.populate(&target.key, content.clone()).await;
                session.close(stored).await;
                Ok(content)
            }
            Err(err) => {
                session.close(false).await;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::NetworkIdle;
    use crate::cache::{CacheStore, MemoryStore};
    use crate::engine::{LaunchConfig, ScriptedRenderer, ScriptedSite};
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const PAGE: &str = "<html><head></head><body><p>rendered</p><script>boot()</script></body></html>";
    const URL: &str = "http://example.com/";

    fn policy() -> SessionPolicy {
        SessionPolicy {
            idle: NetworkIdle {
                quiet: Duration::from_millis(5),
                max_inflight: 2,
            },
            ..SessionPolicy::default()
        }
    }

    fn coordinator(renderer: &ScriptedRenderer) -> RequestCoordinator {
        let browser = Arc::new(BrowserResource::new(
            Arc::new(renderer.clone()),
            LaunchConfig::default(),
        ));
        let store = MemoryStore::new(
            NonZeroUsize::new(16).unwrap(),
            Duration::from_secs(3600),
        );
        RequestCoordinator::new(browser, CacheLayer::new(Arc::new(store)), policy())
    }

    /// Memory store that records every write and delete.
    struct RecordingStore {
        inner: MemoryStore,
        sets: Mutex<Vec<String>>,
        deletes: Mutex<Vec<String>>,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(NonZeroUsize::new(16).unwrap(), Duration::from_secs(3600)),
                sets: Mutex::new(Vec::new()),
                deletes: Mutex::new(Vec::new()),
            }
        }

        fn sets(&self) -> Vec<String> {
            self.sets.lock().unwrap().clone()
        }

        fn deletes(&self) -> Vec<String> {
            self.deletes.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl CacheStore for RecordingStore {
        async fn get(&self, key: &str) -> Result<Option<Bytes>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, content: Bytes) -> Result<()> {
            self.sets.lock().unwrap().push(key.to_string());
            self.inner.set(key, content).await
        }

        async fn has(&self, key: &str) -> Result<bool> {
            self.inner.has(key).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.deletes.lock().unwrap().push(key.to_string());
            self.inner.delete(key).await
        }

        async fn keys(&self) -> Result<Vec<String>> {
            self.inner.keys().await
        }
    }

    fn recorded(
        renderer: &ScriptedRenderer,
        policy: SessionPolicy,
    ) -> (RequestCoordinator, Arc<RecordingStore>) {
        let browser = Arc::new(BrowserResource::new(
            Arc::new(renderer.clone()),
            LaunchConfig::default(),
        ));
        let store = Arc::new(RecordingStore::new());
        let coordinator = RequestCoordinator::new(browser, CacheLayer::new(store.clone()), policy);
        (coordinator, store)
    }

    struct CountingProbe {
        calls: AtomicUsize,
        verdict: fn() -> Result<()>,
    }

    #[async_trait::async_trait]
    impl ContentProbe for CountingProbe {
        async fn check(&self, _url: &NormalizedUrl) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.verdict)()
        }
    }

    #[test]
    fn admission_is_exclusive_per_key() {
        let pending = PendingRenders::new();
        let key = RenderTarget::parse(URL, Viewport::default()).unwrap().key;

        let guard = match pending.admit(&key) {
            Admission::Leader(guard) => guard,
            Admission::Joined(_) => panic!("first admission must lead"),
        };
        let mut joined = match pending.admit(&key) {
            Admission::Joined(receiver) => receiver,
            Admission::Leader(_) => panic!("second admission must join"),
        };
        assert_eq!(pending.len(), 1);

        assert_eq!(guard.complete(RenderOutcome::Ready(Bytes::from_static(b"x"))), 1);
        assert!(pending.is_empty());
        match joined.try_recv() {
            Ok(RenderOutcome::Ready(content)) => assert_eq!(&content[..], b"x"),
            other => panic!("expected ready outcome, got {other:?}"),
        }
        assert!(matches!(pending.admit(&key), Admission::Leader(_)));
    }

    #[test]
    fn dropped_guard_releases_and_closes() {
        let pending = PendingRenders::new();
        let key = RenderTarget::parse(URL, Viewport::default()).unwrap().key;
        let guard = match pending.admit(&key) {
            Admission::Leader(guard) => guard,
            Admission::Joined(_) => panic!("first admission must lead"),
        };
        let Admission::Joined(mut joined) = pending.admit(&key) else {
            panic!("second admission must join");
        };

        drop(guard);
        assert!(!pending.contains(&key));
        assert!(matches!(
            joined.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_render() {
        let renderer = ScriptedRenderer::new().with_site(
            URL,
            ScriptedSite::html(PAGE).slow_navigation(Duration::from_millis(100)),
        );
        let coordinator = coordinator(&renderer);

        let requests: Vec<_> = (0..5)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.handle(URL, Some("gateway.test")).await })
            })
            .collect();
        let mut sources = Vec::new();
        let mut bodies = Vec::new();
        for request in requests {
            let served = request.await.unwrap().unwrap();
            sources.push(served.source);
            bodies.push(served.content);
        }

        assert_eq!(renderer.navigations(), 1);
        assert_eq!(sources.iter().filter(|s| **s == ServedFrom::Render).count(), 1);
        assert_eq!(sources.iter().filter(|s| **s == ServedFrom::Joined).count(), 4);
        assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
        assert!(!String::from_utf8_lossy(&bodies[0]).contains("boot()"));
        assert_eq!(coordinator.in_flight(), 0);

        let again = coordinator.handle(URL, None).await.unwrap();
        assert_eq!(again.source, ServedFrom::Cache);
        assert_eq!(again.content, bodies[0]);
        assert_eq!(renderer.navigations(), 1);
    }

    #[tokio::test]
    async fn render_options_share_the_cache_key() {
        let renderer = ScriptedRenderer::new().with_site(URL, ScriptedSite::html(PAGE));
        let coordinator = coordinator(&renderer);

        coordinator.handle(URL, None).await.unwrap();
        let wide = coordinator
            .handle("http://example.com/?width=1920&height=1080", None)
            .await
            .unwrap();
        assert_eq!(wide.source, ServedFrom::Cache);
        assert_eq!(renderer.navigations(), 1);
    }

    #[tokio::test]
    async fn failure_reaches_every_joiner_and_leaves_no_entry() {
        let renderer = ScriptedRenderer::new().with_site(
            URL,
            ScriptedSite::html(PAGE)
                .slow_navigation(Duration::from_millis(50))
                .failing("net::ERR_CONNECTION_RESET"),
        );
        let coordinator = coordinator(&renderer);

        let requests: Vec<_> = (0..3)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.handle(URL, None).await })
            })
            .collect();
        for request in requests {
            match request.await.unwrap() {
                Err(err) => match err.root() {
                    GatewayError::Navigation(msg) => {
                        assert!(msg.contains("ERR_CONNECTION_RESET"))
                    }
                    other => panic!("expected navigation error, got {other:?}"),
                },
                Ok(served) => panic!("expected failure, got {:?}", served.source),
            }
        }

        assert_eq!(renderer.navigations(), 1);
        let key = RenderTarget::parse(URL, Viewport::default()).unwrap().key;
        assert!(coordinator.cache().lookup(&key).await.is_none());
        assert_eq!(renderer.pages()[0].close_count(), 1);
        assert!(renderer.pages()[0].evaluated_scripts().is_empty());
        // A page failure keeps the browser.
        assert_eq!(renderer.closed_browsers(), 0);
    }

    #[tokio::test]
    async fn failed_refresh_deletes_the_entry_and_never_writes() {
        let renderer = ScriptedRenderer::new().with_site(
            URL,
            ScriptedSite::html(PAGE)
                .slow_navigation(Duration::from_millis(100))
                .failing("net::ERR_CONNECTION_RESET"),
        );
        let (coordinator, store) = recorded(&renderer, policy());

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.handle(URL, None).await })
        };
        while renderer.navigations() == 0 {
            tokio::task::yield_now().await;
        }
        // Another gateway instance stores a snapshot while this render runs.
        store
            .inner
            .set(URL, Bytes::from_static(b"<p>stale</p>"))
            .await
            .unwrap();

        let err = leader.await.unwrap().unwrap_err();
        assert!(matches!(err.root(), GatewayError::Navigation(_)), "got {err:?}");
        assert_eq!(store.deletes(), vec![URL.to_string()]);
        assert!(store.sets().is_empty());
        assert!(!store.has(URL).await.unwrap());
    }

    #[tokio::test]
    async fn timed_out_render_deletes_the_entry_and_never_writes() {
        let renderer = ScriptedRenderer::new().with_site(
            URL,
            ScriptedSite::html(PAGE).slow_content(Duration::from_secs(60)),
        );
        let (coordinator, store) = recorded(
            &renderer,
            SessionPolicy {
                render_timeout: Duration::from_millis(50),
                ..policy()
            },
        );

        let err = coordinator.handle(URL, None).await.unwrap_err();
        match err.root() {
            GatewayError::RenderTimeout(limit) => assert_eq!(*limit, Duration::from_millis(50)),
            other => panic!("expected render timeout, got {other:?}"),
        }
        assert_eq!(err.to_string(), "Render timed out after 50ms");
        assert_eq!(store.deletes(), vec![URL.to_string()]);
        assert!(store.sets().is_empty());
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_render_writes_once_and_deletes_nothing() {
        let renderer = ScriptedRenderer::new().with_site(URL, ScriptedSite::html(PAGE));
        let (coordinator, store) = recorded(&renderer, policy());

        coordinator.handle(URL, None).await.unwrap();
        coordinator.handle(URL, None).await.unwrap();
        assert_eq!(store.sets(), vec![URL.to_string()]);
        assert!(store.deletes().is_empty());
    }

    #[tokio::test]
    async fn joiner_gives_up_without_cancelling_the_render() {
        let renderer = ScriptedRenderer::new().with_site(
            URL,
            ScriptedSite::html(PAGE).slow_navigation(Duration::from_millis(150)),
        );
        let coordinator = coordinator(&renderer).with_wait_timeout(Duration::from_millis(20));

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.handle(URL, None).await })
        };
        while coordinator.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        match coordinator.handle(URL, None).await {
            Err(GatewayError::JoinTimeout(waited)) => {
                assert_eq!(waited, Duration::from_millis(20))
            }
            other => panic!("expected join timeout, got {other:?}"),
        }

        let served = leader.await.unwrap().unwrap();
        assert_eq!(served.source, ServedFrom::Render);
        let cached = coordinator.handle(URL, None).await.unwrap();
        assert_eq!(cached.source, ServedFrom::Cache);
    }

    #[tokio::test]
    async fn transport_fault_relaunches_browser() {
        let renderer = ScriptedRenderer::new().with_site(
            URL,
            ScriptedSite::html(PAGE).failing("WebSocket connection closed"),
        );
        let coordinator = coordinator(&renderer);

        let err = coordinator.handle(URL, None).await.unwrap_err();
        assert!(err.is_transport_fault(), "got {err:?}");
        assert_eq!(renderer.closed_browsers(), 1);

        renderer.insert_site(URL, ScriptedSite::html(PAGE));
        coordinator.handle(URL, None).await.unwrap();
        assert_eq!(renderer.launches(), 2);
    }

    #[tokio::test]
    async fn redirect_loop_is_reported() {
        let renderer = ScriptedRenderer::new().with_site(
            URL,
            ScriptedSite::html(PAGE)
                .redirecting_to("http://gateway.test/render/http://example.com/")
                .slow_navigation(Duration::from_secs(3600)),
        );
        let coordinator = coordinator(&renderer);

        let err = coordinator
            .handle(URL, Some("gateway.test"))
            .await
            .unwrap_err();
        assert!(matches!(err.root(), GatewayError::InfiniteRedirect), "got {err:?}");
        assert_eq!(
            err.to_string(),
            "Possible infinite redirects detected."
        );
    }

    #[tokio::test]
    async fn cached_snapshot_skips_the_browser() {
        let renderer = ScriptedRenderer::new();
        let coordinator = coordinator(&renderer);
        let key = RenderTarget::parse(URL, Viewport::default()).unwrap().key;
        coordinator
            .cache()
            .populate(&key, Bytes::from_static(b"<p>cached</p>"))
            .await;

        let served = coordinator.handle(URL, None).await.unwrap();
        assert_eq!(served.source, ServedFrom::Cache);
        assert_eq!(&served.content[..], b"<p>cached</p>");
        assert_eq!(renderer.launches(), 0);
    }

    #[tokio::test]
    async fn validation_and_probe_fail_before_rendering() {
        let renderer = ScriptedRenderer::new().with_site(URL, ScriptedSite::html(PAGE));
        let probe = Arc::new(CountingProbe {
            calls: AtomicUsize::new(0),
            verdict: || {
                Err(GatewayError::NotHtml {
                    content_type: "application/pdf".to_string(),
                })
            },
        });
        let coordinator = coordinator(&renderer).with_probe(probe.clone());

        match coordinator.handle("ftp://example.com/file", None).await {
            Err(GatewayError::InvalidUrl(_)) => {}
            other => panic!("expected invalid url, got {other:?}"),
        }
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);

        match coordinator.handle(URL, None).await {
            Err(GatewayError::NotHtml { content_type }) => {
                assert_eq!(content_type, "application/pdf")
            }
            other => panic!("expected not html, got {other:?}"),
        }
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(renderer.launches(), 0);
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn launch_failure_is_browser_unavailable() {
        let renderer = ScriptedRenderer::new().with_site(URL, ScriptedSite::html(PAGE));
        renderer.fail_launches(true);
        let coordinator = coordinator(&renderer);

        let err = coordinator.handle(URL, None).await.unwrap_err();
        assert!(
            matches!(err.root(), GatewayError::BrowserUnavailable(_)),
            "got {err:?}"
        );
        assert_eq!(coordinator.in_flight(), 0);
    }
}
