//! Chrome DevTools Protocol engine backed by `chromiumoxide`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    DeleteCookiesParams, ErrorReason, EventLoadingFailed, EventLoadingFinished,
    EventRequestWillBeSent, EventResponseReceived, GetCookiesParams, Headers,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    map_engine_error, BrowserHandle, InterceptedRequest, LaunchConfig, NetworkEvent, PageHandle,
    Renderer, ResourceClass, DEFAULT_LAUNCH_ARGS,
};
use crate::{GatewayError, Result, Viewport};

/// Upper bound for a single protocol command. Render deadlines are enforced
/// by the session, so this only catches a wedged browser.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, Default)]
pub struct ChromiumRenderer;

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn launch(&self, config: &LaunchConfig) -> Result<Arc<dyn BrowserHandle>> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .enable_request_intercept()
            .request_timeout(COMMAND_TIMEOUT)
            .args(DEFAULT_LAUNCH_ARGS.iter().copied())
            .args(config.args.iter().cloned());
        if config.headful {
            builder = builder.with_head();
        }
        if let Some(path) = &config.executable {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(GatewayError::BrowserUnavailable)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|err| GatewayError::BrowserUnavailable(err.to_string()))?;

        let connected = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&connected);
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "browser handler reported an error");
                }
            }
            flag.store(false, Ordering::SeqCst);
            warn!("browser control channel closed");
        });

        info!(headful = config.headful, "launched chromium");
        Ok(Arc::new(ChromiumBrowser {
            browser: tokio::sync::Mutex::new(browser),
            connected,
            handler_task,
        }))
    }
}

struct ChromiumBrowser {
    browser: tokio::sync::Mutex<Browser>,
    connected: Arc<AtomicBool>,
    handler_task: JoinHandle<()>,
}

#[async_trait]
impl BrowserHandle for ChromiumBrowser {
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|err| map_engine_error("new page", err))?;
        Ok(Arc::new(ChromiumPage {
            page,
            forwarder: Mutex::new(None),
        }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.handler_task.is_finished()
    }

    async fn close(&self) -> Result<()> {
        let result = self.browser.lock().await.close().await;
        self.handler_task.abort();
        self.connected.store(false, Ordering::SeqCst);
        result
            .map(|_| ())
            .map_err(|err| map_engine_error("close browser", err))
    }
}

impl Drop for ChromiumBrowser {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

struct ChromiumPage {
    page: Page,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl ChromiumPage {
    fn stop_forwarding(&self) {
        let task = self
            .forwarder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    async fn event_streams(&self) -> Result<Vec<BoxStream<'static, NetworkEvent>>> {
        let paused = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|err| map_engine_error("listen for requests", err))?
            .map(|event| {
                NetworkEvent::Request(InterceptedRequest {
                    id: event.request_id.inner().clone(),
                    network_id: event.network_id.as_ref().map(|id| id.inner().clone()),
                    url: event.request.url.clone(),
                    resource: ResourceClass::from_name(&format!("{:?}", event.resource_type)),
                })
            })
            .boxed();

        // Redirect hops surface as the `redirect_response` of the next request.
        let redirects = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|err| map_engine_error("listen for redirects", err))?
            .filter_map(|event| async move {
                event.redirect_response.as_ref().map(|response| NetworkEvent::Response {
                    url: response.url.clone(),
                    location: location_header(&response.headers),
                })
            })
            .boxed();

        let responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|err| map_engine_error("listen for responses", err))?
            .map(|event| NetworkEvent::Response {
                url: event.response.url.clone(),
                location: location_header(&event.response.headers),
            })
            .boxed();

        let finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(|err| map_engine_error("listen for completions", err))?
            .map(|event| NetworkEvent::Settled {
                network_id: event.request_id.inner().clone(),
            })
            .boxed();

        let failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(|err| map_engine_error("listen for failures", err))?
            .map(|event| NetworkEvent::Settled {
                network_id: event.request_id.inner().clone(),
            })
            .boxed();

        Ok(vec![paused, redirects, responses, finished, failed])
    }
}

fn location_header(headers: &Headers) -> Option<String> {
    headers
        .inner()
        .as_object()?
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("location"))
        .and_then(|(_, value)| value.as_str())
        .map(str::to_string)
}

#[async_trait]
impl PageHandle for ChromiumPage {
    async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        let params = SetDeviceMetricsOverrideParams::new(
            i64::from(viewport.width),
            i64::from(viewport.height),
            1.0,
            false,
        );
        self.page
            .execute(params)
            .await
            .map(|_| ())
            .map_err(|err| map_engine_error("set viewport", err))
    }

    async fn intercept(&self) -> Result<mpsc::UnboundedReceiver<NetworkEvent>> {
        let mut events = stream::select_all(self.event_streams().await?);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        let previous = self
            .forwarder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(rx)
    }

    async fn continue_request(&self, id: &str) -> Result<()> {
        self.page
            .execute(ContinueRequestParams::new(fetch::RequestId::new(id)))
            .await
            .map(|_| ())
            .map_err(|err| map_engine_error("continue request", err))
    }

    async fn abort_request(&self, id: &str) -> Result<()> {
        let params = FailRequestParams::new(fetch::RequestId::new(id), ErrorReason::BlockedByClient);
        self.page
            .execute(params)
            .await
            .map(|_| ())
            .map_err(|err| map_engine_error("abort request", err))
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map(|_| ())
            .map_err(|err| map_engine_error("navigation", err))
    }

    async fn current_url(&self) -> Result<Option<String>> {
        self.page
            .url()
            .await
            .map_err(|err| map_engine_error("read page url", err))
    }

    async fn content(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|err| map_engine_error("read document", err))
    }

    async fn evaluate_in_frames(&self, script: &str) -> Result<()> {
        let frames = self
            .page
            .frames()
            .await
            .map_err(|err| map_engine_error("list frames", err))?;
        for frame in frames {
            let context = match self.page.frame_execution_context(frame).await {
                Ok(Some(context)) => context,
                Ok(None) => continue,
                Err(err) => return Err(map_engine_error("frame context", err)),
            };
            let params = EvaluateParams::builder()
                .expression(script)
                .context_id(context)
                .build()
                .map_err(|err| map_engine_error("build evaluation", err))?;
            if let Err(err) = self.page.execute(params).await {
                debug!(error = %err, "frame script evaluation failed");
            }
        }
        Ok(())
    }

    async fn clear_cookies(&self) -> Result<()> {
        let cookies = self
            .page
            .execute(GetCookiesParams::default())
            .await
            .map_err(|err| map_engine_error("read cookies", err))?
            .result
            .cookies;
        for cookie in cookies {
            let params = DeleteCookiesParams::builder()
                .name(cookie.name)
                .domain(cookie.domain)
                .path(cookie.path)
                .build()
                .map_err(|err| map_engine_error("build cookie deletion", err))?;
            self.page
                .execute(params)
                .await
                .map_err(|err| map_engine_error("delete cookie", err))?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.stop_forwarding();
        self.page
            .clone()
            .close()
            .await
            .map_err(|err| map_engine_error("close page", err))
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        self.stop_forwarding();
    }
}
