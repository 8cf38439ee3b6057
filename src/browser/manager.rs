//! Shared browser lifecycle.
//!
//! This module provides [`BrowserResource`], the process-wide owner of the
//! rendering engine handle. The engine is launched on first use and reused
//! by every render until a transport fault invalidates it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::engine::{BrowserHandle, LaunchConfig, Renderer};
use crate::Result;

/// Time allowed for a discarded browser to shut down before it is dropped.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct BrowserResource {
    renderer: Arc<dyn Renderer>,
    config: LaunchConfig,
    slot: Mutex<Option<Arc<dyn BrowserHandle>>>,
    launches: AtomicUsize,
}

impl BrowserResource {
    pub fn new(renderer: Arc<dyn Renderer>, config: LaunchConfig) -> Self {
        Self {
            renderer,
            config,
            slot: Mutex::new(None),
            launches: AtomicUsize::new(0),
        }
    }

    /// Returns the live handle, launching the engine if there is none.
    ///
    /// Concurrent callers wait on the same launch instead of starting their
    /// own.
    pub async fn acquire(&self) -> Result<Arc<dyn BrowserHandle>> {
        let mut slot = self.slot.lock().await;
        if let Some(handle) = slot.as_ref() {
            if handle.is_connected() {
                return Ok(Arc::clone(handle));
            }
            warn!("browser control channel dropped; relaunching");
            *slot = None;
        }

        let handle = self.renderer.launch(&self.config).await?;
        let launch = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        info!(launch, "browser ready");
        *slot = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Discards `stale` if it is still the current handle.
    ///
    /// Returns `false` when another caller already replaced it, so a late
    /// fault report never tears down a freshly launched browser.
    pub async fn invalidate(&self, stale: &Arc<dyn BrowserHandle>) -> bool {
        let discarded = {
            let mut slot = self.slot.lock().await;
            match slot.as_ref() {
                Some(current) if Arc::ptr_eq(current, stale) => slot.take(),
                _ => None,
            }
        };
        match discarded {
            Some(handle) => {
                warn!("discarding browser after transport fault");
                close_quietly(handle.as_ref()).await;
                true
            }
            None => false,
        }
    }

    /// Whether a connected browser is currently held. Reports `false` while
    /// a launch is in progress.
    pub fn is_running(&self) -> bool {
        self.slot
            .try_lock()
            .map(|slot| slot.as_ref().is_some_and(|handle| handle.is_connected()))
            .unwrap_or(false)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub async fn shutdown(&self) {
        let handle = self.slot.lock().await.take();
        if let Some(handle) = handle {
            info!("closing browser");
            close_quietly(handle.as_ref()).await;
        }
    }
}

async fn close_quietly(handle: &dyn BrowserHandle) {
    match timeout(DEFAULT_CLOSE_TIMEOUT, handle.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "browser close failed"),
        Err(_) => warn!("browser close timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScriptedRenderer;
    use crate::GatewayError;

    fn resource(renderer: &ScriptedRenderer) -> Arc<BrowserResource> {
        Arc::new(BrowserResource::new(
            Arc::new(renderer.clone()),
            LaunchConfig::default(),
        ))
    }

    #[tokio::test]
    async fn launches_lazily_and_reuses_handle() {
        let renderer = ScriptedRenderer::new();
        let browser = resource(&renderer);
        assert_eq!(renderer.launches(), 0);
        assert!(!browser.is_running());

        let first = browser.acquire().await.unwrap();
        let second = browser.acquire().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(renderer.launches(), 1);
        assert!(browser.is_running());
    }

    #[tokio::test]
    async fn concurrent_acquires_share_one_launch() {
        let renderer = ScriptedRenderer::new();
        let browser = resource(&renderer);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let browser = Arc::clone(&browser);
                tokio::spawn(async move { browser.acquire().await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(renderer.launches(), 1);
    }

    #[tokio::test]
    async fn invalidate_closes_and_next_acquire_relaunches() {
        let renderer = ScriptedRenderer::new();
        let browser = resource(&renderer);

        let stale = browser.acquire().await.unwrap();
        assert!(browser.invalidate(&stale).await);
        assert_eq!(renderer.closed_browsers(), 1);
        assert!(!browser.invalidate(&stale).await);

        let fresh = browser.acquire().await.unwrap();
        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert_eq!(renderer.launches(), 2);
        assert_eq!(browser.launches(), 2);
    }

    #[tokio::test]
    async fn disconnected_handle_is_replaced_on_acquire() {
        let renderer = ScriptedRenderer::new();
        let browser = resource(&renderer);

        browser.acquire().await.unwrap();
        renderer.disconnect();
        assert!(!browser.is_running());

        browser.acquire().await.unwrap();
        assert_eq!(renderer.launches(), 2);
        assert!(browser.is_running());
    }

    #[tokio::test]
    async fn launch_failure_is_reported_and_retried() {
        let renderer = ScriptedRenderer::new();
        renderer.fail_launches(true);
        let browser = resource(&renderer);

        match browser.acquire().await {
            Err(GatewayError::BrowserUnavailable(_)) => {}
            Err(other) => panic!("expected browser unavailable, got {other:?}"),
            Ok(_) => panic!("expected launch failure"),
        }

        renderer.fail_launches(false);
        browser.acquire().await.unwrap();
        assert_eq!(renderer.launches(), 2);
    }
}
