//! Rendering engine capability.
//!
//! The gateway drives a browser through three small traits so the
//! coordination logic does not depend on a particular protocol client.
//!
//! # Module Structure
//!
//! - [`chromium`] - Chrome DevTools Protocol implementation
//! - `scripted` - In-process engine replaying canned pages (`test-util` feature)
//!
//! A page reports network activity as a stream of [`NetworkEvent`]s once
//! interception is attached. Every [`NetworkEvent::Request`] is paused until
//! the consumer answers it with [`PageHandle::continue_request`] or
//! [`PageHandle::abort_request`].

pub mod chromium;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{GatewayError, Result, Viewport};

pub use chromium::ChromiumRenderer;
#[cfg(any(test, feature = "test-util"))]
pub use scripted::{RequestVerdict, ScriptedPage, ScriptedRenderer, ScriptedSite, Settle};

/// Chromium flags required for containerized, sandbox-less execution.
pub const DEFAULT_LAUNCH_ARGS: &[&str] = &[
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--enable-features=NetworkService",
    "--ignore-certificate-errors",
];

#[derive(Debug, Clone, Default)]
pub struct LaunchConfig {
    /// Alternate browser binary. `None` lets the engine locate one.
    pub executable: Option<PathBuf>,
    pub headful: bool,
    pub args: Vec<String>,
}

/// Resource class of an outgoing request, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    TextTrack,
    Xhr,
    Fetch,
    Prefetch,
    EventSource,
    WebSocket,
    Manifest,
    Ping,
    Other,
}

impl ResourceClass {
    /// Parses an engine resource type name. Unknown names map to `Other`.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "document" => ResourceClass::Document,
            "stylesheet" => ResourceClass::Stylesheet,
            "image" => ResourceClass::Image,
            "media" => ResourceClass::Media,
            "font" => ResourceClass::Font,
            "script" => ResourceClass::Script,
            "texttrack" => ResourceClass::TextTrack,
            "xhr" => ResourceClass::Xhr,
            "fetch" => ResourceClass::Fetch,
            "prefetch" => ResourceClass::Prefetch,
            "eventsource" => ResourceClass::EventSource,
            "websocket" => ResourceClass::WebSocket,
            "manifest" => ResourceClass::Manifest,
            "ping" => ResourceClass::Ping,
            _ => ResourceClass::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    /// Interception id used to continue or abort the request.
    pub id: String,
    /// Network-level id, shared with the completion event.
    pub network_id: Option<String>,
    pub url: String,
    pub resource: ResourceClass,
}

#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A request is paused awaiting a verdict.
    Request(InterceptedRequest),
    /// Response headers arrived. Redirect responses are reported too.
    Response {
        url: String,
        location: Option<String>,
    },
    /// A request finished or failed.
    Settled { network_id: String },
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn launch(&self, config: &LaunchConfig) -> Result<Arc<dyn BrowserHandle>>;
}

#[async_trait]
pub trait BrowserHandle: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>>;

    /// `false` once the control channel to the engine has dropped.
    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PageHandle: Send + Sync {
    async fn set_viewport(&self, viewport: Viewport) -> Result<()>;

    /// Enables request interception and returns the page's event stream.
    async fn intercept(&self) -> Result<mpsc::UnboundedReceiver<NetworkEvent>>;

    async fn continue_request(&self, id: &str) -> Result<()>;

    async fn abort_request(&self, id: &str) -> Result<()>;

    /// Starts navigation and resolves once the main document has loaded.
    async fn goto(&self, url: &str) -> Result<()>;

    /// The document URL after redirects.
    async fn current_url(&self) -> Result<Option<String>>;

    /// The serialized document, doctype included.
    async fn content(&self) -> Result<String>;

    /// Runs `script` in every frame of the page.
    async fn evaluate_in_frames(&self, script: &str) -> Result<()>;

    async fn clear_cookies(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

const TRANSPORT_MARKERS: &[&str] = &[
    "not opened",
    "closed connection",
    "connection closed",
    "connection reset",
    "broken pipe",
    "receiver is gone",
    "channel closed",
    "websocket",
];

/// Maps an engine failure message to the gateway taxonomy.
///
/// Messages that describe a dropped control channel become
/// [`GatewayError::TransportFault`]; everything else is a navigation error
/// scoped to the current page.
pub fn map_engine_error(context: &str, message: impl std::fmt::Display) -> GatewayError {
    let message = message.to_string();
    let lower = message.to_ascii_lowercase();
    if TRANSPORT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        GatewayError::TransportFault(format!("{context}: {message}"))
    } else {
        GatewayError::Navigation(format!("{context}: {message}"))
    }
}
