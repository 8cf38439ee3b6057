//! Prerender Gateway Library
//!
//! Serves fully rendered HTML snapshots of JavaScript-driven pages. Each
//! snapshot is produced once by a shared headless browser, cached, and served
//! to every later request for the same page until it ages out or is evicted.
//!
//! # Module Overview
//!
//! - [`coordinator`] - Cache hits, joins of in-flight renders, and new renders
//! - [`browser`] - Shared browser lifecycle and the per-page render session
//! - [`engine`] - Renderer capability traits and their implementations
//! - [`cache`] - Snapshot store and the policy for reading and writing it
//! - [`blocklist`] - Ad and tracker classification of sub-requests
//! - [`probe`] - Content type check performed before rendering
//! - [`target`] - Gateway path parsing and URL normalization
//! - [`server`] - HTTP routes
//! - [`config`] - Configuration file and environment support
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use prerender_lib::browser::BrowserResource;
//! use prerender_lib::cache::CacheLayer;
//! use prerender_lib::engine::ChromiumRenderer;
//! use prerender_lib::{Config, RequestCoordinator};
//!
//! # async fn example() -> prerender_lib::Result<()> {
//! let config = Config::default();
//! let browser = Arc::new(BrowserResource::new(
//!     Arc::new(ChromiumRenderer),
//!     config.launch_config(),
//! ));
//! let cache = CacheLayer::new(Arc::new(config.memory_store()?));
//! let coordinator = RequestCoordinator::new(browser, cache, config.session_policy()?);
//!
//! let served = coordinator.handle("https://example.com/", None).await?;
//! println!("{} bytes from {}", served.content.len(), served.source.as_str());
//! # Ok(())
//! # }
//! ```

pub mod blocklist;
pub mod browser;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod probe;
pub mod server;
pub mod target;
pub mod telemetry;
pub mod viewport;

pub use blocklist::BlockList;
pub use config::Config;
pub use coordinator::{RequestCoordinator, Served, ServedFrom};
pub use error::{ErrorCategory, ErrorPayload, GatewayError, Result};
pub use server::{build_router, AppState};
pub use target::{NormalizedUrl, RenderTarget};
pub use viewport::Viewport;
