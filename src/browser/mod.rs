//! Headless rendering of a single page against the shared browser.
//!
//! # Module Structure
//!
//! - [`manager`] - The process-wide [`BrowserResource`]
//! - [`session`] - The [`RenderSession`] state machine
//! - [`filter`] - Sub-request gating decisions
//! - [`sanitize`] - Snapshot cleanup applied before caching
//! - `scripts` - JavaScript evaluated inside rendered pages
//!
//! # Example
//!
//! ```no_run
//! use prerender_lib::browser::{BrowserResource, RenderSession, SessionPolicy};
//! use prerender_lib::engine::{ChromiumRenderer, LaunchConfig};
//! use prerender_lib::{RenderTarget, Viewport};
//! use std::sync::Arc;
//!
//! # async fn example() -> prerender_lib::Result<()> {
//! let browser = BrowserResource::new(Arc::new(ChromiumRenderer), LaunchConfig::default());
//! let handle = browser.acquire().await?;
//! let target = RenderTarget::parse("https://example.com/", Viewport::default())?;
//! let mut session =
//!     RenderSession::open(handle.as_ref(), &target, SessionPolicy::default(), None).await?;
//! let html = session.render().await;
//! session.close(html.is_ok()).await;
//! println!("{}", html?);
//! # Ok(())
//! # }
//! ```

pub mod filter;
mod manager;
pub mod sanitize;
mod scripts;
mod session;

pub use filter::{decide, AbortReason, RequestBudget, RequestFacts, Verdict};
pub use manager::{BrowserResource, DEFAULT_CLOSE_TIMEOUT};
pub use sanitize::sanitize_document;
pub use session::{
    NetworkIdle, RenderSession, SessionPhase, SessionPolicy, CLEANUP_STEP_TIMEOUT,
    DEFAULT_NAVIGATION_TIMEOUT, DEFAULT_RENDER_TIMEOUT,
};
