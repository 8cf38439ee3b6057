use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Not a HTML page (content-type: {content_type})")]
    NotHtml { content_type: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Possible infinite redirects detected.")]
    InfiniteRedirect,

    #[error("Browser unavailable: {0}")]
    BrowserUnavailable(String),

    #[error("Render timed out after {0:?}")]
    RenderTimeout(Duration),

    #[error("Gave up after {0:?} waiting for another request to load the page")]
    JoinTimeout(Duration),

    #[error("Navigation error: {0}")]
    Navigation(String),

    #[error("Browser connection lost: {0}")]
    TransportFault(String),

    #[error("Render was abandoned before it produced a result")]
    Abandoned,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Shared(Arc<GatewayError>),
}

impl GatewayError {
    pub fn invalid_url(message: impl Into<String>) -> Self {
        GatewayError::InvalidUrl(message.into())
    }

    pub fn navigation(message: impl Into<String>) -> Self {
        GatewayError::Navigation(message.into())
    }

    /// The underlying error, looking through failures shared with joiners.
    pub fn root(&self) -> &GatewayError {
        match self {
            GatewayError::Shared(inner) => inner.root(),
            other => other,
        }
    }

    pub fn is_transport_fault(&self) -> bool {
        matches!(self.root(), GatewayError::TransportFault(_))
    }

    pub fn category(&self) -> ErrorCategory {
        match self.root() {
            GatewayError::InvalidUrl(_) | GatewayError::NotHtml { .. } => {
                ErrorCategory::Validation
            }
            GatewayError::Network(_) | GatewayError::Store(_) => ErrorCategory::Upstream,
            GatewayError::InfiniteRedirect
            | GatewayError::RenderTimeout(_)
            | GatewayError::JoinTimeout(_)
            | GatewayError::Navigation(_) => ErrorCategory::Render,
            GatewayError::BrowserUnavailable(_) | GatewayError::TransportFault(_) => {
                ErrorCategory::Engine
            }
            GatewayError::Config(_) | GatewayError::Io(_) => ErrorCategory::Config,
            GatewayError::Abandoned | GatewayError::Shared(_) => ErrorCategory::Internal,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let message = self.to_string();
        match self.root() {
            GatewayError::InvalidUrl(_) => ErrorPayload::new(
                self.category(),
                message,
                "Pass an absolute http(s) URL, e.g. /render/https://example.com/.",
            ),
            GatewayError::NotHtml { .. } => ErrorPayload::new(
                self.category(),
                message,
                "Only HTML documents can be prerendered; link to the asset directly.",
            ),
            GatewayError::Network(_) => ErrorPayload::new(
                self.category(),
                message,
                "Check that the origin is reachable from the gateway host.",
            ),
            GatewayError::Store(_) => ErrorPayload::new(
                self.category(),
                message,
                "Check that REDIS_URL points at a reachable Redis server.",
            ),
            GatewayError::InfiniteRedirect => ErrorPayload::new(
                self.category(),
                message,
                "The page redirects back through the gateway; fix the origin's redirect rules.",
            ),
            GatewayError::RenderTimeout(_) => ErrorPayload::new(
                self.category(),
                message,
                "Raise RENDER_TIMEOUT/NAVIGATION_TIMEOUT or reduce the page's startup work.",
            ),
            GatewayError::JoinTimeout(_) => ErrorPayload::new(
                self.category(),
                message,
                "Retry shortly; the page is still being rendered for another request.",
            ),
            GatewayError::Navigation(_) => ErrorPayload::new(
                self.category(),
                message,
                "Verify the URL loads in a regular browser.",
            ),
            GatewayError::BrowserUnavailable(_) => ErrorPayload::new(
                self.category(),
                message,
                "Install Chromium or point CHROME_BIN at a Chrome/Chromium binary.",
            ),
            GatewayError::TransportFault(_) => ErrorPayload::new(
                self.category(),
                message,
                "The browser will be relaunched on the next request.",
            ),
            GatewayError::Config(_) | GatewayError::Io(_) => ErrorPayload::new(
                self.category(),
                message,
                "Check the config file and environment variables.",
            ),
            GatewayError::Abandoned | GatewayError::Shared(_) => ErrorPayload::new(
                self.category(),
                message,
                "Retry the request; file an issue if persistent.",
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Validation,
    Upstream,
    Render,
    Engine,
    Config,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Upstream => "upstream",
            ErrorCategory::Render => "render",
            ErrorCategory::Engine => "engine",
            ErrorCategory::Config => "config",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl ErrorPayload {
    pub fn new(category: ErrorCategory, message: String, remediation: impl Into<String>) -> Self {
        Self {
            category,
            message,
            remediation: Some(remediation.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_error_displays_like_its_source() {
        let shared = GatewayError::Shared(Arc::new(GatewayError::InfiniteRedirect));
        assert_eq!(shared.to_string(), "Possible infinite redirects detected.");
        assert!(matches!(shared.root(), GatewayError::InfiniteRedirect));
    }

    #[test]
    fn transport_fault_is_detected_through_sharing() {
        let err = GatewayError::Shared(Arc::new(GatewayError::TransportFault(
            "WebSocket is not opened".to_string(),
        )));
        assert!(err.is_transport_fault());
        assert_eq!(err.category(), ErrorCategory::Engine);
        assert!(!GatewayError::navigation("net::ERR_FAILED").is_transport_fault());
    }

    #[test]
    fn redirect_payload_points_at_origin_rules() {
        let payload = GatewayError::InfiniteRedirect.to_payload();
        assert_eq!(payload.category, ErrorCategory::Render);
        let remediation = payload.remediation.unwrap_or_default();
        assert!(
            remediation.contains("redirect"),
            "expected redirect remediation, got: {remediation}"
        );
    }

    #[test]
    fn browser_payload_mentions_chrome_bin() {
        let payload = GatewayError::BrowserUnavailable("no executable".to_string()).to_payload();
        let remediation = payload.remediation.unwrap_or_default();
        assert!(
            remediation.contains("CHROME_BIN"),
            "expected CHROME_BIN hint, got: {remediation}"
        );
    }

    #[test]
    fn category_serializes_lowercase() {
        let json = serde_json::to_string(&ErrorCategory::Upstream).unwrap();
        assert_eq!(json, "\"upstream\"");
        assert_eq!(ErrorCategory::Validation.to_string(), "validation");
    }
}
