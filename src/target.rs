//! Gateway path parsing and render target normalization.
//!
//! A request path looks like `/{mode}/{url}` where `mode` is optional. The
//! URL part is percent-decoded once and the request's own query string is
//! re-attached, so `/render/https%3A%2F%2Fexample.com%2F?width=800` and
//! `/https://example.com/?width=800` address the same target.

use std::fmt;

use thiserror::Error;
use url::Url;

use crate::{GatewayError, Viewport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Render,
    Screenshot,
    Pdf,
}

impl OutputMode {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment.to_ascii_lowercase().as_str() {
            "render" => Some(OutputMode::Render),
            "screenshot" => Some(OutputMode::Screenshot),
            "pdf" => Some(OutputMode::Pdf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Render => "render",
            OutputMode::Screenshot => "screenshot",
            OutputMode::Pdf => "pdf",
        }
    }
}

#[derive(Debug, Error)]
pub enum TargetParseError {
    #[error("Missing URL.")]
    MissingUrl,
    #[error("Invalid URL '{value}': {message}. Hint: include http(s):// and ensure the URL is well-formed.")]
    InvalidUrl { value: String, message: String },
    #[error("Unsupported URL scheme in '{value}'. Only http and https pages can be rendered.")]
    UnsupportedScheme { value: String },
}

impl From<TargetParseError> for GatewayError {
    fn from(err: TargetParseError) -> Self {
        match err {
            TargetParseError::MissingUrl => GatewayError::invalid_url("missing URL"),
            TargetParseError::InvalidUrl { value, message } => GatewayError::invalid_url(
                format!("'{value}': {message}. Hint: include http(s):// and ensure the URL is well-formed."),
            ),
            TargetParseError::UnsupportedScheme { value } => GatewayError::invalid_url(format!(
                "unsupported scheme in '{value}'. Only http and https pages can be rendered."
            )),
        }
    }
}

/// A request path split into output mode and raw target address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPath {
    pub mode: OutputMode,
    pub target: String,
}

pub fn parse_gateway_path(
    path: &str,
    query: Option<&str>,
) -> Result<GatewayPath, TargetParseError> {
    let rest = path.strip_prefix('/').unwrap_or(path);
    let (mode, rest) = match rest.split_once('/') {
        Some((segment, tail)) => match OutputMode::from_segment(segment) {
            Some(mode) => (mode, tail),
            None => (OutputMode::default(), rest),
        },
        None => match OutputMode::from_segment(rest) {
            Some(mode) => (mode, ""),
            None => (OutputMode::default(), rest),
        },
    };

    let decoded = urlencoding::decode(rest).map_err(|err| TargetParseError::InvalidUrl {
        value: rest.to_string(),
        message: err.to_string(),
    })?;
    if decoded.trim().is_empty() {
        return Err(TargetParseError::MissingUrl);
    }

    let target = match query.filter(|q| !q.is_empty()) {
        Some(q) => format!("{decoded}?{q}"),
        None => decoded.into_owned(),
    };
    Ok(GatewayPath { mode, target })
}

/// Canonical cache and coordination key: origin plus decoded path.
///
/// Query parameters never take part, so render options cannot split a page
/// into several cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedUrl(String);

impl NormalizedUrl {
    pub fn from_url(url: &Url) -> Self {
        let path = urlencoding::decode(url.path())
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| url.path().to_string());
        Self(format!("{}{}", url.origin().ascii_serialization(), path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderOptions {
    pub viewport: Viewport,
    /// Serve the serialized DOM without sanitizing it.
    pub raw: bool,
}

#[derive(Debug, Clone)]
pub struct RenderTarget {
    pub key: NormalizedUrl,
    pub url: Url,
    pub options: RenderOptions,
}

impl RenderTarget {
    pub fn parse(raw: &str, default_viewport: Viewport) -> Result<Self, TargetParseError> {
        let lower = raw.trim_start().to_ascii_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return Err(TargetParseError::InvalidUrl {
                value: raw.to_string(),
                message: "not an absolute http(s) address".to_string(),
            });
        }

        let url = Url::parse(raw.trim()).map_err(|err| TargetParseError::InvalidUrl {
            value: raw.to_string(),
            message: err.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TargetParseError::UnsupportedScheme {
                value: raw.to_string(),
            });
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(TargetParseError::InvalidUrl {
                value: raw.to_string(),
                message: "missing host".to_string(),
            });
        }

        let mut width = None;
        let mut height = None;
        let mut raw_mode = false;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "width" => width = Some(value.into_owned()),
                "height" => height = Some(value.into_owned()),
                "raw" => raw_mode = is_truthy(&value),
                _ => {}
            }
        }

        Ok(Self {
            key: NormalizedUrl::from_url(&url),
            options: RenderOptions {
                viewport: Viewport::from_query(
                    width.as_deref(),
                    height.as_deref(),
                    default_viewport,
                ),
                raw: raw_mode,
            },
            url,
        })
    }

    /// Address the browser navigates to. The query string is dropped.
    pub fn navigation_url(&self) -> &str {
        self.key.as_str()
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
