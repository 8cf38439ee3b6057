//! Out-of-band content type check performed before a render is started.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use tracing::debug;

use crate::target::NormalizedUrl;
use crate::{GatewayError, Result};

/// Default timeout for the probe request.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait ContentProbe: Send + Sync {
    /// Fails with [`GatewayError::NotHtml`] when the origin serves something
    /// other than HTML at `url`.
    async fn check(&self, url: &NormalizedUrl) -> Result<()>;
}

/// Issues a `HEAD` request without following redirects.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .user_agent(concat!("prerender/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentProbe for HttpProbe {
    async fn check(&self, url: &NormalizedUrl) -> Result<()> {
        let response = self.client.head(url.as_str()).send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        debug!(url = %url, status, content_type, "probed target");
        evaluate_probe(status, content_type)
    }
}

/// Skips probing entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProbe;

#[async_trait]
impl ContentProbe for NoopProbe {
    async fn check(&self, _url: &NormalizedUrl) -> Result<()> {
        Ok(())
    }
}

/// Only a successful response that is clearly not HTML is rejected;
/// redirects and error statuses are left for the browser to deal with.
pub fn evaluate_probe(status: u16, content_type: Option<&str>) -> Result<()> {
    if status != 200 {
        return Ok(());
    }
    match content_type {
        Some(value) if value.to_ascii_lowercase().contains("text/html") => Ok(()),
        other => Err(GatewayError::NotHtml {
            content_type: other.unwrap_or("none").to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_responses_pass() {
        assert!(evaluate_probe(200, Some("text/html; charset=utf-8")).is_ok());
        assert!(evaluate_probe(200, Some("TEXT/HTML")).is_ok());
    }

    #[test]
    fn non_html_success_is_rejected() {
        match evaluate_probe(200, Some("application/pdf")) {
            Err(GatewayError::NotHtml { content_type }) => {
                assert_eq!(content_type, "application/pdf")
            }
            other => panic!("expected not html, got {other:?}"),
        }
        match evaluate_probe(200, None) {
            Err(GatewayError::NotHtml { content_type }) => assert_eq!(content_type, "none"),
            other => panic!("expected not html, got {other:?}"),
        }
    }

    #[test]
    fn other_statuses_are_left_to_the_browser() {
        assert!(evaluate_probe(301, None).is_ok());
        assert!(evaluate_probe(404, Some("application/json")).is_ok());
        assert!(evaluate_probe(405, None).is_ok());
    }

    #[tokio::test]
    async fn unreachable_origin_propagates_network_error() {
        let probe = HttpProbe::new(Duration::from_secs(2)).unwrap();
        let target =
            crate::RenderTarget::parse("http://127.0.0.1:1/", crate::Viewport::default())
                .unwrap();
        match probe.check(&target.key).await {
            Err(GatewayError::Network(_)) => {}
            other => panic!("expected network error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn probes_a_local_origin() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = "HTTP/1.1 200 OK\r\ncontent-type: image/png\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let probe = HttpProbe::new(Duration::from_secs(2)).unwrap();
        let target = crate::RenderTarget::parse(
            &format!("http://{addr}/logo.png"),
            crate::Viewport::default(),
        )
        .unwrap();
        match probe.check(&target.key).await {
            Err(GatewayError::NotHtml { content_type }) => assert_eq!(content_type, "image/png"),
            other => panic!("expected not html, got {other:?}"),
        }
    }
}
