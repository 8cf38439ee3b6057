use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
        }
    }
}

impl Viewport {
    /// Builds a viewport from `width`/`height` query values.
    ///
    /// Missing, non-numeric, or zero values fall back to the matching
    /// dimension of `fallback`, so `?width=abc` renders at the default width.
    pub fn from_query(width: Option<&str>, height: Option<&str>, fallback: Viewport) -> Self {
        Self {
            width: parse_dimension(width).unwrap_or(fallback.width),
            height: parse_dimension(height).unwrap_or(fallback.height),
        }
    }
}

fn parse_dimension(value: Option<&str>) -> Option<u32> {
    value
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .filter(|v| *v > 0)
}

#[derive(Debug, Error)]
pub enum ViewportParseError {
    #[error("Invalid viewport format: expected WIDTHxHEIGHT (e.g., 1024x768)")]
    InvalidFormat,
    #[error("Invalid width: {0}")]
    InvalidWidth(String),
    #[error("Invalid height: {0}")]
    InvalidHeight(String),
    #[error("Width must be positive")]
    ZeroWidth,
    #[error("Height must be positive")]
    ZeroHeight,
}

impl FromStr for Viewport {
    type Err = ViewportParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s
            .split_once('x')
            .ok_or(ViewportParseError::InvalidFormat)?;
        if height.contains('x') {
            return Err(ViewportParseError::InvalidFormat);
        }

        let width: u32 = width
            .trim()
            .parse()
            .map_err(|_| ViewportParseError::InvalidWidth(width.to_string()))?;
        let height: u32 = height
            .trim()
            .parse()
            .map_err(|_| ViewportParseError::InvalidHeight(height.to_string()))?;

        if width == 0 {
            return Err(ViewportParseError::ZeroWidth);
        }
        if height == 0 {
            return Err(ViewportParseError::ZeroHeight);
        }

        Ok(Viewport { width, height })
    }
}

impl std::fmt::Display for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_values_override_fallback() {
        let vp = Viewport::from_query(Some("1280"), Some("720"), Viewport::default());
        assert_eq!(vp, Viewport { width: 1280, height: 720 });
    }

    #[test]
    fn garbage_query_values_use_fallback() {
        let vp = Viewport::from_query(Some("wide"), Some("0"), Viewport::default());
        assert_eq!(vp, Viewport::default());

        let vp = Viewport::from_query(None, Some("600"), Viewport::default());
        assert_eq!(vp.width, 1024);
        assert_eq!(vp.height, 600);
    }

    #[test]
    fn parses_dimensions_with_spaces() {
        let vp: Viewport = " 1920 x 1080 ".parse().unwrap();
        assert_eq!(vp.width, 1920);
        assert_eq!(vp.height, 1080);
    }

    #[test]
    fn rejects_malformed_dimensions() {
        assert!("1024".parse::<Viewport>().is_err());
        assert!("1024x768x600".parse::<Viewport>().is_err());
        assert!("x768".parse::<Viewport>().is_err());
        assert!("0x768".parse::<Viewport>().is_err());
        assert!("1024xabc".parse::<Viewport>().is_err());
    }

    #[test]
    fn default_matches_desktop_render_size() {
        let vp = Viewport::default();
        assert_eq!(format!("{vp}"), "1024x768");
    }
}
