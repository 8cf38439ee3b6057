use std::path::Path;

use prerender_lib::config::LogFormat;
use prerender_lib::{Config, GatewayError};

use crate::cli::{Cli, LogFormatArg};

/// Load config from a TOML file (or defaults), then apply environment
/// overrides.
pub fn load_config(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, GatewayError> {
    let mut cfg = Config::load(path).map_err(|e| {
        let loc = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults".to_string());
        GatewayError::Config(format!("Failed to read config {}: {}", loc, e))
    })?;

    cfg.apply_env(env)?;
    Ok(cfg)
}

/// Applies CLI flags, which take precedence over file and environment.
pub fn apply_cli(cfg: &mut Config, cli: &Cli) {
    if let Some(host) = &cli.host {
        cfg.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        cfg.server.port = port;
    }
    if let Some(viewport) = cli.viewport {
        cfg.render.viewport = viewport;
    }
    if let Some(format) = cli.log_format {
        cfg.logging.format = match format {
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        };
    }
    if cli.verbose {
        cfg.logging.level = "debug".to_string();
    }
    if cli.no_probe {
        cfg.render.probe = false;
    }
}

pub fn validate(cfg: &Config, path: Option<&Path>) -> Result<(), GatewayError> {
    cfg.validate().map_err(|e| {
        let prefix = path
            .map(|p| format!("Invalid config ({}): {}", p.display(), e))
            .unwrap_or_else(|| format!("Invalid config: {}", e));
        GatewayError::Config(prefix)
    })
}

/// Format effective config as a single-line string.
pub fn format_effective_config(cfg: &Config, config_source: Option<&Path>) -> String {
    let source = config_source
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults".to_string());
    format!(
        "Effective config [{source}]: listen={}:{}, viewport={}, max_requests={} per {:?}, timeouts: navigation={:?}, render={:?}, wait={:?}, cache: store={}, entries={}, max_age={:?}, probe={}",
        cfg.server.host,
        cfg.server.port,
        cfg.render.viewport,
        cfg.render.max_requests,
        cfg.render.request_window,
        cfg.render.navigation_timeout,
        cfg.render.render_timeout,
        cfg.render.wait_timeout,
        if cfg.cache.store_url.is_some() { "redis" } else { "memory" },
        cfg.cache.max_entries,
        cfg.cache.max_age,
        cfg.render.probe,
    )
}
