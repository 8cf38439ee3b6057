mod cli;
mod settings;

use std::process::ExitCode;
use std::sync::Arc;

use prerender_lib::browser::BrowserResource;
use prerender_lib::cache::CacheLayer;
use prerender_lib::engine::ChromiumRenderer;
use prerender_lib::probe::{ContentProbe, HttpProbe, NoopProbe};
use prerender_lib::{
    build_router, telemetry, AppState, Config, GatewayError, RequestCoordinator,
};
use tracing::{error, info};

const EXIT_RUNTIME: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    run().await
}

async fn run() -> ExitCode {
    let args = cli::parse();

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if let Err(err) = telemetry::init(&config.logging) {
        eprintln!("{err}");
        return ExitCode::from(EXIT_CONFIG);
    }
    info!(
        "{}",
        settings::format_effective_config(&config, args.config.as_deref())
    );

    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(category = %err.category(), error = %err, "gateway stopped");
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}

fn resolve_config(args: &cli::Cli) -> Result<Config, GatewayError> {
    let path = args.config.as_deref();
    let mut config = settings::load_config(path, |name| std::env::var(name).ok())?;
    settings::apply_cli(&mut config, args);
    settings::validate(&config, path)?;
    Ok(config)
}

async fn serve(config: Config) -> Result<(), GatewayError> {
    let browser = Arc::new(BrowserResource::new(
        Arc::new(ChromiumRenderer),
        config.launch_config(),
    ));
    let cache = CacheLayer::new(config.cache_store().await?);
    let probe: Arc<dyn ContentProbe> = if config.render.probe {
        Arc::new(HttpProbe::new(config.render.probe_timeout)?)
    } else {
        Arc::new(NoopProbe)
    };
    let policy = config.session_policy()?;
    let coordinator = RequestCoordinator::new(Arc::clone(&browser), cache, policy)
        .with_probe(probe)
        .with_wait_timeout(config.render.wait_timeout)
        .with_default_viewport(config.render.viewport);
    let app = build_router(AppState::new(coordinator));

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(address = %address, "listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    browser.shutdown().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
