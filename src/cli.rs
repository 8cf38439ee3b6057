use clap::{Parser, ValueEnum};
use prerender_lib::Viewport;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "prerender")]
#[command(
    version,
    about = "Prerender gateway - Serve rendered HTML snapshots of JavaScript pages",
    long_about = "Prerender gateway\n\nRequest /render/<url> to receive the page's HTML after its scripts have run. Snapshots are cached in memory; concurrent requests for the same page share one render.\n\nSettings are read from --config, then environment variables (PORT, MAX_REQUESTS, RENDER_TIMEOUT, ...), then the flags below."
)]
pub struct Cli {
    #[arg(long, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        long,
        value_name = "PATH",
        help = "Optional config file (TOML); environment variables and CLI flags override it"
    )]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Address to listen on")]
    pub host: Option<String>,

    #[arg(long, short, help = "Port to listen on")]
    pub port: Option<u16>,

    #[arg(long, help = "Default viewport when a request sets none (WIDTHxHEIGHT)")]
    pub viewport: Option<Viewport>,

    #[arg(long, value_enum, help = "Log output format")]
    pub log_format: Option<LogFormatArg>,

    #[arg(long, help = "Skip the content type probe before rendering")]
    pub no_probe: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Compact,
    Json,
}

pub fn parse() -> Cli {
    Cli::parse()
}
