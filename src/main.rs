use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use splitdns::config::{CliOverrides, Config};

#[derive(Parser)]
#[command(name = "splitdns")]
#[command(about = "DNS forwarder with a static local table", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Local port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Upstream DNS server (host:port), repeat to set fallback order
    #[arg(short, long)]
    upstream: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(
        args.config.as_deref(),
        CliOverrides {
            port: args.port,
            bind_address: args.bind,
            upstreams: args.upstream,
            log_level: args.log_level,
        },
    )?;

    init_logging(&config.logging.level);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(splitdns::proxy::run(&config))?;

    Ok(())
}
