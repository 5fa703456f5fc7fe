//! Server orchestration.
//!
//! Builds the handler from configuration, binds the UDP transport and runs
//! the server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{Config, Strategy};
use crate::error::ServerError;
use crate::handler::RequestHandler;
use crate::resolver::Scope;
use crate::transport::udp::UdpTransport;

const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Run the DNS server with the given configuration.
///
/// Failing to bind the listening socket is the only error; once bound the
/// server runs indefinitely.
pub async fn run(config: &Config) -> Result<(), ServerError> {
    let bind_addr = config.server.listen_addr()?;
    let handler = Arc::new(RequestHandler::from_config(config));

    let udp = UdpTransport::bind(bind_addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: bind_addr,
            source,
        })?;

    log_startup(&handler, udp.local_addr().unwrap_or(bind_addr));

    let server = udp.start(handler.clone());

    // Print stats every minute
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            let stats = handler.stats().snapshot_and_reset();
            info!(
                uptime_secs = stats.uptime_secs,
                requests = stats.requests,
                local = stats.local,
                forwarded = stats.forwarded,
                zone_misses = stats.zone_misses,
                server_failures = stats.server_failures,
                avg_response_ms = stats.avg_response_ms,
                "stats"
            );
        }
    });

    if let Err(e) = server.await {
        warn!(error = %e, "UDP transport stopped");
    }

    Ok(())
}

fn log_startup(handler: &RequestHandler, addr: SocketAddr) {
    info!(%addr, "DNS server listening");

    let local = handler.local();
    match local.scope() {
        Scope::Table => info!(records = local.len(), "Answering local records"),
        Scope::Zone(suffix) => {
            info!(zone = %suffix, records = local.len(), "Answering local zone")
        }
    }
    for (name, address) in local.records() {
        info!(record = %name, address = %address, "Local record");
    }
    for name in local.unreachable_records() {
        warn!(record = %name, "Local record is outside the zone and will be forwarded instead");
    }

    let forwarder = handler.forwarder();
    let upstreams = forwarder.upstreams().join(", ");
    match forwarder.strategy() {
        Strategy::Sequential => info!(upstreams = %upstreams, "Forwarding in order"),
        Strategy::Race => info!(upstreams = %upstreams, "Racing upstreams"),
    }
}
