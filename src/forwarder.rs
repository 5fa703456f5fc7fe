//! Upstream forwarding.
//!
//! Sends the client's original query bytes to the configured upstreams over
//! UDP. Each attempt has its own deadline covering name resolution, send and
//! receive. An upstream that answers with any well-formed response ends the
//! walk, whatever its response code.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures::future::select_ok;
use hickory_proto::op::{Message, MessageType};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::{Strategy, UpstreamConfig};
use crate::error::{ExchangeError, ForwardError};
use crate::transport::MAX_DNS_PACKET_SIZE;

/// Ordered upstream list with a per-attempt timeout.
#[derive(Debug, Clone)]
pub struct Forwarder {
    upstreams: Vec<String>,
    timeout: Duration,
    strategy: Strategy,
}

impl Forwarder {
    pub fn new(upstreams: Vec<String>, timeout: Duration, strategy: Strategy) -> Self {
        Self {
            upstreams,
            timeout,
            strategy,
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::new(config.servers.clone(), config.timeout(), config.strategy)
    }

    pub fn upstreams(&self) -> &[String] {
        &self.upstreams
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Forward `request` (raw wire bytes with ID `id`) and return the first
    /// good response.
    pub async fn forward(&self, request: &[u8], id: u16) -> Result<Message, ForwardError> {
        if self.upstreams.is_empty() {
            return Err(ForwardError::AllFailed { attempts: 0 });
        }

        match self.strategy {
            Strategy::Sequential => self.forward_sequential(request, id).await,
            Strategy::Race => self.forward_race(request, id).await,
        }
    }

    async fn forward_sequential(&self, request: &[u8], id: u16) -> Result<Message, ForwardError> {
        for upstream in &self.upstreams {
            let start = Instant::now();
            match exchange(upstream, request, id, self.timeout).await {
                Ok(response) => {
                    info!(
                        upstream = %upstream,
                        rcode = ?response.response_code(),
                        answers = response.answers().len(),
                        "Answer received from upstream"
                    );
                    debug!(
                        upstream = %upstream,
                        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "Upstream exchange finished"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    warn!(upstream = %upstream, error = %e, "Upstream exchange failed");
                }
            }
        }

        Err(ForwardError::AllFailed {
            attempts: self.upstreams.len(),
        })
    }

    /// Query every upstream at once and keep the first good answer. The
    /// remaining attempts are dropped, which cancels them.
    async fn forward_race(&self, request: &[u8], id: u16) -> Result<Message, ForwardError> {
        let attempts = self.upstreams.iter().map(|upstream| {
            Box::pin(async move {
                exchange(upstream, request, id, self.timeout)
                    .await
                    .map(|response| (upstream, response))
                    .inspect_err(|e| {
                        warn!(upstream = %upstream, error = %e, "Upstream exchange failed");
                    })
            })
        });

        match select_ok(attempts).await {
            Ok(((upstream, response), _pending)) => {
                info!(
                    upstream = %upstream,
                    rcode = ?response.response_code(),
                    answers = response.answers().len(),
                    "Answer received from upstream (race)"
                );
                Ok(response)
            }
            Err(_) => Err(ForwardError::AllFailed {
                attempts: self.upstreams.len(),
            }),
        }
    }
}

/// One request/response round trip with one upstream.
pub async fn exchange(
    upstream: &str,
    request: &[u8],
    id: u16,
    timeout: Duration,
) -> Result<Message, ExchangeError> {
    let buf = tokio::time::timeout(timeout, round_trip(upstream, request))
        .await
        .map_err(|_| ExchangeError::Timeout {
            upstream: upstream.to_string(),
            timeout_ms: timeout.as_millis(),
        })??;

    let response = Message::from_vec(&buf).map_err(|source| ExchangeError::Decode {
        upstream: upstream.to_string(),
        source,
    })?;

    if response.id() != id {
        return Err(ExchangeError::IdMismatch {
            upstream: upstream.to_string(),
            expected: id,
            got: response.id(),
        });
    }
    if response.message_type() != MessageType::Response {
        return Err(ExchangeError::NotAResponse {
            upstream: upstream.to_string(),
        });
    }

    Ok(response)
}

async fn round_trip(upstream: &str, request: &[u8]) -> Result<Vec<u8>, ExchangeError> {
    let addr = resolve_upstream(upstream).await?;

    let io_err = |source: io::Error| ExchangeError::Io {
        upstream: upstream.to_string(),
        source,
    };

    let bind_addr: SocketAddr = if addr.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };

    // Connected, so a closed port surfaces as an error instead of a timeout
    // and datagrams from other sources are filtered out.
    let socket = UdpSocket::bind(bind_addr).await.map_err(io_err)?;
    socket.connect(addr).await.map_err(io_err)?;
    socket.send(request).await.map_err(io_err)?;

    let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE];
    let len = socket.recv(&mut buf).await.map_err(io_err)?;
    buf.truncate(len);

    Ok(buf)
}

async fn resolve_upstream(upstream: &str) -> Result<SocketAddr, ExchangeError> {
    if let Ok(addr) = upstream.parse() {
        return Ok(addr);
    }

    tokio::net::lookup_host(upstream)
        .await
        .map_err(|source| ExchangeError::Resolve {
            upstream: upstream.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| ExchangeError::NoAddress {
            upstream: upstream.to_string(),
        })
}
