//! UDP transport for DNS queries.
//!
//! One receive loop on the listening socket. Each datagram is handed to its
//! own task, which runs the request handler and sends the reply back to the
//! source address. Requests share nothing but the read-only handler.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::dns::HEADER_LEN;
use crate::handler::RequestHandler;

use super::MAX_DNS_PACKET_SIZE;

/// UDP listener for the DNS server.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Start the UDP transport.
    ///
    /// Spawns the receive loop; it runs until the returned handle is aborted.
    pub fn start(self, handler: Arc<RequestHandler>) -> JoinHandle<()> {
        tokio::spawn(run(self.socket, handler))
    }
}

async fn run(socket: Arc<UdpSocket>, handler: Arc<RequestHandler>) {
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "UDP recv error");
                continue;
            }
        };

        if len < HEADER_LEN {
            debug!(client = %src, len, "Dropping short datagram");
            continue;
        }

        let packet = buf[..len].to_vec();
        let socket = socket.clone();
        let handler = handler.clone();

        tokio::spawn(async move {
            let Some(reply) = handler.handle(&packet).await else {
                return;
            };
            if let Err(e) = socket.send_to(&reply, src).await {
                error!(client = %src, error = %e, "UDP response error");
            }
        });
    }
}
