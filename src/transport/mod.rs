//! Network transports.
//!
//! UDP only: the server listens for queries on a UDP socket and the forwarder
//! talks to upstreams over UDP.

pub mod udp;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;
