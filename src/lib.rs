//! splitdns - answers a static table of names locally and forwards
//! everything else to upstream resolvers.
//!
//! The library exposes the resolver, forwarder and handler for testing and
//! benchmarking.

pub mod config;
pub mod dns;
pub mod error;
pub mod forwarder;
pub mod handler;
pub mod proxy;
pub mod resolver;
pub mod stats;
pub mod transport;
