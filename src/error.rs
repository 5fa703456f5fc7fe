//! Error types.
//!
//! Nothing raised while answering a request reaches the listener: every
//! failure below `ServerError` ends up as a reply code or a dropped answer.

use std::io;
use std::net::{AddrParseError, SocketAddr};

use hickory_proto::error::ProtoError;
use thiserror::Error;

/// Failure to load or validate the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    FileRead(String, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// A local answer could not be turned into a resource record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid IPv4 address {address:?} for {name}")]
    InvalidAddress {
        name: String,
        address: String,
        #[source]
        source: AddrParseError,
    },
}

/// One exchange with one upstream failed.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("could not resolve upstream {upstream}")]
    Resolve {
        upstream: String,
        #[source]
        source: io::Error,
    },

    #[error("upstream {upstream} has no usable address")]
    NoAddress { upstream: String },

    #[error("I/O error talking to {upstream}: {source}")]
    Io {
        upstream: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {timeout_ms}ms waiting for {upstream}")]
    Timeout { upstream: String, timeout_ms: u128 },

    #[error("malformed response from {upstream}: {source}")]
    Decode {
        upstream: String,
        #[source]
        source: ProtoError,
    },

    #[error("response id {got} from {upstream} does not match query id {expected}")]
    IdMismatch {
        upstream: String,
        expected: u16,
        got: u16,
    },

    #[error("{upstream} sent a query instead of a response")]
    NotAResponse { upstream: String },
}

/// Every upstream failed for one question.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("all {attempts} upstream(s) failed")]
    AllFailed { attempts: usize },
}

/// Fatal startup errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}
