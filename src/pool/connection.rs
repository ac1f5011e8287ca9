//! Connection abstraction the pool manages.
//!
//! # Responsibilities
//! - Establish and tear down transport connectivity to one node
//! - Offer a cheap liveness probe for latency measurement
//!
//! # Design Decisions
//! - `start` is not required to be idempotent; the pool tracks status
//! - `stop` never fails
//! - Probe timeouts belong to the transport, not to the pool

use futures_util::future::BoxFuture;
use thiserror::Error;

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("not connected")]
    NotConnected,

    #[error("server returned error {code}: {message}")]
    Rpc { code: i64, message: String },
}

/// A connection to one backend node.
pub trait NodeConnection: Send + Sync + 'static {
    /// Establish transport-level connectivity.
    fn start(&self) -> BoxFuture<'_, Result<(), ConnectionError>>;

    /// Tear down the transport.
    fn stop(&self) -> BoxFuture<'_, ()>;

    /// Protocol-level liveness probe.
    fn ping(&self) -> BoxFuture<'_, Result<(), ConnectionError>>;
}
