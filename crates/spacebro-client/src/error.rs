//! Client errors.

use spacebro_core::HookError;
use spacebro_transport::TransportError;
use thiserror::Error;

/// Errors surfaced by [`Client`](crate::Client) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The broker address is empty.
    #[error("address must be a non-empty string")]
    InvalidAddress,

    /// The broker port is zero.
    #[error("port must be a positive integer")]
    InvalidPort,

    /// The first connection attempt failed.
    #[error("Connection error: {0}")]
    ConnectError(String),

    /// The first connection attempt timed out.
    #[error("Connection timeout")]
    ConnectTimeout,

    /// The client was dropped before its connection settled.
    #[error("Client dropped before the connection settled")]
    Abandoned,

    /// Transport error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A packer rejected an outgoing payload.
    #[error(transparent)]
    Hook(#[from] HookError),
}
