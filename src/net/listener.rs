//! TCP listener binding.
//!
//! The listener is bound before the server task is spawned, so a bind
//! failure aborts startup instead of surfacing later from a background task.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::schema::ApplicationConfig;

#[derive(Debug, Error)]
pub enum ListenError {
    #[error("invalid listen address '{address}': {source}")]
    Address {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Bind the configured host and port. Port 0 picks an ephemeral port.
pub async fn bind(config: &ApplicationConfig) -> Result<TcpListener, ListenError> {
    let raw = config.bind_address();
    let address: SocketAddr = raw.parse().map_err(|source| ListenError::Address {
        address: raw.clone(),
        source,
    })?;

    let listener = TcpListener::bind(address)
        .await
        .map_err(|source| ListenError::Bind { address, source })?;

    let local_addr = listener
        .local_addr()
        .map_err(|source| ListenError::Bind { address, source })?;
    tracing::info!(address = %local_addr, "Listener bound");

    Ok(listener)
}
