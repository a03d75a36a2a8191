//! Error types for connection, receive and run failures.
//!
//! Only [`LoadError`] ever terminates a run. Transport and receive errors are
//! observed per connection and turned into counters by the component that
//! saw them.

use thiserror::Error;

/// Failure of a single transport operation (connect, send, receive, close).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// The peer closed the session or the stream ended.
    #[error("connection closed by peer")]
    Closed,
}

/// Why a connection produced no completion in a round.
#[derive(Debug, Error)]
pub enum ReceiveFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("canceled by round timeout")]
    TimedOut,
}

/// Run-terminating errors.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no connection to {url} could be established ({failures} attempts failed)")]
    PoolExhausted { url: String, failures: usize },

    #[error("driver cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: crate::engine::driver::DriverState,
    },

    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
}
