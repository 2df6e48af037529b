use thiserror::Error;

/// Fatal errors surfaced by [`Proxy::listen`](crate::Proxy::listen).
///
/// Everything here terminates the process: listener, accept and connect
/// failures, and the idle timeout. Per-session trouble (a peer hanging up,
/// a malformed negotiation) never reaches this type; the session is dropped
/// and the accept loop keeps running.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no descriptor became ready within the idle timeout")]
    IdleTimeout,
}
