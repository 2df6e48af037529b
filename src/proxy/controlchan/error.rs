use thiserror::Error;

/// Errors from parsing intercepted control-channel traffic.
///
/// A tuple that does not parse as six decimal octets is never acted on
/// with default values; the session that produced it is dropped instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlChanError {
    #[error("malformed PORT command")]
    InvalidPortCommand,
    #[error("malformed 227 passive mode reply")]
    InvalidPassiveReply,
}
