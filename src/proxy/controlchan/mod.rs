//! Parsing and rewriting of the FTP control channel.
//!
//! The proxy understands just enough of RFC 959 to take over data-channel
//! negotiation: `PORT`, `PASV`, `RETR` and `STOR` on the client side and
//! the `227` reply on the server side. Everything else passes through
//! byte-identically.

pub mod command;
pub mod error;
pub mod reply;

pub use command::Command;
pub use error::ControlChanError;
