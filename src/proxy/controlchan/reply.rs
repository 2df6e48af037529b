//! The server→client half of the control channel.
//
// Only one reply is ever inspected: `227 Entering Passive Mode
// (h1,h2,h3,h4,p1,p2)`, and only while the proxy has a PASV in flight.
// Everything else relays verbatim.

use super::command::parse_tuple;
use super::error::ControlChanError;
use std::net::Ipv4Addr;

/// The data-port half of a parsed `227` reply. The server's host octets
/// are validated but not kept; the proxy always dials the configured
/// origin host.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct PassiveReply {
    pub p1: u8,
    pub p2: u8,
}

impl PassiveReply {
    pub fn port(&self) -> u16 {
        super::command::peer_port(self.p1, self.p2)
    }
}

/// Whether a server reply opens with code 227.
pub fn is_passive_reply(buf: &[u8]) -> bool {
    buf.starts_with(b"227")
}

/// Parses the six-octet tuple out of a `227` reply.
pub fn parse_passive_reply(buf: &[u8]) -> Result<PassiveReply, ControlChanError> {
    let line = std::str::from_utf8(buf).map_err(|_| ControlChanError::InvalidPassiveReply)?;
    let open = line.find('(').ok_or(ControlChanError::InvalidPassiveReply)?;
    let close = line[open..]
        .find(')')
        .ok_or(ControlChanError::InvalidPassiveReply)?
        + open;
    let octets = parse_tuple(&line[open + 1..close]).ok_or(ControlChanError::InvalidPassiveReply)?;
    Ok(PassiveReply {
        p1: octets[4],
        p2: octets[5],
    })
}

/// Renders the rewritten `227` advertising the proxy's address with the
/// server's original port bytes.
pub fn rewrite_passive_reply(advertised: Ipv4Addr, reply: PassiveReply) -> String {
    let o = advertised.octets();
    format!(
        "227 Entering Passive Mode ({},{},{},{},{},{})\n",
        o[0], o[1], o[2], o[3], reply.p1, reply.p2
    )
}
