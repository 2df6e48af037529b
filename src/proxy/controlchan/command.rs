//! The client→server half of the control channel.
//
// Commands are line oriented: a verb of up to four characters, optionally
// followed by one space and an argument, terminated by CRLF. Only the four
// verbs that affect the data channel are recognized; matching is exact, so
// anything else (including lower-case spellings) relays verbatim.

use super::error::ControlChanError;
use std::net::Ipv4Addr;

/// A parsed client command, reduced to what the proxy acts on.
#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    /// `PORT h1,h2,h3,h4,p1,p2` — the client announces its data port.
    /// The host octets are validated but not kept; only the port bytes
    /// matter to the proxy.
    Port { p1: u8, p2: u8 },
    /// `PASV` — the client asks the server to announce a data port.
    Pasv,
    /// `RETR <name>` — download; `name` is the whole tail of the line.
    Retr { name: String },
    /// `STOR <name>` — upload; `name` is the whole tail of the line.
    Stor { name: String },
    /// Anything else; relayed without inspection.
    Other,
}

impl Command {
    /// Parses one command-channel read. Unrecognized verbs yield
    /// [`Command::Other`]; a recognized verb with a malformed argument is
    /// an error.
    pub fn parse(buf: &[u8]) -> Result<Command, ControlChanError> {
        match verb(buf) {
            b"PORT" => parse_port(buf),
            b"PASV" => Ok(Command::Pasv),
            b"RETR" => Ok(Command::Retr {
                name: argument(buf, b"RETR "),
            }),
            b"STOR" => Ok(Command::Stor {
                name: argument(buf, b"STOR "),
            }),
            _ => Ok(Command::Other),
        }
    }
}

/// The first token of the line: four bytes, or three when the fourth is a
/// space.
fn verb(buf: &[u8]) -> &[u8] {
    if buf.len() >= 4 && buf[3] == b' ' {
        &buf[..3]
    } else if buf.len() >= 4 {
        &buf[..4]
    } else {
        buf
    }
}

/// The argument tail after `prefix`, with trailing CR/LF stripped. Spaces
/// are part of the argument.
fn argument(buf: &[u8], prefix: &[u8]) -> String {
    let tail = buf.get(prefix.len()..).unwrap_or_default();
    let end = tail
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end]).into_owned()
}

fn parse_port(buf: &[u8]) -> Result<Command, ControlChanError> {
    let line = std::str::from_utf8(buf).map_err(|_| ControlChanError::InvalidPortCommand)?;
    let tail = line
        .strip_prefix("PORT ")
        .ok_or(ControlChanError::InvalidPortCommand)?;
    let octets = parse_tuple(tail.trim_end()).ok_or(ControlChanError::InvalidPortCommand)?;
    Ok(Command::Port {
        p1: octets[4],
        p2: octets[5],
    })
}

/// Parses `h1,h2,h3,h4,p1,p2` as six decimal octets.
pub(crate) fn parse_tuple(text: &str) -> Option<[u8; 6]> {
    let mut octets = [0u8; 6];
    let mut fields = text.split(',');
    for slot in octets.iter_mut() {
        *slot = fields.next()?.trim().parse().ok()?;
    }
    if fields.next().is_some() {
        return None;
    }
    Some(octets)
}

/// The data port encoded in a tuple's two port bytes.
pub fn peer_port(p1: u8, p2: u8) -> u16 {
    u16::from(p1) * 256 + u16::from(p2)
}

/// Renders the outbound `PORT` rewrite: the proxy's address with the
/// client's original port bytes preserved.
pub fn rewrite_port(advertised: Ipv4Addr, p1: u8, p2: u8) -> String {
    let o = advertised.octets();
    format!("PORT {},{},{},{},{},{}\n", o[0], o[1], o[2], o[3], p1, p2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_extracts_port_bytes() {
        let cmd = Command::parse(b"PORT 10,0,0,5,8,1\r\n").unwrap();
        assert_eq!(cmd, Command::Port { p1: 8, p2: 1 });
    }

    #[test]
    fn port_arithmetic() {
        assert_eq!(peer_port(8, 1), 2049);
        assert_eq!(peer_port(40, 10), 10250);
        assert_eq!(peer_port(0, 0), 0);
        assert_eq!(peer_port(255, 255), 65535);
    }

    #[test]
    fn malformed_port_is_rejected() {
        for line in [
            "PORT 1,2,3\r\n",
            "PORT 1,2,3,4,5,6,7\r\n",
            "PORT 300,0,0,1,8,1\r\n",
            "PORT a,b,c,d,e,f\r\n",
            "PORT \r\n",
            "PORT\r\n",
        ] {
            assert!(Command::parse(line.as_bytes()).is_err(), "{:?}", line);
        }
    }

    #[test]
    fn retr_takes_the_whole_tail() {
        let cmd = Command::parse(b"RETR hello.txt\r\n").unwrap();
        assert_eq!(
            cmd,
            Command::Retr {
                name: "hello.txt".to_string()
            }
        );

        let cmd = Command::parse(b"RETR my file with spaces.txt\r\n").unwrap();
        assert_eq!(
            cmd,
            Command::Retr {
                name: "my file with spaces.txt".to_string()
            }
        );
    }

    #[test]
    fn stor_strips_crlf() {
        let cmd = Command::parse(b"STOR upload.bin\r\n").unwrap();
        assert_eq!(
            cmd,
            Command::Stor {
                name: "upload.bin".to_string()
            }
        );
        // Bare LF line endings strip the same way.
        let cmd = Command::parse(b"STOR upload.bin\n").unwrap();
        assert_eq!(
            cmd,
            Command::Stor {
                name: "upload.bin".to_string()
            }
        );
    }

    #[test]
    fn unrecognized_verbs_pass_through() {
        for line in ["CWD /pub\r\n", "USER anonymous\r\n", "QUIT\r\n", "pasv\r\n", "LIST\r\n"] {
            assert_eq!(Command::parse(line.as_bytes()).unwrap(), Command::Other);
        }
    }

    #[test]
    fn short_reads_pass_through() {
        assert_eq!(Command::parse(b"").unwrap(), Command::Other);
        assert_eq!(Command::parse(b"PA").unwrap(), Command::Other);
    }

    #[test]
    fn rewrite_preserves_client_port_bytes() {
        let line = rewrite_port("10.0.0.100".parse().unwrap(), 8, 1);
        assert_eq!(line, "PORT 10,0,0,100,8,1\n");
    }
}
