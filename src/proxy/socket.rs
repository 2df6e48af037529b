//! TCP primitives shared by the command and data channels.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

const LISTEN_BACKLOG: u32 = 5;

/// Binds the IPv4 wildcard address on `port` and listens. Address reuse is
/// set before binding so a restarted proxy can reclaim its ports without
/// waiting out TIME_WAIT.
pub(crate) fn bind_listen(port: u16) -> io::Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
    socket.listen(LISTEN_BACKLOG)
}

/// Connects to `host:port`, resolving `host` if it is a name.
pub(crate) async fn connect_host(host: &str, port: u16) -> io::Result<TcpStream> {
    TcpStream::connect((host, port)).await
}
