//! One client's worth of proxy state: both command sockets, the data
//! channel being negotiated or spliced, and the cache interaction of the
//! transfer in flight.

use futures::future;
use log::{debug, info, warn};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use super::controlchan::{command, reply, Command};
use super::error::ProxyError;
use super::{datachan, socket};
use crate::cache::{CacheAppender, CacheStore};

pub(crate) const BUFFER_SIZE: usize = 2048;

/// How the data channel is being negotiated.
#[derive(Debug, PartialEq, Clone, Copy)]
pub(crate) enum TransferMode {
    /// The client announced a port with `PORT`; the server dials in.
    Active,
    /// The server announced a port in a `227`; the client dials in.
    Passive,
}

/// Which way file bytes flow on the data channel.
#[derive(Debug, PartialEq, Clone, Copy)]
pub(crate) enum TransferDir {
    /// `RETR`: server to client.
    Download,
    /// `STOR`: client to server.
    Upload,
}

/// What the cache contributes to the transfer in flight.
#[derive(Debug, PartialEq, Clone, Copy)]
pub(crate) enum CacheState {
    /// Nothing; plain splice.
    None,
    /// The artifact exists and will be replayed in place of one leg.
    HitReplay,
    /// The artifact is being recorded as the splice runs.
    MissRecord,
}

/// A readiness event dispatched to the session.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    ClientCmd,
    ServerCmd,
    /// A peer connected to the data listener.
    DataPeer(TcpStream, SocketAddr),
    DataIn,
    DataOut,
}

/// What the event loop should do with the session afterwards.
#[derive(Debug, PartialEq)]
pub(crate) enum SessionOutcome {
    Continue,
    /// The command channel is finished; drop the session and await the
    /// next client.
    Closed,
}

pub(crate) struct Session<C: CacheStore> {
    client_cmd: TcpStream,
    server_cmd: TcpStream,
    data_listener: Option<TcpListener>,
    data_in: Option<TcpStream>,
    data_out: Option<TcpStream>,
    mode: TransferMode,
    awaiting_pasv_reply: bool,
    transfer_dir: TransferDir,
    pending_filename: Option<String>,
    cache_state: CacheState,
    active_peer_port: u16,
    passive_peer_port: u16,
    appender: Option<C::Appender>,
    cache: C,
    origin_host: String,
    advertised_ip: Ipv4Addr,
}

impl<C: CacheStore> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field("awaiting_pasv_reply", &self.awaiting_pasv_reply)
            .field("transfer_dir", &self.transfer_dir)
            .field("pending_filename", &self.pending_filename)
            .field("cache_state", &self.cache_state)
            .field("active_peer_port", &self.active_peer_port)
            .field("passive_peer_port", &self.passive_peer_port)
            .finish()
    }
}

impl<C: CacheStore> Session<C> {
    pub(crate) fn new(
        client_cmd: TcpStream,
        server_cmd: TcpStream,
        cache: C,
        origin_host: String,
        advertised_ip: Ipv4Addr,
    ) -> Self {
        Session {
            client_cmd,
            server_cmd,
            data_listener: None,
            data_in: None,
            data_out: None,
            mode: TransferMode::Active,
            awaiting_pasv_reply: false,
            transfer_dir: TransferDir::Download,
            pending_filename: None,
            cache_state: CacheState::None,
            active_peer_port: 0,
            passive_peer_port: 0,
            appender: None,
            cache,
            origin_host,
            advertised_ip,
        }
    }

    /// Waits for the next readiness event over exactly the descriptors the
    /// session currently holds; absent ones never fire.
    pub(crate) async fn next_event(&self) -> io::Result<SessionEvent> {
        tokio::select! {
            res = accept_opt(self.data_listener.as_ref()) => {
                res.map(|(stream, peer)| SessionEvent::DataPeer(stream, peer))
            }
            res = readable_opt(self.data_in.as_ref()) => res.map(|()| SessionEvent::DataIn),
            res = readable_opt(self.data_out.as_ref()) => res.map(|()| SessionEvent::DataOut),
            res = self.client_cmd.readable() => res.map(|()| SessionEvent::ClientCmd),
            res = self.server_cmd.readable() => res.map(|()| SessionEvent::ServerCmd),
        }
    }

    #[tracing_attributes::instrument]
    pub(crate) async fn handle_event(&mut self, event: SessionEvent) -> Result<SessionOutcome, ProxyError> {
        match event {
            SessionEvent::ClientCmd => self.handle_client_cmd().await,
            SessionEvent::ServerCmd => self.handle_server_cmd().await,
            SessionEvent::DataPeer(stream, peer) => self.handle_data_peer(stream, peer).await,
            SessionEvent::DataIn => self.handle_data_ready(Leg::In).await,
            SessionEvent::DataOut => self.handle_data_ready(Leg::Out).await,
        }
    }

    async fn handle_client_cmd(&mut self) -> Result<SessionOutcome, ProxyError> {
        let mut buf = [0u8; BUFFER_SIZE];
        let n = match self.client_cmd.try_read(&mut buf) {
            Ok(0) => {
                info!("Client disconnected");
                return Ok(SessionOutcome::Closed);
            }
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(SessionOutcome::Continue),
            Err(err) => {
                warn!("client command socket error: {}", err);
                return Ok(SessionOutcome::Closed);
            }
        };
        debug!("Received from client: {}", String::from_utf8_lossy(&buf[..n]).trim_end());
        self.relay_client_command(&buf[..n]).await
    }

    async fn handle_server_cmd(&mut self) -> Result<SessionOutcome, ProxyError> {
        let mut buf = [0u8; BUFFER_SIZE];
        let n = match self.server_cmd.try_read(&mut buf) {
            Ok(0) => {
                info!("Server disconnected");
                return Ok(SessionOutcome::Closed);
            }
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(SessionOutcome::Continue),
            Err(err) => {
                warn!("server command socket error: {}", err);
                return Ok(SessionOutcome::Closed);
            }
        };
        debug!("Received from server: {}", String::from_utf8_lossy(&buf[..n]).trim_end());
        self.relay_server_reply(&buf[..n]).await
    }

    /// Client→server relay. Four verbs are acted on; everything else is
    /// forwarded untouched.
    async fn relay_client_command(&mut self, line: &[u8]) -> Result<SessionOutcome, ProxyError> {
        let parsed = match Command::parse(line) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("dropping session: {}", err);
                return Ok(SessionOutcome::Closed);
            }
        };
        match parsed {
            Command::Port { p1, p2 } => {
                self.mode = TransferMode::Active;
                self.active_peer_port = command::peer_port(p1, p2);
                self.open_data_listener(self.active_peer_port)?;
                let rewritten = command::rewrite_port(self.advertised_ip, p1, p2);
                self.send_to_server(rewritten.as_bytes()).await
            }
            Command::Pasv => {
                self.mode = TransferMode::Passive;
                self.awaiting_pasv_reply = true;
                self.send_to_server(line).await
            }
            Command::Retr { name } => {
                self.transfer_dir = TransferDir::Download;
                self.stage_transfer(name).await;
                self.send_to_server(line).await
            }
            Command::Stor { name } => {
                self.transfer_dir = TransferDir::Upload;
                self.stage_transfer(name).await;
                self.send_to_server(line).await
            }
            Command::Other => self.send_to_server(line).await,
        }
    }

    /// Server→client relay. Only a `227` with a PASV in flight is touched.
    async fn relay_server_reply(&mut self, line: &[u8]) -> Result<SessionOutcome, ProxyError> {
        if !(self.awaiting_pasv_reply && reply::is_passive_reply(line)) {
            return self.send_to_client(line).await;
        }
        let passive = match reply::parse_passive_reply(line) {
            Ok(passive) => passive,
            Err(err) => {
                warn!("dropping session: {}", err);
                return Ok(SessionOutcome::Closed);
            }
        };
        self.passive_peer_port = passive.port();
        self.awaiting_pasv_reply = false;
        self.open_data_listener(self.passive_peer_port)?;
        let rewritten = reply::rewrite_passive_reply(self.advertised_ip, passive);
        self.send_to_client(rewritten.as_bytes()).await
    }

    /// Decides what the cache contributes to the transfer named by a
    /// `RETR`/`STOR` and remembers the filename.
    async fn stage_transfer(&mut self, name: String) {
        self.cache_state = if self.cache.exists(&name).await {
            info!("Cache hit: {}", name);
            CacheState::HitReplay
        } else {
            info!("Cache miss: {}", name);
            CacheState::MissRecord
        };
        self.pending_filename = Some(name);
        // Clients are free to open the data connection before issuing the
        // transfer command; when it is already up, act on the staging now
        // instead of waiting for a listener event that already happened.
        if self.data_in.is_some() {
            match self.cache_state {
                CacheState::HitReplay => self.replay_from_cache().await,
                CacheState::MissRecord => self.open_recording().await,
                CacheState::None => {}
            }
        }
    }

    /// A peer connected to the data listener: wire up both halves of the
    /// data channel, then replay, record or splice as staged.
    async fn handle_data_peer(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<SessionOutcome, ProxyError> {
        // A fresh data connection replaces whatever transfer was running.
        self.data_in = None;
        self.data_out = None;
        self.appender = None;

        let outbound_port = match self.mode {
            TransferMode::Active => {
                info!("Accepted data connection from server ({})", peer);
                self.active_peer_port
            }
            TransferMode::Passive => {
                info!("Accepted data connection from client ({})", peer);
                self.passive_peer_port
            }
        };
        // In active mode the outbound leg dials the origin host on the
        // client's announced port; RFC 959 would have it dial the client's
        // own address.
        let outbound = socket::connect_host(&self.origin_host, outbound_port).await?;
        info!("Data connection to server created");
        self.data_in = Some(stream);
        self.data_out = Some(outbound);

        match self.cache_state {
            CacheState::HitReplay => self.replay_from_cache().await,
            CacheState::MissRecord => self.open_recording().await,
            CacheState::None => {}
        }
        Ok(SessionOutcome::Continue)
    }

    /// HIT fast path: stream the artifact into whichever socket faces the
    /// reader of the transfer, then drop both data sockets. The upstream
    /// copy of the data still arrives but dies with the closed channel.
    #[tracing_attributes::instrument]
    async fn replay_from_cache(&mut self) {
        let name = match self.pending_filename.clone() {
            Some(name) => name,
            None => {
                self.cache_state = CacheState::None;
                return;
            }
        };
        let mut reader = match self.cache.open_read(&name).await {
            Ok(reader) => reader,
            Err(err) => {
                // Unreadable artifact: carry the transfer as a plain splice.
                warn!("cannot open cache artifact {}: {}", name, err);
                self.cache_state = CacheState::None;
                return;
            }
        };
        let sink = match (self.transfer_dir, self.mode) {
            (TransferDir::Download, TransferMode::Passive) => self.data_in.as_mut(),
            (TransferDir::Download, TransferMode::Active) => self.data_out.as_mut(),
            (TransferDir::Upload, TransferMode::Passive) => self.data_out.as_mut(),
            (TransferDir::Upload, TransferMode::Active) => self.data_in.as_mut(),
        };
        if let Some(sink) = sink {
            match datachan::replay(&mut reader, sink).await {
                Ok(total) => info!("Replayed {} bytes from cache: {}", total, name),
                Err(err) => warn!("cache replay aborted: {}", err),
            }
        }
        self.close_data_channel();
    }

    /// MISS path: open the artifact for appending before any bytes flow,
    /// so even an empty transfer allocates it.
    async fn open_recording(&mut self) {
        let name = match self.pending_filename.clone() {
            Some(name) => name,
            None => {
                self.cache_state = CacheState::None;
                return;
            }
        };
        match self.cache.open_append(&name).await {
            Ok(appender) => self.appender = Some(appender),
            Err(err) => {
                warn!("Cannot open cache file {}: {}", name, err);
                self.cache_state = CacheState::None;
            }
        }
    }

    /// One readiness-worth of splicing on either data leg.
    async fn handle_data_ready(&mut self, leg: Leg) -> Result<SessionOutcome, ProxyError> {
        let mut buf = [0u8; BUFFER_SIZE];
        let copied = match leg {
            Leg::In => match (self.data_in.as_ref(), self.data_out.as_mut()) {
                (Some(src), Some(dst)) => datachan::splice_chunk(src, dst, &mut buf).await,
                _ => return Ok(SessionOutcome::Continue),
            },
            Leg::Out => match (self.data_out.as_ref(), self.data_in.as_mut()) {
                (Some(src), Some(dst)) => datachan::splice_chunk(src, dst, &mut buf).await,
                _ => return Ok(SessionOutcome::Continue),
            },
        };
        match copied {
            Ok(None) => {
                debug!("data channel closed by peer");
                self.close_data_channel();
                Ok(SessionOutcome::Continue)
            }
            Ok(Some(0)) => Ok(SessionOutcome::Continue),
            Ok(Some(n)) => {
                debug!("Received data: {} bytes", n);
                self.record_chunk(&buf[..n]).await;
                Ok(SessionOutcome::Continue)
            }
            Err(err) => {
                warn!("data channel error: {}", err);
                self.close_data_channel();
                Ok(SessionOutcome::Continue)
            }
        }
    }

    /// Appends spliced bytes to the artifact while recording; a failed
    /// append abandons recording but never the transfer.
    async fn record_chunk(&mut self, bytes: &[u8]) {
        if self.cache_state != CacheState::MissRecord {
            return;
        }
        let appender = match self.appender.as_mut() {
            Some(appender) => appender,
            None => return,
        };
        if let Err(err) = appender.append(bytes).await {
            warn!("cannot append to cache artifact: {}", err);
            self.appender = None;
            self.cache_state = CacheState::None;
        }
    }

    fn open_data_listener(&mut self, port: u16) -> io::Result<()> {
        self.data_listener = None;
        let listener = socket::bind_listen(port)?;
        info!("Listening for data connection on port {}...", port);
        self.data_listener = Some(listener);
        Ok(())
    }

    fn close_data_channel(&mut self) {
        self.data_in = None;
        self.data_out = None;
        self.appender = None;
        self.cache_state = CacheState::None;
    }

    async fn send_to_server(&mut self, bytes: &[u8]) -> Result<SessionOutcome, ProxyError> {
        debug!("Send to server: {}", String::from_utf8_lossy(bytes).trim_end());
        match self.server_cmd.write_all(bytes).await {
            Ok(()) => Ok(SessionOutcome::Continue),
            Err(err) => {
                warn!("server command socket error: {}", err);
                Ok(SessionOutcome::Closed)
            }
        }
    }

    async fn send_to_client(&mut self, bytes: &[u8]) -> Result<SessionOutcome, ProxyError> {
        debug!("Send to client: {}", String::from_utf8_lossy(bytes).trim_end());
        match self.client_cmd.write_all(bytes).await {
            Ok(()) => Ok(SessionOutcome::Continue),
            Err(err) => {
                warn!("client command socket error: {}", err);
                Ok(SessionOutcome::Closed)
            }
        }
    }
}

/// Which data socket a readiness event arrived on.
#[derive(Debug, Clone, Copy)]
enum Leg {
    In,
    Out,
}

async fn readable_opt(sock: Option<&TcpStream>) -> io::Result<()> {
    match sock {
        Some(sock) => sock.readable().await,
        None => future::pending().await,
    }
}

async fn accept_opt(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => future::pending().await,
    }
}
