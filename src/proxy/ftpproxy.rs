//! The proxy entry point: configuration builder and the accept/event loop.

use log::{info, warn};
use std::fmt::Debug;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;

use super::error::ProxyError;
use super::session::{Session, SessionEvent, SessionOutcome};
use super::socket;
use crate::cache::{CacheStore, Filesystem};

const DEFAULT_CACHE_ROOT: &str = "cache";
const DEFAULT_ORIGIN_PORT: u16 = 21;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;

/// An instance of the caching FTP proxy. It relays one client session at a
/// time between the configured origin server and whoever connects, and
/// records passing transfers into its [`CacheStore`].
///
/// The proxy is started with the `listen` method.
///
/// # Example
///
/// ```rust
/// use ftpcache::Proxy;
///
/// // Use it in a builder-like pattern:
/// let proxy = Proxy::new("ftp.example.org", "10.0.0.100".parse().unwrap())
///     .idle_timeout(120);
/// // proxy.listen(21).await
/// ```
pub struct Proxy<C: CacheStore> {
    origin_host: String,
    origin_port: u16,
    advertised_ip: Ipv4Addr,
    cache: C,
    idle_timeout: Duration,
}

impl<C: CacheStore> Debug for Proxy<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("origin_host", &self.origin_host)
            .field("origin_port", &self.origin_port)
            .field("advertised_ip", &self.advertised_ip)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl Proxy<Filesystem> {
    /// Create a new `Proxy` in front of `origin_host` that advertises
    /// `advertised_ip` in rewritten negotiations, caching under `./cache`.
    pub fn new<H: Into<String>>(origin_host: H, advertised_ip: Ipv4Addr) -> Self {
        Self::with_cache(origin_host, advertised_ip, Filesystem::new(DEFAULT_CACHE_ROOT))
    }
}

impl<C> Proxy<C>
where
    C: CacheStore + Clone,
{
    /// Create a new `Proxy` with the given [`CacheStore`]. The other
    /// parameters are set to defaults.
    pub fn with_cache<H: Into<String>>(origin_host: H, advertised_ip: Ipv4Addr, cache: C) -> Self {
        Proxy {
            origin_host: origin_host.into(),
            origin_port: DEFAULT_ORIGIN_PORT,
            advertised_ip,
            cache,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }

    /// Set the port of the origin's command channel. The default is 21.
    pub fn origin_port(mut self, port: u16) -> Self {
        self.origin_port = port;
        self
    }

    /// Set the idle timeout in seconds. The default is 120 seconds; when
    /// no descriptor becomes ready for that long, `listen` gives up.
    pub fn idle_timeout(mut self, secs: u64) -> Self {
        self.idle_timeout = Duration::from_secs(secs);
        self
    }

    /// Runs the proxy: accepts command connections on `control_port` and
    /// serves one session at a time until a fatal error or the idle
    /// timeout. A new client connection supersedes the active session,
    /// closing all of its sockets.
    #[tracing_attributes::instrument]
    pub async fn listen(self, control_port: u16) -> Result<(), ProxyError> {
        let listener = socket::bind_listen(control_port)?;
        info!("Listening for command connection on port {}...", control_port);

        let mut session: Option<Session<C>> = None;
        loop {
            let wakeup = time::timeout(self.idle_timeout, async {
                tokio::select! {
                    res = listener.accept() => Wakeup::Client(res),
                    res = next_event_opt(session.as_ref()) => Wakeup::Session(res),
                }
            })
            .await;

            match wakeup {
                Err(_) => {
                    warn!("no descriptor became ready within {:?}", self.idle_timeout);
                    return Err(ProxyError::IdleTimeout);
                }
                Ok(Wakeup::Client(res)) => {
                    let (client_cmd, peer) = res?;
                    if session.take().is_some() {
                        info!("Superseding active session");
                    }
                    info!("Accepted new command connection from client ({})", peer);
                    let server_cmd = socket::connect_host(&self.origin_host, self.origin_port).await?;
                    info!("New command connection to server created");
                    session = Some(Session::new(
                        client_cmd,
                        server_cmd,
                        self.cache.clone(),
                        self.origin_host.clone(),
                        self.advertised_ip,
                    ));
                }
                Ok(Wakeup::Session(res)) => {
                    let event = res?;
                    if let Some(active) = session.as_mut() {
                        if active.handle_event(event).await? == SessionOutcome::Closed {
                            session = None;
                        }
                    }
                }
            }
        }
    }
}

enum Wakeup {
    Client(io::Result<(TcpStream, SocketAddr)>),
    Session(io::Result<SessionEvent>),
}

async fn next_event_opt<C: CacheStore>(session: Option<&Session<C>>) -> io::Result<SessionEvent> {
    match session {
        Some(session) => session.next_event().await,
        None => futures::future::pending().await,
    }
}
