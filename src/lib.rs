//! ftpcache is a transparent, caching, application-layer proxy for FTP.
//!
//! The proxy sits between FTP clients and a single configured origin server.
//! Command-channel traffic is relayed verbatim, except that the data-channel
//! negotiations (`PORT` commands and `227` replies) are rewritten so that
//! both halves of every data connection terminate on the proxy. While
//! mediating the data channel the proxy keeps a filename-keyed cache on
//! disk: a download of a file that is already cached is answered from disk,
//! a transfer of an unknown file is recorded as it passes through.
//!
//! The [`Proxy`] type is the entry point:
//!
//! ```rust
//! use ftpcache::Proxy;
//!
//! let proxy = Proxy::new("ftp.example.org", "10.0.0.100".parse().unwrap());
//! // proxy.listen(21).await
//! ```

pub mod cache;
pub mod proxy;

pub use crate::cache::{CacheStore, Filesystem};
pub use crate::proxy::{Proxy, ProxyError};
