//! # dockyard-transport
//!
//! Transport layer for talking to a container engine.
//!
//! This crate provides:
//! - `Endpoint` - Parsing and normalization of engine endpoint strings
//! - `Dialer` - TCP, Unix socket and TLS connection setup
//! - `HttpConnection` - HTTP/1.1 client connection over a dialed stream
//! - `ConnectionPool` - Reuse of idle connections between calls
//! - `TlsMaterial` / `TlsClientConfig` - Client TLS configuration via rustls

mod dialer;
mod endpoint;
mod http;
mod pool;
mod tcp;
mod tls;
mod uds;

pub use dialer::{BoxedIo, Dialer, DialerConfig, Io};
pub use endpoint::{Endpoint, Scheme, Target, UNIX_HOST};
pub use http::{HttpConnection, RequestBody};
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection, Reusable};
pub use tls::{TlsClientConfig, TlsMaterial, server_name};
