//! # Dockyard
//!
//! Transport core for container engine control-plane clients.
//!
//! Dockyard provides:
//! - **Endpoint resolution** for `tcp://`, `http://`, `https://` and `unix://` addresses
//! - **Three call styles**: buffered requests, long-lived output streams, and hijacked
//!   bidirectional sessions
//! - **Cancellation** through a caller-owned [`Context`] plus an inactivity watchdog for streams
//! - **API versioning** with a lazily fetched, cached server version
//! - **TLS** client certificates via rustls, and a shared connection pool
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use dockyard::{Client, Context, QueryParams, RequestOptions};
//!
//! let client = Client::new_versioned("tcp://localhost:2375", "1.41").unwrap();
//! assert_eq!(
//!     client.url_for("/containers/json"),
//!     "http://localhost:2375/v1.41/containers/json"
//! );
//!
//! let options = RequestOptions::new()
//!     .query(QueryParams::new().flag("all", true))
//!     .context(Context::with_timeout(Duration::from_secs(10)));
//! assert_eq!(options.query.encode(), "all=1");
//! ```
//!
//! ## Architecture
//!
//! - [`dockyard-core`] - Errors, `Context`, `ApiVersion`, query building
//! - [`dockyard-codec`] - Multiplexed stdout/stderr frames
//! - [`dockyard-transport`] - Endpoints, dialing, TLS, HTTP/1.1 connections, pooling

mod client;
mod config;
mod hijack;
mod request;
mod stream;

pub use client::Client;
pub use config::{ClientConfig, DEFAULT_HOST, EnvConfig};
pub use hijack::{CloseWaiter, HijackOptions};
pub use request::{RequestOptions, Response};
pub use stream::{MULTIPLEXED_STREAM, RAW_STREAM, StreamOptions};

// Re-export core types
pub use dockyard_core::{
    ApiVersion, ClientError, CodecError, Context, ContextError, DockyardError, QueryParams,
    ToQuery, TransportError,
};

// Re-export codec
pub use dockyard_codec::{Sink, StdStream};

// Re-export transport
pub use dockyard_transport::{DialerConfig, Endpoint, PoolConfig, PoolStats, Scheme, TlsMaterial};

pub use http::{Method, StatusCode};
pub use tokio_util::sync::CancellationToken;

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
