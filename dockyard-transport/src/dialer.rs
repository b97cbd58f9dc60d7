//! Opening byte streams to an endpoint.

use std::pin::pin;
use std::time::Duration;

use futures::future::{Either, select};
use futures_timer::Delay;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;

use dockyard_core::{DockyardError, TransportError};

use crate::endpoint::{Endpoint, Target};
use crate::tls::{TlsClientConfig, server_name};
use crate::{tcp, uds};

/// A bidirectional byte stream to the engine.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased connection returned by [`Dialer::dial`].
pub type BoxedIo = Box<dyn Io>;

/// Configuration for dialing.
#[derive(Debug, Clone)]
pub struct DialerConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,

    /// TLS handshake timeout.
    pub handshake_timeout: Duration,

    /// Enable TCP nodelay.
    pub nodelay: bool,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            nodelay: true,
        }
    }
}

impl DialerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

/// Opens connections to one endpoint.
///
/// Secure TCP endpoints are wrapped in TLS; Unix sockets are always dialed
/// in clear, even when TLS material was configured.
#[derive(Debug, Clone)]
pub struct Dialer {
    endpoint: Endpoint,
    tls: Option<TlsClientConfig>,
    config: DialerConfig,
}

impl Dialer {
    /// Create a dialer.
    ///
    /// A secure endpoint without TLS configuration verifies servers against
    /// the bundled web PKI roots.
    pub fn new(
        endpoint: Endpoint,
        tls: Option<TlsClientConfig>,
        config: DialerConfig,
    ) -> Result<Self, DockyardError> {
        let tls = match (endpoint.is_secure(), tls) {
            (true, Some(tls)) => Some(tls),
            (true, None) => Some(TlsClientConfig::new()?),
            (false, Some(_)) => {
                tracing::debug!(endpoint = %endpoint, "endpoint is not secure; TLS configuration unused");
                None
            }
            (false, None) => None,
        };

        Ok(Self {
            endpoint,
            tls,
            config,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[must_use]
    pub fn config(&self) -> &DialerConfig {
        &self.config
    }

    /// Open a new connection.
    pub async fn dial(&self) -> Result<BoxedIo, TransportError> {
        match self.endpoint.target() {
            Target::Unix(path) => Ok(Box::new(
                uds::connect(path, self.config.connect_timeout).await?,
            )),
            Target::Tcp { host, port } => {
                let stream = tcp::connect(host, *port, &self.config).await?;
                match &self.tls {
                    Some(tls) => self.handshake(tls, host, stream).await,
                    None => Ok(Box::new(stream)),
                }
            }
        }
    }

    async fn handshake(
        &self,
        tls: &TlsClientConfig,
        host: &str,
        stream: tokio::net::TcpStream,
    ) -> Result<BoxedIo, TransportError> {
        let sni = server_name(host)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let connector = TlsConnector::from(tls.rustls_config());

        let handshake_fut = pin!(connector.connect(sni, stream));
        let timeout_fut = pin!(Delay::new(self.config.handshake_timeout));

        match select(handshake_fut, timeout_fut).await {
            Either::Left((Ok(stream), _)) => {
                tracing::debug!(host, "tls handshake complete");
                Ok(Box::new(stream))
            }
            Either::Left((Err(e), _)) => Err(TransportError::Tls(format!(
                "TLS handshake failed: {e}"
            ))),
            Either::Right(_) => Err(TransportError::Tls(
                "TLS handshake timed out".to_string(),
            )),
        }
    }
}
