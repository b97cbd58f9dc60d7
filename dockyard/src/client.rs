//! The engine client.

use std::path::Path;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::{Either, select};
use futures_timer::Delay;
use http::header::{CONTENT_TYPE, HOST, HeaderName, HeaderValue, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use serde::Deserialize;
use tokio::sync::OnceCell;

use dockyard_core::{ApiVersion, ClientError, Context, DockyardError, TransportError};
use dockyard_transport::{
    ConnectionPool, Dialer, Endpoint, HttpConnection, PoolStats, PooledConnection, RequestBody,
    TlsClientConfig, TlsMaterial,
};

use crate::config::{ClientConfig, EnvConfig};
use crate::request::RequestOptions;

/// Value of the `User-Agent` header.
pub(crate) const USER_AGENT_VALUE: &str = concat!("dockyard/", env!("CARGO_PKG_VERSION"));

/// Client for a container engine's HTTP API.
///
/// Cloning is cheap; clones share the connection pool and the cached server
/// version. All methods take `&self` and may be called from many tasks.
///
/// ```rust
/// use dockyard::Client;
///
/// let client = Client::new("tcp://localhost:2375").unwrap();
/// assert_eq!(client.url_for("/_ping"), "http://localhost:2375/_ping");
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    endpoint: Endpoint,
    dialer: Dialer,
    pool: ConnectionPool<HttpConnection>,
    api_version: Option<ApiVersion>,
    skip_server_version_check: bool,
    timeout: Option<Duration>,
    server_version: OnceCell<ApiVersion>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("api_version", &self.inner.api_version)
            .field("skip_server_version_check", &self.inner.skip_server_version_check)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct VersionDocument {
    #[serde(rename = "ApiVersion")]
    api_version: String,
}

impl Client {
    /// Create a client from a configuration.
    pub fn with_config(config: ClientConfig) -> Result<Self, DockyardError> {
        let mut endpoint = Endpoint::parse(&config.endpoint)?;
        let tls = config
            .tls
            .as_ref()
            .map(TlsClientConfig::from_material)
            .transpose()?;
        if tls.is_some() {
            endpoint = endpoint.secure();
        }

        let dialer = Dialer::new(endpoint.clone(), tls, config.dialer)?;
        tracing::debug!(endpoint = %endpoint, secure = endpoint.is_secure(), "client created");

        Ok(Self {
            inner: Arc::new(ClientInner {
                endpoint,
                dialer,
                pool: ConnectionPool::new(config.pool),
                api_version: config.api_version,
                skip_server_version_check: config.skip_server_version_check,
                timeout: config.timeout,
                server_version: OnceCell::new(),
            }),
        })
    }

    /// Client without a requested API version; the server check is skipped.
    pub fn new(endpoint: &str) -> Result<Self, DockyardError> {
        Self::with_config(ClientConfig::new(endpoint))
    }

    /// Client pinned to an API version.
    pub fn new_versioned(endpoint: &str, version: &str) -> Result<Self, DockyardError> {
        Self::with_config(ClientConfig::new(endpoint).api_version(ApiVersion::parse(version)?))
    }

    /// TLS client with PEM files. Without `ca` the server is not verified.
    pub fn new_tls(
        endpoint: &str,
        cert: impl AsRef<Path>,
        key: impl AsRef<Path>,
        ca: Option<&Path>,
    ) -> Result<Self, DockyardError> {
        let material = TlsMaterial::from_files(Some(cert.as_ref()), Some(key.as_ref()), ca)?;
        Self::with_config(ClientConfig::new(endpoint).tls(material))
    }

    /// TLS client with PEM files, pinned to an API version.
    pub fn new_versioned_tls(
        endpoint: &str,
        cert: impl AsRef<Path>,
        key: impl AsRef<Path>,
        ca: Option<&Path>,
        version: &str,
    ) -> Result<Self, DockyardError> {
        let version = ApiVersion::parse(version)?;
        let material = TlsMaterial::from_files(Some(cert.as_ref()), Some(key.as_ref()), ca)?;
        Self::with_config(ClientConfig::new(endpoint).tls(material).api_version(version))
    }

    /// TLS client with in-memory PEM blocks.
    pub fn new_tls_from_pem(
        endpoint: &str,
        cert: &[u8],
        key: &[u8],
        ca: Option<&[u8]>,
    ) -> Result<Self, DockyardError> {
        let material = TlsMaterial::from_pem(cert, key, ca.map(<[u8]>::to_vec));
        Self::with_config(ClientConfig::new(endpoint).tls(material))
    }

    /// TLS client with in-memory PEM blocks, pinned to an API version.
    pub fn new_versioned_tls_from_pem(
        endpoint: &str,
        cert: &[u8],
        key: &[u8],
        ca: Option<&[u8]>,
        version: &str,
    ) -> Result<Self, DockyardError> {
        let version = ApiVersion::parse(version)?;
        let material = TlsMaterial::from_pem(cert, key, ca.map(<[u8]>::to_vec));
        Self::with_config(ClientConfig::new(endpoint).tls(material).api_version(version))
    }

    /// Client configured from `DOCKER_HOST`, `DOCKER_TLS_VERIFY` and
    /// `DOCKER_CERT_PATH`.
    pub fn from_env() -> Result<Self, DockyardError> {
        Self::with_config(EnvConfig::from_env().client_config()?)
    }

    /// Like [`from_env`](Self::from_env), pinned to an API version.
    pub fn versioned_from_env(version: &str) -> Result<Self, DockyardError> {
        let version = ApiVersion::parse(version)?;
        Self::with_config(EnvConfig::from_env().client_config()?.api_version(version))
    }

    /// The normalized endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// The requested API version, if any.
    #[must_use]
    pub fn api_version(&self) -> Option<&ApiVersion> {
        self.inner.api_version.as_ref()
    }

    #[must_use]
    pub fn skips_server_version_check(&self) -> bool {
        self.inner.skip_server_version_check
    }

    /// The server's API version, once a call has fetched it.
    #[must_use]
    pub fn server_api_version(&self) -> Option<&ApiVersion> {
        self.inner.server_version.get()
    }

    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Full URL a request for `path` is sent to.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        self.inner.endpoint.url_for(&self.versioned_path(path))
    }

    /// Check that the engine answers `GET /_ping` with 200.
    pub async fn ping(&self, ctx: &Context) -> Result<(), DockyardError> {
        let response = self
            .request(Method::GET, "/_ping", RequestOptions::new().context(ctx.clone()))
            .await?;
        if response.status != StatusCode::OK {
            return Err(ClientError::from_body(response.status.as_u16(), &response.body).into());
        }
        Ok(())
    }

    fn versioned_path(&self, path: &str) -> String {
        match &self.inner.api_version {
            Some(version) if !self.inner.skip_server_version_check => format!("/v{version}{path}"),
            _ => path.to_string(),
        }
    }

    pub(crate) fn dialer(&self) -> &Dialer {
        &self.inner.dialer
    }

    /// Client-wide bound on buffered requests.
    pub(crate) fn request_timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    /// Fetch and cache the server API version, once per client.
    ///
    /// A failed fetch is not cached. A server older than the requested
    /// version is only logged.
    pub(crate) async fn ensure_server_version(&self, ctx: &Context) -> Result<(), DockyardError> {
        if self.inner.skip_server_version_check {
            return Ok(());
        }

        self.inner
            .server_version
            .get_or_try_init(|| self.fetch_server_version(ctx))
            .await?;
        Ok(())
    }

    async fn fetch_server_version(&self, ctx: &Context) -> Result<ApiVersion, DockyardError> {
        let options = RequestOptions::new().context(ctx.clone());
        let request = self.build_request(&Method::GET, "/version", &options)?;
        let (status, body) = self.exchange(request).await?;
        if !is_success(status) {
            return Err(ClientError::from_body(status.as_u16(), &body).into());
        }

        let document: VersionDocument = serde_json::from_slice(&body)
            .map_err(|e| DockyardError::InvalidResponse(format!("version document: {e}")))?;
        let server = ApiVersion::parse(&document.api_version)?;

        if let Some(requested) = &self.inner.api_version {
            if server.less_than(requested) {
                tracing::warn!(%server, %requested, "engine API version is older than requested");
            }
        }
        tracing::debug!(%server, "server API version cached");
        Ok(server)
    }

    /// Build the request for `path`, version prefix included.
    pub(crate) fn build_versioned(
        &self,
        method: &Method,
        path: &str,
        options: &RequestOptions,
    ) -> Result<Request<RequestBody>, DockyardError> {
        self.build_request(method, &self.versioned_path(path), options)
    }

    fn build_request(
        &self,
        method: &Method,
        path: &str,
        options: &RequestOptions,
    ) -> Result<Request<RequestBody>, DockyardError> {
        let endpoint = &self.inner.endpoint;
        let mut target = endpoint.request_target(path);
        let query = options.query.encode();
        if !query.is_empty() {
            target.push(if target.contains('?') { '&' } else { '?' });
            target.push_str(&query);
        }

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(target)
            .header(HOST, endpoint.host_header())
            .header(USER_AGENT, USER_AGENT_VALUE);
        if options.body.is_some() || options.force_json {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| DockyardError::InvalidRequest(format!("header {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| DockyardError::InvalidRequest(format!("header {name}: {e}")))?;
            builder = builder.header(name, value);
        }

        builder
            .body(Full::new(options.body.clone().unwrap_or_default()))
            .map_err(|e| DockyardError::InvalidRequest(e.to_string()))
    }

    /// Check out a ready connection, dialing when no idle one is usable.
    pub(crate) async fn checkout(
        &self,
    ) -> Result<PooledConnection<HttpConnection>, TransportError> {
        let dialer = &self.inner.dialer;
        loop {
            let mut conn = self
                .inner
                .pool
                .get_or_create(|| async move { HttpConnection::handshake(dialer.dial().await?).await })
                .await?;

            match conn.ready().await {
                Ok(()) => return Ok(conn),
                Err(_) if conn.is_reused() => {
                    tracing::debug!("discarding stale pooled connection");
                    conn.discard();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a request and buffer the whole response body.
    pub(crate) async fn exchange(
        &self,
        request: Request<RequestBody>,
    ) -> Result<(StatusCode, Bytes), DockyardError> {
        let (mut conn, response) = self.send(request).await?;
        let (parts, body) = response.into_parts();
        let body = collect(body).await?;
        conn.finish();
        Ok((parts.status, body))
    }

    pub(crate) async fn send(
        &self,
        request: Request<RequestBody>,
    ) -> Result<(PooledConnection<HttpConnection>, http::Response<Incoming>), DockyardError> {
        let mut conn = self.checkout().await?;
        let response = conn.send(request).await?;
        Ok((conn, response))
    }
}

/// 2xx and 3xx count as success.
pub(crate) fn is_success(status: StatusCode) -> bool {
    status.is_success() || status.is_redirection()
}

/// Read a response body to its end.
pub(crate) async fn collect(body: Incoming) -> Result<Bytes, DockyardError> {
    body.collect()
        .await
        .map(http_body_util::Collected::to_bytes)
        .map_err(|e| body_error(&e).into())
}

pub(crate) fn body_error(e: &hyper::Error) -> TransportError {
    if e.is_incomplete_message() || e.is_closed() {
        TransportError::ConnectionClosed
    } else {
        TransportError::Protocol(e.to_string())
    }
}

/// Run `work` until it finishes, `ctx` ends, or `timeout` elapses.
///
/// The losing futures are dropped, which closes any connection `work` held.
pub(crate) async fn race<T>(
    ctx: &Context,
    timeout: Option<Duration>,
    work: impl Future<Output = Result<T, DockyardError>>,
) -> Result<T, DockyardError> {
    if let Some(err) = ctx.err() {
        return Err(err.into());
    }

    let work = pin!(work);
    let done = pin!(ctx.done());

    match timeout {
        Some(limit) => {
            let expired = pin!(Delay::new(limit));
            match select(work, select(done, expired)).await {
                Either::Left((result, _)) => result,
                Either::Right((Either::Left((err, _)), _)) => Err(err.into()),
                Either::Right((Either::Right(_), _)) => Err(DockyardError::Timeout(limit)),
            }
        }
        None => match select(work, done).await {
            Either::Left((result, _)) => result,
            Either::Right((err, _)) => Err(err.into()),
        },
    }
}
