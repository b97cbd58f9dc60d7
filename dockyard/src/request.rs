//! Buffered request/response calls.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use dockyard_core::{ClientError, Context, DockyardError, QueryParams, ToQuery};

use crate::client::{Client, collect, is_success, race};

/// Options shared by every kind of call.
///
/// ```rust
/// use std::time::Duration;
/// use dockyard::{Context, QueryParams, RequestOptions};
///
/// let options = RequestOptions::new()
///     .query(QueryParams::new().flag("all", true))
///     .context(Context::with_timeout(Duration::from_secs(5)));
/// assert_eq!(options.query.encode(), "all=1");
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Query parameters.
    pub query: QueryParams,

    /// Serialized JSON body.
    pub body: Option<Bytes>,

    /// Send `Content-Type: application/json` even without a body.
    pub force_json: bool,

    /// Extra headers, validated when the request is built.
    pub headers: Vec<(String, String)>,

    /// Cancellation and deadline for the call.
    pub context: Context,

    /// Per-call override of the client request timeout.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the query from an options value.
    #[must_use]
    pub fn query(mut self, options: impl ToQuery) -> Self {
        self.query = options.to_query();
        self
    }

    /// Serialize `value` as the JSON body. A `null` body is not sent.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, DockyardError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| DockyardError::InvalidRequest(format!("body: {e}")))?;
        self.body = (body != b"null").then(|| Bytes::from(body));
        Ok(self)
    }

    #[must_use]
    pub fn force_json(mut self, force: bool) -> Self {
        self.force_json = force;
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A successful, fully-buffered response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// The body as text, invalid UTF-8 replaced.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, DockyardError> {
        serde_json::from_slice(&self.body).map_err(|e| DockyardError::InvalidResponse(e.to_string()))
    }
}

impl Client {
    /// Send a request and buffer its response.
    ///
    /// Statuses outside 2xx and 3xx fail with [`ClientError`]. The call is
    /// raced against the options' context and the request timeout; the
    /// connection of a call that loses the race is closed.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<Response, DockyardError> {
        let ctx = &options.context;
        let timeout = options.timeout.or(self.request_timeout());
        tracing::debug!(request_id = ctx.request_id, %method, path, "request");

        let work = async {
            self.ensure_server_version(ctx).await?;
            let request = self.build_versioned(&method, path, &options)?;

            let (mut conn, response) = self.send(request).await?;
            let (parts, body) = response.into_parts();
            let body = collect(body).await?;
            conn.finish();

            if !is_success(parts.status) {
                return Err(ClientError::from_body(parts.status.as_u16(), &body).into());
            }
            Ok(Response {
                status: parts.status,
                headers: parts.headers,
                body,
            })
        };

        let result = race(ctx, timeout, work).await;
        if let Err(e) = &result {
            tracing::debug!(request_id = ctx.request_id, error = %e, "request failed");
        }
        result
    }
}
