//! Streaming calls: copy a long-lived response body into sinks.

use std::io;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};

use futures::TryStreamExt;
use futures::future::{Either, select};
use futures_timer::Delay;
use http::Method;
use http::header::CONTENT_TYPE;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::StreamReader;

use dockyard_codec::{Sink, copy_output};
use dockyard_core::{ClientError, DockyardError};

use crate::client::{Client, body_error, collect, is_success, race};
use crate::request::RequestOptions;

/// Content type of an undemultiplexed output stream.
pub const RAW_STREAM: &str = "application/vnd.docker.raw-stream";

/// Content type of a multiplexed stdout/stderr stream.
pub const MULTIPLEXED_STREAM: &str = "application/vnd.docker.multiplexed-stream";

/// Options for [`Client::stream`].
#[derive(Default)]
pub struct StreamOptions<'a> {
    pub request: RequestOptions,
    stdout: Option<Sink<'a>>,
    stderr: Option<Sink<'a>>,

    /// The body interleaves stdout and stderr frames.
    pub multiplexed: bool,

    /// The body is a raw terminal stream; never demultiplexed.
    pub raw_terminal: bool,

    /// Fail when no bytes arrive for this long.
    pub inactivity_timeout: Option<Duration>,
}

impl std::fmt::Debug for StreamOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamOptions")
            .field("request", &self.request)
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("multiplexed", &self.multiplexed)
            .field("raw_terminal", &self.raw_terminal)
            .field("inactivity_timeout", &self.inactivity_timeout)
            .finish()
    }
}

impl<'a> StreamOptions<'a> {
    #[must_use]
    pub fn new(request: RequestOptions) -> Self {
        Self {
            request,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn stdout(mut self, sink: Sink<'a>) -> Self {
        self.stdout = Some(sink);
        self
    }

    #[must_use]
    pub fn stderr(mut self, sink: Sink<'a>) -> Self {
        self.stderr = Some(sink);
        self
    }

    #[must_use]
    pub fn multiplexed(mut self, multiplexed: bool) -> Self {
        self.multiplexed = multiplexed;
        self
    }

    #[must_use]
    pub fn raw_terminal(mut self, raw: bool) -> Self {
        self.raw_terminal = raw;
        self
    }

    #[must_use]
    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }
}

/// Whether a body with `content_type` should be demultiplexed.
fn demultiplex(content_type: Option<&str>, multiplexed: bool, raw_terminal: bool) -> bool {
    if raw_terminal {
        return false;
    }
    match content_type {
        Some(RAW_STREAM) => false,
        Some(MULTIPLEXED_STREAM) => true,
        _ => multiplexed,
    }
}

impl Client {
    /// Send a request and copy the response body into the sinks.
    ///
    /// Returns when the body ends, the context ends, or the inactivity
    /// timeout fires. Output written before a failure stays in the sinks.
    pub async fn stream(
        &self,
        method: Method,
        path: &str,
        options: StreamOptions<'_>,
    ) -> Result<(), DockyardError> {
        let StreamOptions {
            request: options,
            stdout,
            stderr,
            multiplexed,
            raw_terminal,
            inactivity_timeout,
        } = options;
        let ctx = options.context.clone();
        tracing::debug!(request_id = ctx.request_id, %method, path, "stream");

        let work = async {
            self.ensure_server_version(&ctx).await?;
            let request = self.build_versioned(&method, path, &options)?;

            let (mut conn, response) = self.send(request).await?;
            let (parts, body) = response.into_parts();
            if !is_success(parts.status) {
                let body = collect(body).await?;
                conn.finish();
                return Err(ClientError::from_body(parts.status.as_u16(), &body).into());
            }

            let content_type = parts
                .headers
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok());
            let demuxed = demultiplex(content_type, multiplexed, raw_terminal);

            let progress = Progress::new();
            let body = body.into_data_stream().map_err(|e| io::Error::other(body_error(&e)));
            let reader = ProgressReader::new(StreamReader::new(body), progress.clone());
            let copy = copy_output(reader, stdout, stderr, demuxed);

            match inactivity_timeout {
                Some(limit) => {
                    let copy = pin!(copy);
                    let idle = pin!(progress.idle_for(limit));
                    match select(copy, idle).await {
                        Either::Left((result, _)) => result?,
                        Either::Right(_) => {
                            tracing::debug!(request_id = ctx.request_id, ?limit, "stream inactive");
                            return Err(DockyardError::InactivityTimeout);
                        }
                    };
                }
                None => {
                    copy.await?;
                }
            }

            conn.finish();
            Ok(())
        };

        race(&ctx, None, work).await
    }
}

/// Instant of the last read that yielded bytes.
#[derive(Clone)]
pub(crate) struct Progress(Arc<Mutex<Instant>>);

impl Progress {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    fn touch(&self) {
        *self.0.lock() = Instant::now();
    }

    /// Resolve once no progress was made for `limit`.
    pub(crate) async fn idle_for(&self, limit: Duration) {
        loop {
            let idle = self.0.lock().elapsed();
            if idle >= limit {
                return;
            }
            Delay::new(limit - idle).await;
        }
    }
}

/// Reader that records progress on every non-empty read.
pub(crate) struct ProgressReader<R> {
    inner: R,
    progress: Progress,
}

impl<R> ProgressReader<R> {
    pub(crate) fn new(inner: R, progress: Progress) -> Self {
        Self { inner, progress }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            self.progress.touch();
        }
        poll
    }
}
