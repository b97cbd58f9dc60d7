//! Connection hijacking: take over a raw bidirectional byte stream.
//!
//! The request goes out on a dedicated connection that is never pooled.
//! Once the engine answers, the connection is handed to a spawned task that
//! forwards the caller's input to it and its output to the caller's sinks.

use std::fmt;
use std::io::Cursor;
use std::pin::pin;

use bytes::{Bytes, BytesMut};
use futures::future::{BoxFuture, Either, FutureExt, Shared, select};
use http::header::{CONNECTION, UPGRADE};
use http::{Method, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use dockyard_codec::{Sink, copy_output};
use dockyard_core::{ClientError, DockyardError, TransportError};
use dockyard_transport::RequestBody;

use crate::client::{Client, is_success, race};
use crate::request::RequestOptions;

/// Largest response head accepted before the upgrade.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Largest error body read from a refused upgrade.
const MAX_ERROR_BODY: usize = 1024 * 1024;

type InputSource = Box<dyn AsyncRead + Send + Unpin>;
type OutputSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Options for [`Client::hijack`].
#[derive(Default)]
pub struct HijackOptions {
    pub request: RequestOptions,
    stdin: Option<InputSource>,
    stdout: Option<OutputSink>,
    stderr: Option<OutputSink>,

    /// The output is a raw terminal stream; never demultiplexed.
    pub raw_terminal: bool,
}

impl fmt::Debug for HijackOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HijackOptions")
            .field("request", &self.request)
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("raw_terminal", &self.raw_terminal)
            .finish()
    }
}

impl HijackOptions {
    #[must_use]
    pub fn new(request: RequestOptions) -> Self {
        Self {
            request,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn stdin(mut self, input: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stdin = Some(Box::new(input));
        self
    }

    #[must_use]
    pub fn stdout(mut self, sink: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stdout = Some(Box::new(sink));
        self
    }

    #[must_use]
    pub fn stderr(mut self, sink: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stderr = Some(Box::new(sink));
        self
    }

    #[must_use]
    pub fn raw_terminal(mut self, raw: bool) -> Self {
        self.raw_terminal = raw;
        self
    }
}

/// Handle on a hijacked session.
///
/// Clones observe the same session. [`wait`](Self::wait) and
/// [`close`](Self::close) may be called any number of times, from any task.
#[derive(Clone)]
pub struct CloseWaiter {
    result: Shared<BoxFuture<'static, Result<(), DockyardError>>>,
    closer: CancellationToken,
}

impl fmt::Debug for CloseWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseWaiter")
            .field("closed", &self.closer.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl CloseWaiter {
    /// Wait until the engine ends its output, the context ends, or the
    /// session is closed.
    ///
    /// Input still pending when the output ends is abandoned. When input
    /// already failed, its error wins over the output's. A closed session
    /// reports success.
    pub async fn wait(&self) -> Result<(), DockyardError> {
        self.result.clone().await
    }

    /// Tear the connection down. Pending [`wait`](Self::wait) calls return.
    pub fn close(&self) {
        self.closer.cancel();
    }
}

/// Head of the engine's answer to an upgrade request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResponseHead {
    status: StatusCode,
    content_length: Option<usize>,
}

impl Client {
    /// Upgrade a request into a raw session with the engine.
    ///
    /// Returns once the engine accepted the upgrade. Forwarding then runs in
    /// the background until the returned [`CloseWaiter`] resolves.
    pub async fn hijack(
        &self,
        method: Method,
        path: &str,
        options: HijackOptions,
    ) -> Result<CloseWaiter, DockyardError> {
        let HijackOptions {
            request: options,
            stdin,
            stdout,
            stderr,
            raw_terminal,
        } = options;
        let ctx = options.context.clone();
        tracing::debug!(request_id = ctx.request_id, %method, path, "hijack");

        let establish = async {
            self.ensure_server_version(&ctx).await?;
            let request = self.build_versioned(&method, path, &options)?;
            let head = encode_head(&request, options.body.as_deref().unwrap_or_default());

            let mut io = self.dialer().dial().await?;
            io.write_all(&head).await.map_err(TransportError::from)?;
            io.flush().await.map_err(TransportError::from)?;

            let (response, buffered) = read_head(&mut io).await?;
            if response.status != StatusCode::SWITCHING_PROTOCOLS && !is_success(response.status) {
                let body = read_error_body(&mut io, buffered, response.content_length).await?;
                return Err(ClientError::from_body(response.status.as_u16(), &body).into());
            }
            Ok((io, buffered.freeze()))
        };
        let (io, buffered) = race(&ctx, None, establish).await?;
        tracing::debug!(request_id = ctx.request_id, "connection hijacked");

        let (reader, mut writer) = tokio::io::split(io);
        let reader = Cursor::new(buffered).chain(reader);

        let input = async move {
            if let Some(mut stdin) = stdin {
                tokio::io::copy(&mut stdin, &mut writer)
                    .await
                    .map_err(TransportError::from)?;
            }
            writer.shutdown().await.map_err(TransportError::from)?;
            Ok::<_, DockyardError>(())
        };

        let output = async move {
            let (mut stdout, mut stderr) = (stdout, stderr);
            copy_output(reader, sink(&mut stdout), sink(&mut stderr), !raw_terminal).await?;
            Ok::<_, DockyardError>(())
        };

        let closer = CancellationToken::new();
        let token = closer.clone();
        let task_ctx = ctx.clone();
        let task = tokio::spawn(async move {
            let forward = pin!(async move {
                let input = pin!(input);
                let output = pin!(output);
                match select(input, output).await {
                    Either::Left((input, output)) => {
                        let output = output.await;
                        input.and(output)
                    }
                    Either::Right((output, _)) => output,
                }
            });
            let closed = pin!(token.cancelled());
            let done = pin!(task_ctx.done());

            let result = match select(forward, select(closed, done)).await {
                Either::Left((result, _)) => result,
                Either::Right((Either::Left(_), _)) => Ok(()),
                Either::Right((Either::Right((err, _)), _)) => Err(err.into()),
            };
            tracing::debug!(request_id = task_ctx.request_id, ok = result.is_ok(), "hijacked session ended");
            result
        });

        let result = async move {
            task.await.unwrap_or_else(|e| {
                Err(TransportError::Protocol(format!("hijack task failed: {e}")).into())
            })
        }
        .boxed()
        .shared();

        Ok(CloseWaiter { result, closer })
    }
}

fn sink(writer: &mut Option<OutputSink>) -> Option<Sink<'_>> {
    let sink: Sink<'_> = &mut **writer.as_mut()?;
    Some(sink)
}

/// Serialize the upgrade request head, followed by `body`.
fn encode_head(request: &http::Request<RequestBody>, body: &[u8]) -> Vec<u8> {
    let mut head = Vec::with_capacity(256 + body.len());
    head.extend_from_slice(format!("{} {} HTTP/1.1\r\n", request.method(), request.uri()).as_bytes());
    for (name, value) in request.headers() {
        if name == CONNECTION || name == UPGRADE {
            continue;
        }
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"Connection: Upgrade\r\nUpgrade: tcp\r\n");
    if !body.is_empty() {
        head.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    head.extend_from_slice(b"\r\n");
    head.extend_from_slice(body);
    head
}

/// Read the response head. Bytes past the head are returned with it.
async fn read_head<R>(io: &mut R) -> Result<(ResponseHead, BytesMut), TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        if io.read_buf(&mut buf).await? == 0 {
            return Err(TransportError::ConnectionClosed);
        }

        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut response = httparse::Response::new(&mut headers);
        match response.parse(&buf) {
            Ok(httparse::Status::Complete(len)) => {
                let status = response
                    .code
                    .and_then(|code| StatusCode::from_u16(code).ok())
                    .ok_or_else(|| TransportError::Protocol("invalid status code".into()))?;
                let content_length = response
                    .headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case("content-length"))
                    .and_then(|h| std::str::from_utf8(h.value).ok())
                    .and_then(|v| v.trim().parse().ok());

                let rest = buf.split_off(len);
                return Ok((
                    ResponseHead {
                        status,
                        content_length,
                    },
                    rest,
                ));
            }
            Ok(httparse::Status::Partial) if buf.len() < MAX_HEAD_SIZE => {}
            Ok(httparse::Status::Partial) => {
                return Err(TransportError::Protocol("response head too large".into()));
            }
            Err(e) => return Err(TransportError::Protocol(format!("response head: {e}"))),
        }
    }
}

/// Read the body of a refused upgrade, bounded by its `Content-Length`.
async fn read_error_body<R>(
    io: &mut R,
    mut body: BytesMut,
    content_length: Option<usize>,
) -> Result<Bytes, TransportError>
where
    R: AsyncRead + Unpin,
{
    if let Some(len) = content_length {
        let len = len.min(MAX_ERROR_BODY);
        while body.len() < len {
            if io.read_buf(&mut body).await? == 0 {
                break;
            }
        }
        body.truncate(len);
    }
    Ok(body.freeze())
}
