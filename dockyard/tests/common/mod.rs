//! In-process engine stand-ins for integration tests.

#![allow(dead_code)]

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::future::{BoxFuture, FutureExt};
use http::{Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use rcgen::{CertificateParams, DnType, KeyPair};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

pub type Body = UnsyncBoxBody<Bytes, Infallible>;

pub type Handler =
    Arc<dyn Fn(Request<Incoming>) -> BoxFuture<'static, Response<Body>> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Request<Incoming>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Body>> + Send + 'static,
{
    Arc::new(move |request| f(request).boxed())
}

/// Handler answering every request with `status` and `body`.
pub fn respond(status: StatusCode, body: &'static str) -> Handler {
    handler(move |_| async move { text(status, body) })
}

pub fn text(status: StatusCode, body: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from_static(body.as_bytes())).boxed_unsync())
        .unwrap()
}

/// A body emitting each chunk after its delay.
pub fn chunked(chunks: Vec<(Duration, String)>) -> Body {
    let stream = futures::stream::iter(chunks).then(|(delay, chunk)| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, Infallible>(Frame::data(Bytes::from(chunk)))
    });
    StreamBody::new(stream).boxed_unsync()
}

/// `"0\n"` through `"{n-1}\n"`, the first at once and the rest `gap` apart.
pub fn counting(n: usize, gap: Duration) -> Body {
    chunked(
        (0..n)
            .map(|i| {
                let delay = if i == 0 { Duration::ZERO } else { gap };
                (delay, format!("{i}\n"))
            })
            .collect(),
    )
}

/// Method and path of every request a server handled.
#[derive(Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<String>>>);

impl RequestLog {
    fn record<B>(&self, request: &Request<B>) {
        self.0
            .lock()
            .push(format!("{}{}", request.method(), request.uri().path()));
    }

    /// Sorted entries.
    pub fn entries(&self) -> Vec<String> {
        let mut entries = self.0.lock().clone();
        entries.sort();
        entries
    }

    pub fn paths(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

pub struct TestServer {
    pub endpoint: String,
    pub log: RequestLog,
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    task: JoinHandle<()>,
    _dir: Option<TempDir>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn serve_tcp(handler: Handler) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = RequestLog::default();

    let task = tokio::spawn({
        let log = log.clone();
        async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve_http(stream, log.clone(), handler.clone()));
            }
        }
    });

    TestServer {
        endpoint: format!("http://{addr}"),
        log,
        cert_pem: Vec::new(),
        key_pem: Vec::new(),
        task,
        _dir: None,
    }
}

pub async fn serve_unix(handler: Handler) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let log = RequestLog::default();

    let task = tokio::spawn({
        let log = log.clone();
        async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve_http(stream, log.clone(), handler.clone()));
            }
        }
    });

    TestServer {
        endpoint: format!("unix://{}", path.display()),
        log,
        cert_pem: Vec::new(),
        key_pem: Vec::new(),
        task,
        _dir: Some(dir),
    }
}

pub async fn serve_tls(handler: Handler) -> TestServer {
    let (cert_pem, key_pem) = self_signed();
    let acceptor = tls_acceptor(&cert_pem, &key_pem);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = RequestLog::default();

    let task = tokio::spawn({
        let log = log.clone();
        async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let acceptor = acceptor.clone();
                let log = log.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Ok(stream) = acceptor.accept(stream).await {
                        serve_http(stream, log, handler).await;
                    }
                });
            }
        }
    });

    TestServer {
        endpoint: format!("https://{addr}"),
        log,
        cert_pem,
        key_pem,
        task,
        _dir: None,
    }
}

/// What a raw upgrade server does once it answered 101.
#[derive(Clone, Copy)]
enum Session {
    /// Echo reads back as stdout frames until the client half-closes.
    Echo,
    /// Send one stdout frame, then close without reading.
    ReplyAndClose(&'static str),
}

/// Raw server that answers an upgrade with 101 and then echoes bytes
/// back as stdout frames until the client half-closes.
pub async fn serve_echo_upgrade() -> TestServer {
    serve_upgrade(Session::Echo).await
}

/// Raw server that answers an upgrade with 101, sends `reply` as a stdout
/// frame and closes the connection.
pub async fn serve_upgrade_then_close(reply: &'static str) -> TestServer {
    serve_upgrade(Session::ReplyAndClose(reply)).await
}

async fn serve_upgrade(session: Session) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = RequestLog::default();

    let task = tokio::spawn({
        let log = log.clone();
        async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(upgraded(stream, log.clone(), session));
            }
        }
    });

    TestServer {
        endpoint: format!("tcp://{addr}"),
        log,
        cert_pem: Vec::new(),
        key_pem: Vec::new(),
        task,
        _dir: None,
    }
}

fn stdout_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![1, 0, 0, 0];
    frame.extend_from_slice(&u32::try_from(payload.len()).unwrap().to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

async fn upgraded<S>(mut stream: S, log: RequestLog, session: Session)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.unwrap_or(0) == 0 {
            return;
        }
        head.push(byte[0]);
    }
    let line = String::from_utf8_lossy(&head);
    let mut parts = line.split_whitespace();
    if let (Some(method), Some(path)) = (parts.next(), parts.next()) {
        log.0.lock().push(format!("{method}{path}"));
    }

    if stream
        .write_all(b"HTTP/1.1 101 UPGRADED\r\nConnection: Upgrade\r\nUpgrade: tcp\r\n\r\n")
        .await
        .is_err()
    {
        return;
    }

    match session {
        Session::Echo => {
            let mut buf = [0u8; 1024];
            loop {
                let n = match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                if stream.write_all(&stdout_frame(&buf[..n])).await.is_err() {
                    return;
                }
            }
        }
        Session::ReplyAndClose(reply) => {
            if stream.write_all(&stdout_frame(reply.as_bytes())).await.is_err() {
                return;
            }
        }
    }
    let _ = stream.shutdown().await;
}

async fn serve_http<S>(stream: S, log: RequestLog, handler: Handler)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request: Request<Incoming>| {
        log.record(&request);
        let response = handler(request);
        async move { Ok::<_, Infallible>(response.await) }
    });
    let _ = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await;
}

/// Self-signed certificate and key for `localhost`.
pub fn self_signed() -> (Vec<u8>, Vec<u8>) {
    let mut params =
        CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()]).unwrap();
    params
        .distinguished_name
        .push(DnType::CommonName, "localhost");
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    (cert.pem().into_bytes(), key.serialize_pem().into_bytes())
}

fn tls_acceptor(cert_pem: &[u8], key_pem: &[u8]) -> TlsAcceptor {
    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .unwrap()
        .unwrap();
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// Write the PEM pair into `dir` as `cert.pem` and `key.pem`.
pub fn write_pem(dir: &TempDir, cert_pem: &[u8], key_pem: &[u8]) -> (PathBuf, PathBuf) {
    let cert = dir.path().join("cert.pem");
    let key = dir.path().join("key.pem");
    std::fs::write(&cert, cert_pem).unwrap();
    std::fs::write(&key, key_pem).unwrap();
    (cert, key)
}

/// A shared in-memory sink the hijack forwarder can own.
#[derive(Clone, Default)]
pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl AsyncWrite for SharedSink {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        self.0.lock().extend_from_slice(buf);
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}
