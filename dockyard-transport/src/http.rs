//! HTTP/1.1 client connections.

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::task::JoinHandle;

use dockyard_core::TransportError;

use crate::dialer::BoxedIo;
use crate::pool::Reusable;

/// Body type of outgoing requests; payloads are fully buffered.
pub type RequestBody = Full<Bytes>;

/// One HTTP/1.1 connection.
///
/// The connection driver runs on its own task, owned by this value: dropping
/// or closing the connection aborts the driver, which closes the socket.
pub struct HttpConnection {
    sender: http1::SendRequest<RequestBody>,
    driver: JoinHandle<()>,
    in_flight: bool,
}

impl std::fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection")
            .field("open", &self.is_open())
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl HttpConnection {
    /// Run the HTTP/1.1 handshake over a dialed stream.
    pub async fn handshake(io: BoxedIo) -> Result<Self, TransportError> {
        let (sender, connection) = http1::handshake(TokioIo::new(io))
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "http connection closed with error");
            }
        });

        Ok(Self {
            sender,
            driver,
            in_flight: false,
        })
    }

    /// Wait until the connection can take a request.
    pub async fn ready(&mut self) -> Result<(), TransportError> {
        self.sender
            .ready()
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a request and wait for the response head.
    ///
    /// The connection counts as mid-exchange until [`finish`](Self::finish)
    /// is called after the response body was read to its end.
    pub async fn send(
        &mut self,
        request: Request<RequestBody>,
    ) -> Result<Response<Incoming>, TransportError> {
        self.in_flight = true;
        self.sender.send_request(request).await.map_err(|e| {
            if e.is_closed() || e.is_incomplete_message() {
                TransportError::ConnectionClosed
            } else {
                TransportError::Protocol(e.to_string())
            }
        })
    }

    /// Mark the current exchange as complete.
    pub fn finish(&mut self) {
        self.in_flight = false;
    }

    /// Whether an exchange started and has not been finished.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed() && !self.driver.is_finished()
    }

    /// Close the connection. Closing twice is a no-op.
    pub fn close(&self) {
        self.driver.abort();
    }
}

impl Reusable for HttpConnection {
    fn is_reusable(&self) -> bool {
        !self.in_flight && self.is_open()
    }
}

impl Drop for HttpConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
