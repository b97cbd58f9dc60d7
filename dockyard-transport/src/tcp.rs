//! TCP dialing.

use std::pin::pin;

use futures::future::{Either, select};
use futures_timer::Delay;
use tokio::net::TcpStream;

use dockyard_core::TransportError;

use crate::dialer::DialerConfig;

/// Connect to `host:port` within the configured connect timeout.
pub(crate) async fn connect(
    host: &str,
    port: u16,
    config: &DialerConfig,
) -> Result<TcpStream, TransportError> {
    let connect_fut = pin!(TcpStream::connect((host, port)));
    let timeout_fut = pin!(Delay::new(config.connect_timeout));

    let stream = match select(connect_fut, timeout_fut).await {
        Either::Left((Ok(stream), _)) => stream,
        Either::Left((Err(e), _)) => {
            return Err(TransportError::ConnectionFailed(format!(
                "failed to connect to {host}:{port}: {e}"
            )));
        }
        Either::Right(_) => {
            return Err(TransportError::ConnectionFailed(format!(
                "connection to {host}:{port} timed out"
            )));
        }
    };

    stream.set_nodelay(config.nodelay)?;
    tracing::debug!(host, port, "tcp connection established");
    Ok(stream)
}
