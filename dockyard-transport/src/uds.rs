//! Unix domain socket dialing.

use std::path::Path;
use std::pin::pin;
use std::time::Duration;

use futures::future::{Either, select};
use futures_timer::Delay;
use tokio::net::UnixStream;

use dockyard_core::TransportError;

/// Connect to the socket at `path` within `timeout`.
pub(crate) async fn connect(path: &Path, timeout: Duration) -> Result<UnixStream, TransportError> {
    let connect_fut = pin!(UnixStream::connect(path));
    let timeout_fut = pin!(Delay::new(timeout));

    let stream = match select(connect_fut, timeout_fut).await {
        Either::Left((Ok(stream), _)) => stream,
        Either::Left((Err(e), _)) => {
            return Err(TransportError::ConnectionFailed(format!(
                "failed to connect to {}: {}",
                path.display(),
                e
            )));
        }
        Either::Right(_) => {
            return Err(TransportError::ConnectionFailed(format!(
                "connection to {} timed out",
                path.display()
            )));
        }
    };

    tracing::debug!(path = %path.display(), "unix connection established");
    Ok(stream)
}
