//! Copying engine output into caller sinks.

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;

use dockyard_core::CodecError;

use crate::frame::{MuxCodec, StdStream};

/// A caller-supplied output sink.
pub type Sink<'a> = &'a mut (dyn AsyncWrite + Unpin + Send);

/// Split a multiplexed stream into `stdout` and `stderr`.
///
/// Frames for stdin and stdout both land in `stdout`. A missing sink
/// discards its frames. Returns the number of payload bytes read.
pub async fn demux<'a, R>(
    reader: R,
    mut stdout: Option<Sink<'a>>,
    mut stderr: Option<Sink<'a>>,
) -> Result<u64, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, MuxCodec::new());
    let mut total = 0u64;

    while let Some(frame) = frames.next().await {
        let frame = frame?;
        total += frame.payload.len() as u64;

        let sink = match frame.stream {
            StdStream::Stdin | StdStream::Stdout => stdout.as_deref_mut(),
            StdStream::Stderr => stderr.as_deref_mut(),
        };
        if let Some(sink) = sink {
            sink.write_all(&frame.payload).await?;
        }
    }

    flush(stdout).await?;
    flush(stderr).await?;
    Ok(total)
}

/// Copy engine output into the sinks.
///
/// With `multiplexed` set the stream is split with [`demux`]; otherwise the
/// bytes are copied verbatim to `stdout`.
pub async fn copy_output<'a, R>(
    mut reader: R,
    stdout: Option<Sink<'a>>,
    stderr: Option<Sink<'a>>,
    multiplexed: bool,
) -> Result<u64, CodecError>
where
    R: AsyncRead + Unpin,
{
    if multiplexed {
        return demux(reader, stdout, stderr).await;
    }

    let copied = match stdout {
        Some(sink) => {
            let n = tokio::io::copy(&mut reader, &mut *sink).await?;
            sink.flush().await?;
            n
        }
        None => tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?,
    };
    tracing::trace!(bytes = copied, "raw output copied");
    Ok(copied)
}

async fn flush(sink: Option<Sink<'_>>) -> Result<(), CodecError> {
    if let Some(sink) = sink {
        sink.flush().await?;
    }
    Ok(())
}
