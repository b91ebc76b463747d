//! Echo connection handler.

use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Why the echo loop stopped.
#[derive(Debug)]
pub enum Termination {
    /// The client closed its side of the connection.
    Eof,
    /// A read failed.
    ReadFailed(io::Error),
}

/// Outcome of one connection's echo loop.
#[derive(Debug)]
pub struct Summary {
    /// Bytes successfully written back.
    pub bytes_echoed: u64,
    /// Successful non-empty reads.
    pub reads: u64,
    /// Reads whose echo could not be written.
    pub write_failures: u64,
    pub termination: Termination,
}

/// Echo everything read from `stream` back to it until EOF or a read error.
///
/// Each read is written back in full before the next read is issued, so the
/// client sees the same byte order and no data from other reads mixed in.
/// A failed write drops that read's bytes and the loop carries on reading.
///
/// The stream is owned by this call and is shut down and dropped on every
/// exit path.
pub async fn handle_connection<S>(mut stream: S, buffer_size: usize) -> Summary
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::zeroed(buffer_size);
    let mut summary = Summary {
        bytes_echoed: 0,
        reads: 0,
        write_failures: 0,
        termination: Termination::Eof,
    };

    loop {
        let n = match stream.read(&mut buffer[..]).await {
            Ok(0) => {
                trace!("Connection closed by client");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                summary.termination = Termination::ReadFailed(e);
                break;
            }
        };
        summary.reads += 1;

        match write_chunk(&mut stream, &buffer[..n]).await {
            Ok(()) => summary.bytes_echoed += n as u64,
            Err(e) => {
                trace!(error = %e, bytes = n, "Echo write failed");
                summary.write_failures += 1;
            }
        }
    }

    // Sends close_notify on TLS streams, FIN on plain ones
    let _ = stream.shutdown().await;
    summary
}

async fn write_chunk<S>(stream: &mut S, data: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(data).await?;
    stream.flush().await
}
