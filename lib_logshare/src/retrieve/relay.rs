//! # NDJSON Relay
//!
//! Forwards a [`RecordStream`] into any `AsyncWrite` as NDJSON, one record per
//! line, flushing every few hundred records. This is the seam where stdout, a
//! file, or a cloud-storage upload writer plugs into the stream.

use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::Result;
use crate::logpull::LogRecord;

const FLUSH_EVERY: u64 = 500;

/// Writes every record from `stream` to `writer` and returns how many were
/// written. Stops at the first stream or write error; records already
/// written stay written.
pub async fn relay_ndjson<S, W>(mut stream: S, writer: &mut W) -> Result<u64>
where
    S: Stream<Item = Result<LogRecord>> + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    let mut line = Vec::with_capacity(1024);

    while let Some(record) = stream.next().await {
        let record = record?;
        line.clear();
        serde_json::to_writer(&mut line, &record).map_err(std::io::Error::other)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        written += 1;
        if written % FLUSH_EVERY == 0 {
            writer.flush().await?;
            debug!(records = written, "relay flushed");
        }
    }

    writer.flush().await?;
    Ok(written)
}
