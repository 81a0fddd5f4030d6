//! Stream transport: newline-delimited JSON-RPC.
//!
//! Reads one JSON message per line, dispatches each complete line as an
//! independent task, and writes one JSON message per line on the output.
//! Partial trailing data is retained across reads by the buffered reader.
//! There is no concurrency limit: several popup dispatches can be suspended
//! at once, and response order follows reply arrival, not input order.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, RequestContext};
use crate::error::Result;

/// Run the stream loop over arbitrary reader/writer halves until EOF, a
/// read error, or the shutdown signal.
///
/// Output lines are funneled through an mpsc channel to a single writer
/// task, so concurrently finishing dispatches never interleave bytes.
pub async fn run_stream<R, W>(
    dispatcher: Arc<Dispatcher>,
    reader: R,
    writer: W,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    let (tx, mut rx) = mpsc::channel::<String>(64);

    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(line) = rx.recv().await {
            if writer.write_all(line.as_bytes()).await.is_err()
                || writer.write_all(b"\n").await.is_err()
            {
                warn!("Stream writer closed, dropping remaining responses");
                break;
            }
            let _ = writer.flush().await;
        }
    });

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Stream transport received shutdown signal");
                break;
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        debug!(line_len = line.len(), "Received request line");

                        let dispatcher = Arc::clone(&dispatcher);
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            let response = dispatcher.dispatch(&line, RequestContext::stdio()).await;
                            // Receiver only disappears when the writer side
                            // is already gone.
                            let _ = tx.send(response).await;
                        });
                    }
                    None => {
                        info!("Stream input closed");
                        break;
                    }
                }
            }
        }
    }

    // Let in-flight dispatches drain through the writer before returning.
    drop(tx);
    let _ = writer_task.await;
    Ok(())
}

/// Run the stream transport over this process's stdin/stdout.
pub async fn run_stdio(dispatcher: Arc<Dispatcher>, shutdown: watch::Receiver<bool>) -> Result<()> {
    run_stream(dispatcher, tokio::io::stdin(), tokio::io::stdout(), shutdown).await
}
