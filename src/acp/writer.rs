//! ACP writer task.
//!
//! The single writer of a connection: receives outbound [`Message`]s from an
//! unbounded [`mpsc`] channel and writes each as one NDJSON record through
//! [`FramedWrite`] + [`AcpCodec`]. Because only this task touches the sink,
//! records from concurrent handlers can never interleave mid-line, and
//! messages are written in the order they were queued.

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::acp::codec::AcpCodec;
use crate::acp::envelope::Message;
use crate::Result;

/// ACP writer task: serialises outbound messages onto `sink`.
///
/// The task exits when:
/// - `cancel` fires, after flushing messages that were already queued, or
/// - `msg_rx` is closed (all senders dropped).
///
/// # Errors
///
/// Returns [`crate::AppError::Io`] if a write fails (for example the peer
/// closed its end). The caller treats that as connection teardown.
pub async fn run_writer<W>(
    role: &'static str,
    sink: W,
    mut msg_rx: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut framed = FramedWrite::new(sink, AcpCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                // Flush anything queued before teardown (e.g. a final parse error).
                while let Ok(message) = msg_rx.try_recv() {
                    if let Err(err) = framed.send(message.encode()).await {
                        debug!(role, %err, "acp writer: flush after cancellation failed");
                        break;
                    }
                }
                debug!(role, "acp writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(message) = msg else {
                    debug!(role, "acp writer: message channel closed, stopping");
                    break;
                };
                let line = message.encode();
                trace!(role, record = %line, "acp writer: sending");
                if let Err(err) = framed.send(line).await {
                    warn!(role, %err, "acp writer: write failed");
                    return Err(err);
                }
            }
        }
    }

    Ok(())
}
