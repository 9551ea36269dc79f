//! ACP read loop.
//!
//! Drives a [`FramedRead`] over the inbound stream using [`AcpCodec`] with
//! the connection's record limit, classifies each record with
//! [`Message::decode`], and hands it to the [`Dispatcher`] in arrival order.
//!
//! # Faults
//!
//! | Condition                      | Outcome                                      |
//! |--------------------------------|----------------------------------------------|
//! | end-of-stream                  | clean shutdown, `Ok(())`                     |
//! | blank line                     | skipped                                      |
//! | malformed JSON / envelope      | ParseError response (salvaged id or `null`), then teardown |
//! | record over the size limit     | error response with `null` id, then teardown |
//! | I/O error                      | teardown, error returned                     |

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, trace, warn};

use crate::acp::codec::AcpCodec;
use crate::acp::connection::Connection;
use crate::acp::dispatcher::Dispatcher;
use crate::acp::envelope::{salvage_id, Message, RequestId, Response};
use crate::{AppError, Result};

/// ACP read loop; runs until end-of-stream, a fatal fault, or teardown.
///
/// # Errors
///
/// Returns the fault that ended the loop: [`AppError::ParseError`] or
/// [`AppError::Protocol`] after reporting it to the peer, or
/// [`AppError::Io`] when the stream fails.
pub async fn run_reader<R>(
    connection: Connection,
    dispatcher: Arc<Dispatcher>,
    source: R,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let codec = AcpCodec::with_max_length(connection.config().max_line_bytes);
    let mut framed = FramedRead::new(source, codec);

    loop {
        tokio::select! {
            biased;

            () = connection.closed() => {
                debug!("acp reader: connection closed, stopping");
                return Ok(());
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("acp reader: EOF detected");
                        return Ok(());
                    }

                    Some(Err(err @ AppError::Protocol(_))) => {
                        warn!(%err, "acp reader: framing violation, closing connection");
                        report_fatal(&connection, RequestId::Null, &err);
                        return Err(err);
                    }

                    Some(Err(err)) => {
                        warn!(%err, "acp reader: stream error, closing connection");
                        return Err(err);
                    }

                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        trace!(record = %line, "acp reader: received");
                        match Message::decode(&line) {
                            Ok(message) => dispatcher.dispatch(message, &connection),
                            Err(err) => {
                                warn!(%err, raw_line = %line, "acp reader: unparseable record, closing connection");
                                report_fatal(&connection, salvage_id(&line), &err);
                                return Err(err);
                            }
                        }
                    }
                }
            }
        }
    }
}

fn report_fatal(connection: &Connection, id: RequestId, err: &AppError) {
    if let Err(send_err) = connection.send(Message::Response(Response::failure(id, err))) {
        debug!(%send_err, "acp reader: could not report fatal fault");
    }
}
