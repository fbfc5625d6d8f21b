//! Framed protocol session: register, dispatch requests, relay messages.

use std::net::SocketAddr;

use bytes::Bytes;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::codec::{Frame, MessageType};
use crate::error::Result;
use crate::reader::StreamReader;
use crate::registry::{ConnectionId, Delivery, Outbound, Registry};
use crate::session::SessionContext;

/// `ctime`-style timestamp, e.g. `Mon Oct 19 12:00:00 2026`.
const TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Run a framed session until the client exits, disconnects or the session
/// is cancelled.
///
/// The write half is owned by a dedicated writer task fed from the
/// session's outbound queue; replies and relayed messages from other
/// sessions both go through that queue, so nothing but this session's own
/// writer ever touches its socket.
pub async fn handle_session<R, W>(
    reader: &mut StreamReader<R>,
    writer: W,
    id: ConnectionId,
    peer: SocketAddr,
    context: &SessionContext,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound, queue) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_frames(writer, queue, cancel.clone()));

    context.registry.register(id, peer.to_string(), outbound.clone());
    info!(%id, %peer, "Client connected");
    let _ = outbound.send(Frame::ok(context.welcome.as_str()));

    let result = dispatch_loop(reader, id, &outbound, context).await;

    // Deregister first so no new frames are routed here, then let the
    // writer flush what is already queued.
    context.registry.deregister(id);
    drop(outbound);
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(%id, error = %e, "Writer stopped"),
        Err(e) => warn!(%id, error = %e, "Writer task failed"),
    }

    result
}

async fn dispatch_loop<R>(
    reader: &mut StreamReader<R>,
    id: ConnectionId,
    outbound: &Outbound,
    context: &SessionContext,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = reader.read_frame(context.max_body_size).await?;
        trace!(%id, msg_type = %frame.msg_type, len = frame.body.len(), "Frame received");

        let reply = match frame.msg_type {
            MessageType::Time => Some(Frame::ok(current_time())),
            MessageType::Name => Some(Frame::ok(context.server_name.as_str())),
            MessageType::List => Some(Frame::list(context.registry.roster())),
            MessageType::Send => Some(relay(id, &frame.body, &context.registry)),
            MessageType::Exit => {
                debug!(%id, "Client requested exit");
                return Ok(());
            }
            // Handshake is implied by the first frame.
            MessageType::Connect => None,
            other => {
                warn!(%id, msg_type = %other, "Ignoring unexpected message type");
                None
            }
        };

        if let Some(reply) = reply {
            if outbound.send(reply).is_err() {
                // Writer failed; it has already cancelled the session.
                return Ok(());
            }
        }
    }
}

/// Handle a `SEND` body of the form `<targetId>:<message>`.
///
/// Only the id is interpreted as text; the message bytes after the first
/// `:` are relayed as-is. Returns the reply for the sender. Delivery is best
/// effort: a target that is not registered gets nothing and the sender is
/// told so.
pub fn relay(source: ConnectionId, body: &Bytes, registry: &Registry) -> Frame {
    let Some(colon) = body.iter().position(|&b| b == b':') else {
        return Frame::error("Format error (ID:Msg).");
    };
    let target = match std::str::from_utf8(&body[..colon]).map(str::parse::<ConnectionId>) {
        Ok(Ok(target)) => target,
        _ => return Frame::error("Invalid ID format."),
    };
    let message = body.slice(colon + 1..);

    match registry.deliver(target, Frame::indication(source, message)) {
        Delivery::Delivered => {
            debug!(%source, %target, "Message relayed");
            Frame::ok("Sent.")
        }
        Delivery::NotFound => {
            debug!(%source, %target, "Relay target not found");
            Frame::error("User not found.")
        }
    }
}

fn current_time() -> String {
    chrono::Local::now().format(TIME_FORMAT).to_string()
}

/// Drain the outbound queue onto the socket.
///
/// Ends when every sender is gone or the session is cancelled. A write
/// failure cancels the session so its read loop stops as well.
async fn write_frames<W>(
    mut writer: W,
    mut queue: mpsc::UnboundedReceiver<Frame>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let encoded = frame.encode();
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            written = writer.write_all(&encoded) => written,
        };
        if let Err(e) = written {
            cancel.cancel();
            return Err(e.into());
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}
