//! TCP front
//!
//! Newline-framed RON over TCP: one frame per line. A connection must
//! complete its handshake within the configured wait window before any
//! op is accepted; protocol errors send a textual error op and terminate
//! the stream, and each connection's failure stays isolated from the
//! rest of the process.

use crate::cli::CliResult;
use ron_replica::{HandshakeOutcome, Replica, Store, SubscriberHandle};
use ron_wire::frame::Frame;
use ron_wire::op::Op;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

pub async fn serve<S: Store>(replica: Replica<S>, listen: &str) -> CliResult<()> {
    let replica = Arc::new(replica);
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|e| format!("cannot listen on {}: {}", listen, e))?;
    info!(listen, db = %replica.config().db_name, "serving");

    loop {
        let (socket, peer) = listener.accept().await?;
        debug!(%peer, "connection accepted");
        let replica = replica.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(replica, socket).await {
                debug!(%peer, error = %e, "connection ended");
            }
        });
    }
}

async fn handle_connection<S: Store>(
    replica: Arc<Replica<S>>,
    socket: TcpStream,
) -> CliResult<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // No op processing before an accepted handshake, and no unbounded
    // waits for one either.
    let first = match tokio::time::timeout(replica.handshake_timeout(), lines.next_line()).await
    {
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) => return Err("peer closed before handshake".into()),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err("handshake wait window elapsed".into()),
    };

    let session = match replica.handshake(&Frame::from_text(first.trim())) {
        HandshakeOutcome::Accepted { session, response } => {
            write_line(&mut write_half, response.body()).await?;
            session
        }
        HandshakeOutcome::Rejected { reason, response } => {
            write_line(&mut write_half, response.body()).await?;
            return Err(reason.into());
        }
    };

    let source = session.origin().to_string();
    let (handle, mut outbound) = SubscriberHandle::channel(source.clone());
    let error_channel = handle.clone();
    replica.attach(handle);
    info!(session = %session, "stream authenticated");

    // Outbound pump: patches, fan-out and error replies for this source.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if write_line(&mut write_half, frame.body()).await.is_err() {
                break;
            }
        }
    });

    let result = read_loop(&replica, &mut lines, &source, &error_channel).await;

    replica.detach(&source);
    writer.abort();
    result
}

async fn read_loop<S: Store>(
    replica: &Replica<S>,
    lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    source: &str,
    error_channel: &SubscriberHandle,
) -> CliResult<()> {
    loop {
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => return Ok(()),
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let frame = Frame::from_text(text);
        if frame.is_empty() {
            // Nothing parseable on the line: error op, then terminate.
            warn!(source, line = text, "malformed frame");
            error_channel.deliver(Frame::of(&Op::zero().error_op("op pattern error")));
            return Err("op pattern error".into());
        }

        if let Err(e) = replica.handle_frame(&frame, source).await {
            return Err(e.into());
        }
    }
}

async fn write_line(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    body: &str,
) -> std::io::Result<()> {
    write_half.write_all(body.as_bytes()).await?;
    write_half.write_all(b"\n").await
}
