//! # Client Session
//!
//! One per accepted connection, keyed by the peer's socket address.
//!
//! ```text
//!             ┌──────────── receive loop ─────────────┐
//! socket ──→  │ lines ──→ decode ──→ handle command   │
//!             └──────────────────────┬────────────────┘
//!                                    │ replies
//!                                    ▼
//!                         [ outbound queue ] ──→ send loop ──→ socket
//!                                    ▲
//!     ClientRouter::deliver_to_client┘
//! ```
//!
//! The send loop writes queued lines in order and closes the write half once
//! every handle to the queue is gone.
//!
//! A line longer than `max_line_bytes` closes the session. Teardown runs even
//! if the receive loop panics.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use shared_types::{ControlCommand, Envelope};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::controller::ControllerInner;
use crate::handler::{self, Flow};

pub(crate) struct Session {
    addr: SocketAddr,
    client: Mutex<Option<String>>,
    outbound: mpsc::UnboundedSender<String>,
    close: watch::Sender<bool>,
}

impl Session {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Client identity bound by the handshake.
    pub fn client(&self) -> Option<String> {
        self.client.lock().clone()
    }

    /// Bind an identity, returning the previous one.
    pub fn bind_client(&self, client: String) -> Option<String> {
        self.client.lock().replace(client)
    }

    /// Queue an envelope for the send loop.
    pub fn send(&self, envelope: &Envelope) -> bool {
        match envelope.to_json_line() {
            Ok(line) => self.outbound.send(line).is_ok(),
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "[Session] Cannot encode envelope");
                false
            }
        }
    }

    /// Ask the receive loop to stop.
    pub fn close(&self) {
        self.close.send_replace(true);
    }
}

/// Register a session for `stream` and spawn its loops.
pub(crate) fn open(inner: &Arc<ControllerInner>, stream: TcpStream, addr: SocketAddr) {
    let (read_half, write_half) = stream.into_split();
    let (outbound, queue) = mpsc::unbounded_channel();
    let (close, closed) = watch::channel(false);
    let session = Arc::new(Session {
        addr,
        client: Mutex::new(None),
        outbound,
        close,
    });
    inner.sessions.insert(addr, session.clone());
    info!(%addr, sessions = inner.sessions.len(), "[Session] Connected");

    let writer = tokio::spawn(send_loop(write_half, queue, addr));
    let inner = inner.clone();
    tokio::spawn(async move {
        let reader = tokio::spawn({
            let inner = inner.clone();
            let session = session.clone();
            async move { receive_loop(&inner, &session, read_half, closed).await }
        });
        if let Err(e) = reader.await {
            warn!(%addr, error = %e, "[Session] Receive loop aborted");
        }

        let mut notice = Envelope::command(ControlCommand::CloseClient);
        notice.client = session.client();
        session.send(&notice);
        inner.remove_session(&session);
        // Dropping the last handle closes the queue so the writer can finish.
        drop(session);
        let _ = writer.await;
        info!(%addr, "[Session] Closed");
    });
}

enum Inbound {
    Line(String),
    Eof,
    TooLong,
    Failed(std::io::Error),
}

/// Read one line of at most `max` bytes, newline excluded.
async fn read_line(
    reader: &mut BufReader<OwnedReadHalf>,
    buf: &mut Vec<u8>,
    max: usize,
) -> Inbound {
    buf.clear();
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
    match (&mut *reader).take(limit).read_until(b'\n', buf).await {
        Ok(0) => Inbound::Eof,
        Ok(_) => {
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            } else if buf.len() > max {
                return Inbound::TooLong;
            }
            match String::from_utf8(std::mem::take(buf)) {
                Ok(line) => Inbound::Line(line),
                Err(e) => Inbound::Failed(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            }
        }
        Err(e) => Inbound::Failed(e),
    }
}

async fn receive_loop(
    inner: &Arc<ControllerInner>,
    session: &Arc<Session>,
    read_half: OwnedReadHalf,
    mut closed: watch::Receiver<bool>,
) {
    let max = inner.config.max_line_bytes;
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();
    loop {
        if *closed.borrow() {
            break;
        }
        tokio::select! {
            _ = closed.changed() => break,
            next = read_line(&mut reader, &mut buf, max) => match next {
                Inbound::Eof => {
                    debug!(addr = %session.addr(), "[Session] Peer closed");
                    break;
                }
                Inbound::TooLong => {
                    warn!(addr = %session.addr(), max, "[Session] Line too long");
                    break;
                }
                Inbound::Failed(e) => {
                    warn!(addr = %session.addr(), error = %e, "[Session] Read failed");
                    break;
                }
                Inbound::Line(line) if line.trim().is_empty() => break,
                Inbound::Line(line) => {
                    if handler::handle_line(inner, session, &line).await == Flow::Close {
                        break;
                    }
                }
            },
        }
    }
}

async fn send_loop(
    mut write_half: OwnedWriteHalf,
    queue: mpsc::UnboundedReceiver<String>,
    addr: SocketAddr,
) {
    let mut queue = UnboundedReceiverStream::new(queue);
    while let Some(mut line) = queue.next().await {
        line.push('\n');
        if let Err(e) = write_half.write_all(line.as_bytes()).await {
            warn!(%addr, error = %e, "[Session] Write failed");
            break;
        }
    }
    let _ = write_half.shutdown().await;
}
