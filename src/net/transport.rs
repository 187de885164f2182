//! Socket transport
//!
//! A [`Connector`] opens one socket per attempt and reports everything that
//! happens on it as [`SocketEvent`]s tagged with the attempt id, so events
//! from an abandoned attempt can be told apart from the current one.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};
use url::Url;

/// Attempt identifier, increases with every connect
pub type AttemptId = u64;

/// Event reported by a transport task
#[derive(Debug, Clone, PartialEq)]
pub struct SocketEvent {
    pub attempt: AttemptId,
    pub kind: SocketEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEventKind {
    /// Handshake completed, frames may be sent
    Open,
    /// Text frame from the server
    Message(String),
    /// Transport error, always followed by `Closed`
    Error(String),
    /// Socket is gone
    Closed {
        clean: bool,
        code: Option<u16>,
        reason: String,
    },
}

/// Transport errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Socket is closed")]
    Closed,
}

/// Write half of one socket attempt
pub trait Transport: Send {
    fn send_text(&mut self, frame: String) -> Result<(), TransportError>;

    /// Start closing; a `Closed` event follows unless the attempt was abandoned
    fn close(&mut self);
}

/// Opens socket attempts
pub trait Connector: Send {
    fn open(&mut self, url: &Url, attempt: AttemptId) -> Box<dyn Transport>;
}

enum Outgoing {
    Frame(String),
    Close,
}

/// tokio-tungstenite backed connector
///
/// Every attempt runs in its own task and reports on the shared event channel.
pub struct WsConnector {
    events: mpsc::UnboundedSender<SocketEvent>,
}

impl WsConnector {
    pub fn new(events: mpsc::UnboundedSender<SocketEvent>) -> Self {
        Self { events }
    }

    /// Connector plus the receiving end of its event channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SocketEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl Connector for WsConnector {
    fn open(&mut self, url: &Url, attempt: AttemptId) -> Box<dyn Transport> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(url.clone(), attempt, rx, self.events.clone()));
        Box::new(WsTransport { tx })
    }
}

/// Handle to a socket task
struct WsTransport {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Transport for WsTransport {
    fn send_text(&mut self, frame: String) -> Result<(), TransportError> {
        self.tx
            .send(Outgoing::Frame(frame))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        let _ = self.tx.send(Outgoing::Close);
    }
}

async fn run_socket(
    url: Url,
    attempt: AttemptId,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    let emit = |kind: SocketEventKind| {
        // Receiver gone means the client is shutting down
        let _ = events.send(SocketEvent { attempt, kind });
    };
    let closed = |clean: bool, code: Option<u16>, reason: String| SocketEventKind::Closed {
        clean,
        code,
        reason,
    };

    debug!("Attempt {} connecting to {}", attempt, url);

    let stream = tokio::select! {
        result = connect_async(url.as_str()) => match result {
            Ok((stream, _)) => stream,
            Err(e) => {
                emit(SocketEventKind::Error(e.to_string()));
                emit(closed(false, None, String::new()));
                return;
            }
        },
        // Close requested or handle dropped before the handshake finished
        _ = outgoing.recv() => {
            debug!("Attempt {} abandoned while connecting", attempt);
            return;
        }
    };

    emit(SocketEventKind::Open);
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            next = outgoing.recv() => match next {
                Some(Outgoing::Frame(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        emit(SocketEventKind::Error(e.to_string()));
                        emit(closed(false, None, String::new()));
                        return;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    let _ = write.close().await;
                    emit(closed(true, Some(1000), "client closed".to_string()));
                    return;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => emit(SocketEventKind::Message(text)),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    emit(closed(true, code, reason));
                    return;
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!("Attempt {} ignoring {} byte binary frame", attempt, data.len());
                }
                Some(Ok(_)) => trace!("Attempt {} control frame", attempt),
                Some(Err(e)) => {
                    emit(SocketEventKind::Error(e.to_string()));
                    emit(closed(false, None, String::new()));
                    return;
                }
                None => {
                    emit(closed(false, None, "stream ended".to_string()));
                    return;
                }
            }
        }
    }
}
