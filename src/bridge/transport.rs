//! Transport layer: the persistent full-duplex connection to a target.
//!
//! A [`Connector`] opens a [`Transport`] without waiting for the handshake.
//! Everything the socket does afterwards (open, messages, errors, close) is
//! reported through an [`EventSink`] as [`SessionEvent`]s tagged with the
//! session id they belong to, so the bridge can drop events from sessions it
//! has already torn down.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::protocol::{close_code, WireFrame};

/// How long to wait for the server to acknowledge our close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Identifies one session of a bridge. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// Something the socket did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(WireFrame),
    /// Socket-level error. Always followed by `Close`.
    Error(String),
    Close { code: u16, reason: String },
}

/// A transport event together with the session it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: TransportEvent,
}

/// Where a transport reports its events.
#[derive(Debug, Clone)]
pub struct EventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Deliver an event. Events sent after the receiver is gone are dropped.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send(SessionEvent {
            session: self.session,
            event,
        });
    }
}

/// Sending half of an open connection.
pub trait Transport {
    fn send(&mut self, frame: WireFrame) -> Result<(), TransportError>;

    /// Start closing the connection. Calling it twice is harmless.
    fn close(&mut self, code: u16, reason: &str);
}

/// Opens transports.
pub trait Connector {
    type Transport: Transport;

    fn connect(&mut self, url: &Url, events: EventSink) -> Result<Self::Transport, TransportError>;
}

/// Websocket connector backed by tokio-tungstenite.
///
/// Each connection runs in its own task; must be called from within a tokio
/// runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Transport = WsTransport;

    fn connect(&mut self, url: &Url, events: EventSink) -> Result<WsTransport, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel::<Message>();
        info!("Opening websocket for session {:?} to {}", events.session(), redact(url));
        let task = tokio::spawn(run_socket(url.to_string(), rx, events));
        Ok(WsTransport {
            outgoing: tx,
            task,
            closing: false,
        })
    }
}

/// Handle to a websocket running in a background task
pub struct WsTransport {
    outgoing: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
    closing: bool,
}

impl Transport for WsTransport {
    fn send(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        if self.closing {
            return Err(TransportError::Closed);
        }
        let msg = match frame {
            WireFrame::Text(text) => Message::Text(text),
            WireFrame::Binary(data) => Message::Binary(data),
        };
        self.outgoing.send(msg).map_err(|_| TransportError::Closed)
    }

    fn close(&mut self, code: u16, reason: &str) {
        if self.closing {
            return;
        }
        self.closing = true;
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        if self.outgoing.send(Message::Close(Some(frame))).is_err() {
            // Socket task already finished
            debug!("close requested on finished transport");
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if !self.closing {
            // Dropped without a close handshake: nothing left to flush
            self.task.abort();
        }
    }
}

/// Socket task: connect, then pump frames both ways until closed.
async fn run_socket(url: String, mut outgoing: mpsc::UnboundedReceiver<Message>, events: EventSink) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            warn!("Websocket connect failed: {}", e);
            events.emit(TransportEvent::Error(e.to_string()));
            events.emit(TransportEvent::Close {
                code: close_code::ABNORMAL,
                reason: String::new(),
            });
            return;
        }
    };

    events.emit(TransportEvent::Open);
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            out = outgoing.recv() => {
                // Transport handle gone without close(): close normally
                let msg = out.unwrap_or_else(|| Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                })));
                let is_close = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    events.emit(TransportEvent::Error(e.to_string()));
                    events.emit(TransportEvent::Close {
                        code: close_code::ABNORMAL,
                        reason: String::new(),
                    });
                    return;
                }
                if is_close {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(msg)) => {
                        if let Some((code, reason)) = dispatch(msg, &events) {
                            events.emit(TransportEvent::Close { code, reason });
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        events.emit(TransportEvent::Error(e.to_string()));
                        events.emit(TransportEvent::Close {
                            code: close_code::ABNORMAL,
                            reason: String::new(),
                        });
                        return;
                    }
                    None => {
                        events.emit(TransportEvent::Close {
                            code: close_code::ABNORMAL,
                            reason: String::new(),
                        });
                        return;
                    }
                }
            }
        }
    }

    // We sent a close frame; wait for the server's answer, but not forever.
    let ack = tokio::time::timeout(CLOSE_TIMEOUT, async {
        while let Some(Ok(msg)) = stream.next().await {
            if let Some(close) = dispatch(msg, &events) {
                return Some(close);
            }
        }
        None
    })
    .await;

    let (code, reason) = match ack {
        Ok(Some(close)) => close,
        Ok(None) | Err(_) => (close_code::ABNORMAL, String::new()),
    };
    events.emit(TransportEvent::Close { code, reason });
}

/// Forward a data frame; returns the close code and reason for close frames.
fn dispatch(msg: Message, events: &EventSink) -> Option<(u16, String)> {
    match msg {
        Message::Text(text) => events.emit(TransportEvent::Message(WireFrame::Text(text))),
        Message::Binary(data) => events.emit(TransportEvent::Message(WireFrame::Binary(data))),
        Message::Close(frame) => {
            return Some(match frame {
                Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                None => (close_code::NO_STATUS, String::new()),
            });
        }
        // Pings are answered by tungstenite itself
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
    }
    None
}

/// URL with the token query parameter masked, for logs.
pub fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if pairs.is_empty() {
        return shown.to_string();
    }
    shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
            .event
    }

    #[test]
    fn test_redact_token() {
        let url = Url::parse("ws://localhost:8000/v2/terminal/ws/srv?token=secret").unwrap();
        assert_eq!(redact(&url), "ws://localhost:8000/v2/terminal/ws/srv?token=***");
    }

    #[tokio::test]
    async fn test_websocket_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            ws.send(Message::Text("\u{6}".to_string())).await.unwrap();
            ws.send(Message::Text("hello\r\n".to_string())).await.unwrap();

            // Keystrokes from the client
            let received = loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => break text,
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected: {:?}", other),
                }
            };

            ws.close(Some(CloseFrame {
                code: CloseCode::from(4005),
                reason: "not configured".into(),
            }))
            .await
            .unwrap();
            // Drain until the client acknowledges
            while let Some(Ok(_)) = ws.next().await {}
            received
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let url = Url::parse(&format!("ws://{}/v2/terminal/ws/srv-1?token=t", addr)).unwrap();
        let mut transport = WsConnector
            .connect(&url, EventSink::new(SessionId(1), tx))
            .unwrap();

        assert_eq!(next_event(&mut rx).await, TransportEvent::Open);
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Message(WireFrame::Text("\u{6}".to_string()))
        );
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Message(WireFrame::Text("hello\r\n".to_string()))
        );

        transport.send(WireFrame::Text("ls\n".to_string())).unwrap();

        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Close {
                code: 4005,
                reason: "not configured".to_string()
            }
        );
        assert_eq!(server.await.unwrap(), "ls\n");
    }

    #[tokio::test]
    async fn test_client_close_waits_for_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut code = None;
            // tungstenite answers the close frame on the next read
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Close(frame) = msg {
                    code = frame.map(|f| u16::from(f.code));
                }
            }
            code
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let url = Url::parse(&format!("ws://{}/v2/terminal/ws/srv-1?token=t", addr)).unwrap();
        let mut transport = WsConnector
            .connect(&url, EventSink::new(SessionId(3), tx))
            .unwrap();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Open);

        transport.close(close_code::NORMAL, "");
        transport.close(close_code::NORMAL, "");
        assert!(matches!(
            transport.send(WireFrame::Text("late".to_string())),
            Err(TransportError::Closed)
        ));
        // A closing transport keeps its task alive until the handshake ends
        drop(transport);

        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Close {
                code: close_code::NORMAL,
                reason: String::new()
            }
        );
        assert_eq!(server.await.unwrap(), Some(close_code::NORMAL));
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error_then_close() {
        // Bind and drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let url = Url::parse(&format!("ws://{}/v2/terminal/ws/srv-1?token=t", addr)).unwrap();
        let _transport = WsConnector
            .connect(&url, EventSink::new(SessionId(7), tx))
            .unwrap();

        assert!(matches!(next_event(&mut rx).await, TransportEvent::Error(_)));
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Close {
                code: close_code::ABNORMAL,
                reason: String::new()
            }
        );
    }
}
