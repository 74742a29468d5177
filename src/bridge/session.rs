//! Session bridge
//!
//! Owns one transport + renderer pair per remote target and wires them
//! together: renderer input and resizes go out over the transport, transport
//! output goes into the renderer, and connection loss is reported to the
//! caller through the disconnect callback.
//!
//! All handlers are synchronous and return immediately; the owner pumps
//! [`SessionEvent`]s from the channel given to [`SessionBridge::new`].

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::protocol::{close_code, session_url, OutboundFrame, UrlError};
use super::renderer::{Renderer, RendererEvent, RendererFactory, StatusLine};
use super::transport::{Connector, EventSink, SessionEvent, SessionId, Transport, TransportError, TransportEvent};

/// Connection state of the live session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("failed to create terminal renderer: {0}")]
    Renderer(#[source] std::io::Error),

    #[error("invalid session URL: {0}")]
    Url(#[from] UrlError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Disconnect callback: close code and reason as received
pub type DisconnectCallback = Box<dyn FnMut(u16, &str)>;

/// Where and how the bridge connects
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// API base URL; its scheme selects ws or wss
    pub api_url: Url,
    /// Path of the terminal endpoint below the API URL
    pub terminal_path: String,
    /// Send the current viewport as soon as the transport opens
    pub sync_size_on_open: bool,
}

struct Session<T, R> {
    id: SessionId,
    target: String,
    state: ConnectionState,
    transport: T,
    renderer: R,
}

pub struct SessionBridge<C: Connector, F: RendererFactory> {
    connector: C,
    renderers: F,
    options: BridgeOptions,
    events: mpsc::UnboundedSender<SessionEvent>,
    session: Option<Session<C::Transport, F::Renderer>>,
    next_id: u64,
    on_disconnect: Option<DisconnectCallback>,
}

impl<C: Connector, F: RendererFactory> SessionBridge<C, F> {
    pub fn new(
        connector: C,
        renderers: F,
        options: BridgeOptions,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            connector,
            renderers,
            options,
            events,
            session: None,
            next_id: 1,
            on_disconnect: None,
        }
    }

    /// Replace the disconnect callback. Never restarts the session.
    pub fn set_on_disconnect(&mut self, callback: impl FnMut(u16, &str) + 'static) {
        self.on_disconnect = Some(Box::new(callback));
    }

    /// State of the live session, if any
    #[cfg(test)]
    pub fn state(&self) -> Option<ConnectionState> {
        self.session.as_ref().map(|s| s.state)
    }

    /// Target of the live session, if any
    pub fn target(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.target.as_str())
    }

    #[cfg(test)]
    pub fn is_live(&self) -> bool {
        self.session.is_some()
    }

    /// Start a session, tearing down any live one first.
    pub fn start(&mut self, target: &str, token: &str) -> Result<(), BridgeError> {
        self.stop();

        let url = session_url(&self.options.api_url, &self.options.terminal_path, target, token)?;
        let mut renderer = self.renderers.create().map_err(BridgeError::Renderer)?;

        // Initial fit; any resize it causes is dropped since nothing is open yet
        match renderer.fit() {
            Ok(Some(viewport)) => trace!("initial fit {}x{} dropped", viewport.cols, viewport.rows),
            Ok(None) => {}
            Err(e) => warn!("Initial fit failed: {}", e),
        }
        if let Err(e) = renderer.write(&StatusLine::Connecting.render()) {
            warn!("Failed to write status line: {}", e);
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;

        let transport = match self.connector.connect(&url, EventSink::new(id, self.events.clone())) {
            Ok(transport) => transport,
            Err(e) => {
                let _ = renderer.dispose();
                return Err(e.into());
            }
        };

        info!("Session {:?} started for target {}", id, target);
        self.session = Some(Session {
            id,
            target: target.to_string(),
            state: ConnectionState::Connecting,
            transport,
            renderer,
        });
        Ok(())
    }

    /// Start only if `target` is not already the live session's target.
    pub fn attach(&mut self, target: &str, token: &str) -> Result<(), BridgeError> {
        if self.target() == Some(target) {
            debug!("Already attached to {}", target);
            return Ok(());
        }
        self.start(target, token)
    }

    /// Tear down the live session without notifying the caller. No-op when
    /// nothing is live.
    pub fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if session.state != ConnectionState::Closed {
            session.transport.close(close_code::NORMAL, "");
        }
        if let Err(e) = session.renderer.dispose() {
            warn!("Failed to dispose renderer: {}", e);
        }
        info!("Session {:?} stopped", session.id);
    }

    pub fn handle_transport_event(&mut self, event: SessionEvent) {
        let Some(session) = self.session.as_mut().filter(|s| s.id == event.session) else {
            // Torn-down session: a late close is the intentional one
            trace!("Dropping {:?} for stale session {:?}", event.event, event.session);
            return;
        };

        match event.event {
            TransportEvent::Open => {
                session.state = ConnectionState::Open;
                info!("Session {:?} connected", session.id);
                write_status(&mut session.renderer, StatusLine::Connected);
                if self.options.sync_size_on_open {
                    let viewport = session.renderer.viewport();
                    send(session, OutboundFrame::Resize {
                        cols: viewport.cols,
                        rows: viewport.rows,
                    });
                }
            }
            TransportEvent::Message(frame) => {
                if frame.is_keepalive() {
                    return;
                }
                if let Err(e) = session.renderer.write(frame.as_bytes()) {
                    warn!("Failed to render output: {}", e);
                }
            }
            TransportEvent::Error(detail) => {
                warn!("Session {:?} transport error: {}", session.id, detail);
                write_status(&mut session.renderer, StatusLine::Error);
            }
            TransportEvent::Close { code, reason } => {
                session.state = ConnectionState::Closed;
                info!("Session {:?} closed by remote (code: {}, reason: {:?})", session.id, code, reason);
                write_status(&mut session.renderer, StatusLine::Disconnected(code));
                if let Some(callback) = self.on_disconnect.as_mut() {
                    callback(code, &reason);
                }
            }
        }
    }

    pub fn handle_renderer_event(&mut self, event: RendererEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.state != ConnectionState::Open {
            trace!("Dropping {:?} while {:?}", event, session.state);
            return;
        }
        let frame = match event {
            RendererEvent::Input(bytes) => OutboundFrame::Input(bytes),
            RendererEvent::Resize(viewport) => OutboundFrame::Resize {
                cols: viewport.cols,
                rows: viewport.rows,
            },
        };
        send(session, frame);
    }

    /// Host window changed size: refit, and forward the result if it changed.
    pub fn handle_host_resize(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.renderer.fit() {
            Ok(Some(viewport)) => self.handle_renderer_event(RendererEvent::Resize(viewport)),
            Ok(None) => {}
            Err(e) => warn!("Failed to fit terminal: {}", e),
        }
    }
}

impl<C: Connector, F: RendererFactory> Drop for SessionBridge<C, F> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_status<R: Renderer>(renderer: &mut R, line: StatusLine) {
    if let Err(e) = renderer.write(&line.render()) {
        warn!("Failed to write status line: {}", e);
    }
}

fn send<T: Transport, R>(session: &mut Session<T, R>, frame: OutboundFrame) {
    let wire = match frame.encode() {
        Ok(wire) => wire,
        Err(e) => {
            warn!("Failed to encode {:?}: {}", frame, e);
            return;
        }
    };
    if let Err(e) = session.transport.send(wire) {
        warn!("Session {:?} send failed: {}", session.id, e);
    }
}
