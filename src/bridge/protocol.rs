//! Wire protocol between the bridge and a remote session endpoint.
//!
//! The endpoint speaks a very small protocol over a websocket:
//!
//! ```text
//! client -> server   keystrokes        raw bytes, no envelope
//!                    resize            {"type":"resize","cols":80,"rows":24}
//! server -> client   terminal output   raw bytes / text
//!                    keepalive probe   single 0x06 byte (never rendered)
//! ```
//!
//! Close codes carry the disconnect reason back to the caller.

use serde::Serialize;
use url::Url;

/// Keepalive acknowledgment sent by the server (ASCII ACK).
pub const KEEPALIVE_ACK: u8 = 0x06;

/// Default path of the terminal endpoint below the API base URL.
pub const DEFAULT_TERMINAL_PATH: &str = "/v2/terminal/ws";

/// Websocket close codes used by the terminal endpoint.
pub mod close_code {
    /// Normal closure, sent by `stop()`.
    pub const NORMAL: u16 = 1000;
    /// No status code was present in the close frame.
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// Missing or rejected access token.
    pub const UNAUTHORIZED: u16 = 4001;
    /// Target exists but is not running.
    pub const NOT_RUNNING: u16 = 4003;
    /// Target does not exist or belongs to another account.
    pub const NOT_FOUND: u16 = 4004;
    /// Target has no configured session endpoint.
    pub const NOT_CONFIGURED: u16 = 4005;
}

/// A single websocket payload, independent of the socket library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl WireFrame {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            WireFrame::Text(text) => text.as_bytes(),
            WireFrame::Binary(data) => data,
        }
    }

    /// True if this payload is the keepalive probe and must not be rendered.
    pub fn is_keepalive(&self) -> bool {
        self.as_bytes() == [KEEPALIVE_ACK]
    }
}

/// Control messages serialized as JSON text frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Resize { cols: u16, rows: u16 },
}

/// Messages the bridge sends to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Keystroke bytes, passed through untouched.
    Input(Vec<u8>),
    /// Viewport size change.
    Resize { cols: u16, rows: u16 },
}

impl OutboundFrame {
    /// Encode for the wire.
    ///
    /// Keystrokes go out as text frames whenever they are valid UTF-8, since
    /// the server reads text frames; anything else falls back to binary.
    pub fn encode(&self) -> Result<WireFrame, serde_json::Error> {
        match self {
            OutboundFrame::Input(bytes) => Ok(match std::str::from_utf8(bytes) {
                Ok(text) => WireFrame::Text(text.to_string()),
                Err(_) => WireFrame::Binary(bytes.clone()),
            }),
            OutboundFrame::Resize { cols, rows } => {
                let msg = ControlMessage::Resize { cols: *cols, rows: *rows };
                Ok(WireFrame::Text(serde_json::to_string(&msg)?))
            }
        }
    }
}

/// Why a session ended, as seen by whoever drives the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// No session endpoint configured for the target.
    NotConfigured,
    Unauthorized,
    NotFound,
    NotRunning,
    /// Remote side closed normally (shell exited).
    Ended,
    /// Any other close code.
    Lost { code: u16 },
}

impl Disconnect {
    pub fn classify(code: u16) -> Self {
        match code {
            close_code::NOT_CONFIGURED => Disconnect::NotConfigured,
            close_code::UNAUTHORIZED => Disconnect::Unauthorized,
            close_code::NOT_FOUND => Disconnect::NotFound,
            close_code::NOT_RUNNING => Disconnect::NotRunning,
            close_code::NORMAL => Disconnect::Ended,
            _ => Disconnect::Lost { code },
        }
    }

    /// Whether offering a manual reconnect makes sense.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Disconnect::NotConfigured)
    }
}

/// Errors building the session URL
#[derive(Debug, thiserror::Error)]
pub enum UrlError {
    #[error("unsupported URL scheme '{0}' (expected http or https)")]
    Scheme(String),

    #[error("URL cannot carry a path: {0}")]
    CannotBeABase(String),
}

/// Build `<ws|wss>://<host>/<terminal-path>/<target>?token=<token>` from the
/// API base URL.
pub fn session_url(
    api_url: &Url,
    terminal_path: &str,
    target: &str,
    token: &str,
) -> Result<Url, UrlError> {
    let scheme = match api_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(UrlError::Scheme(other.to_string())),
    };

    let mut url = api_url.clone();
    url.set_scheme(scheme)
        .map_err(|_| UrlError::Scheme(api_url.scheme().to_string()))?;
    url.set_fragment(None);

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| UrlError::CannotBeABase(api_url.to_string()))?;
        segments.pop_if_empty();
        segments.extend(terminal_path.split('/').filter(|s| !s.is_empty()));
        segments.push(target);
    }

    url.set_query(None);
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}
