//! Remote session bridge.
//!
//! This module contains the terminal-over-websocket client:
//!
//! - **protocol**: wire frames, keepalive sentinel, close codes, session URL
//! - **transport**: `Transport`/`Connector` traits and the websocket implementation
//! - **renderer**: `Renderer` trait the bridge draws into, status lines
//! - **session**: `SessionBridge`, the per-target connection state machine
//!
//! # Architecture
//!
//! ```text
//! SessionBridge
//! └── Session (one live at a time)
//!     ├── Transport  (websocket task, events via mpsc)
//!     └── Renderer   (local terminal, same lifetime as the transport)
//! ```

pub mod protocol;
pub mod renderer;
pub mod session;
pub mod transport;

pub use protocol::Disconnect;
pub use renderer::{Renderer, RendererEvent, RendererFactory, Viewport};
pub use session::{BridgeOptions, SessionBridge};
pub use transport::{Connector, SessionEvent, WsConnector};
