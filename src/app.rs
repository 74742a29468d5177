//! Terminal page: drives one bridge from the local keyboard.
//!
//! The page owns the event loop. It multiplexes socket events, keyboard and
//! resize events and disconnect notifications on one thread, and decides what
//! happens after a session ends (reconnect prompt, configuration hint, quit).

use std::cell::RefCell;
use std::rc::Rc;

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::{Color, Stylize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

use crate::bridge::{
    BridgeOptions, Connector, Disconnect, RendererEvent, RendererFactory, SessionBridge, SessionEvent,
};
use crate::config::PrefixKey;
use crate::ui::{KeyMapper, ModeTracker};
use crate::ui::terminal;

/// Connection indicator shown in the window title
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageState {
    /// Waiting for server details
    Loading,
    Live,
    Disconnected { message: String },
    NotConfigured,
}

impl PageState {
    /// State after the bridge reported a disconnect
    pub fn after_disconnect(code: u16) -> Self {
        let disconnect = Disconnect::classify(code);
        if !disconnect.is_retryable() {
            return PageState::NotConfigured;
        }
        let hint = match disconnect {
            Disconnect::Unauthorized => " Access token rejected.",
            Disconnect::NotFound => " Server not found.",
            Disconnect::NotRunning => " Server is not running.",
            Disconnect::Ended => " Session ended.",
            Disconnect::Lost { .. } | Disconnect::NotConfigured => "",
        };
        PageState::Disconnected {
            message: format!("Connection closed (code: {}).{}", code, hint),
        }
    }

    pub fn color(&self) -> Color {
        match self {
            PageState::Loading => Color::Blue,
            PageState::Live => Color::Green,
            PageState::Disconnected { .. } => Color::Red,
            PageState::NotConfigured => Color::Yellow,
        }
    }

    pub fn describe(&self) -> &str {
        match self {
            PageState::Loading => "loading",
            PageState::Live => "connected",
            PageState::Disconnected { .. } => "disconnected",
            PageState::NotConfigured => "not configured",
        }
    }

    /// Window title for a server in this state
    pub fn title(&self, label: &str) -> String {
        format!("● {} · {}", label, self.describe())
    }

    /// A reconnect makes sense from here
    pub fn can_reconnect(&self) -> bool {
        matches!(self, PageState::Disconnected { .. })
    }
}

/// What the page should do in response to a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Send bytes to the remote shell
    Send(Vec<u8>),
    /// Start a fresh session
    Reconnect,
    /// Paste the clipboard into the session
    Paste,
    Quit,
    /// Prefix pressed, waiting for the command key
    Pending,
    Ignore,
}

/// Page-level notifications produced by bridge callbacks
#[derive(Debug)]
enum PageEvent {
    Disconnected { code: u16, reason: String },
}

/// Everything the page needs besides the bridge
pub struct PageOptions {
    pub server_id: String,
    pub token: String,
    pub label: String,
    pub panel_url: Url,
    pub prefix: PrefixKey,
    pub set_title: bool,
}

pub struct TerminalPage<C: Connector, F: RendererFactory> {
    bridge: SessionBridge<C, F>,
    options: PageOptions,
    state: PageState,
    prefix_pending: bool,
    modes: Rc<RefCell<ModeTracker>>,
    transport_rx: mpsc::UnboundedReceiver<SessionEvent>,
    page_rx: mpsc::UnboundedReceiver<PageEvent>,
}

impl<C: Connector, F: RendererFactory> TerminalPage<C, F> {
    pub fn new(
        connector: C,
        renderers: F,
        bridge_options: BridgeOptions,
        options: PageOptions,
        modes: Rc<RefCell<ModeTracker>>,
    ) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (page_tx, page_rx) = mpsc::unbounded_channel();
        let mut bridge = SessionBridge::new(connector, renderers, bridge_options, transport_tx);

        bridge.set_on_disconnect(move |code, reason| {
            let _ = page_tx.send(PageEvent::Disconnected {
                code,
                reason: reason.to_string(),
            });
        });

        Self {
            bridge,
            options,
            state: PageState::Loading,
            prefix_pending: false,
            modes,
            transport_rx,
            page_rx,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &PageState {
        &self.state
    }

    /// Open the session for the page's server
    pub fn connect(&mut self) -> anyhow::Result<()> {
        self.bridge
            .attach(&self.options.server_id, &self.options.token)?;
        self.set_state(PageState::Live);
        Ok(())
    }

    fn reconnect(&mut self) -> anyhow::Result<()> {
        info!("Reconnecting to {}", self.options.server_id);
        self.bridge.start(&self.options.server_id, &self.options.token)?;
        self.set_state(PageState::Live);
        Ok(())
    }

    fn set_state(&mut self, state: PageState) {
        self.state = state;
        // A prefix never outlives the state it was pressed in
        self.prefix_pending = false;
        if self.options.set_title {
            terminal::set_title(&self.state.title(&self.options.label));
        }
    }

    /// Run until the user quits.
    pub async fn run(&mut self, mut input: mpsc::UnboundedReceiver<Event>) -> anyhow::Result<()> {
        self.connect()?;

        loop {
            tokio::select! {
                Some(event) = self.transport_rx.recv() => {
                    self.bridge.handle_transport_event(event);
                }
                Some(page_event) = self.page_rx.recv() => {
                    self.on_page_event(page_event)?;
                }
                event = input.recv() => {
                    let Some(event) = event else {
                        info!("Input closed");
                        break;
                    };
                    if !self.on_input(event)? {
                        break;
                    }
                }
            }
        }

        self.bridge.stop();
        Ok(())
    }

    fn on_page_event(&mut self, event: PageEvent) -> anyhow::Result<()> {
        let PageEvent::Disconnected { code, reason } = event;
        // The session is over; release it like the page would on unmount
        self.bridge.stop();
        info!("Disconnected from {} (code: {}, reason: {:?})", self.options.server_id, code, reason);
        self.set_state(PageState::after_disconnect(code));
        self.show_prompt()?;
        Ok(())
    }

    fn show_prompt(&self) -> anyhow::Result<()> {
        let dot = "●".with(self.state.color());
        match &self.state {
            PageState::NotConfigured => {
                terminal::print_line(&format!("{} {}", dot, "Terminal Access Not Configured".yellow().bold()))?;
                terminal::print_line(
                    "This server does not have a connection endpoint configured. \
                     Please set up SSH or Docker access for this server to use the terminal.",
                )?;
                terminal::print_line(&format!("Server settings: {}", self.settings_url()))?;
                terminal::print_line("[q] quit")?;
            }
            PageState::Disconnected { message } => {
                terminal::print_line(&format!("{} {}", dot, message.as_str().red()))?;
                terminal::print_line("[r] reconnect  [q] quit")?;
            }
            PageState::Loading | PageState::Live => {}
        }
        Ok(())
    }

    fn settings_url(&self) -> String {
        let mut url = self.options.panel_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("hosting");
        }
        url.to_string()
    }

    /// Returns false when the page should exit
    fn on_input(&mut self, event: Event) -> anyhow::Result<bool> {
        match event {
            Event::Key(key) => {
                if key.kind != KeyEventKind::Press {
                    return Ok(true);
                }
                match self.key_action(&key) {
                    KeyAction::Send(bytes) => {
                        self.bridge.handle_renderer_event(RendererEvent::Input(bytes));
                    }
                    KeyAction::Reconnect => self.reconnect()?,
                    KeyAction::Paste => self.paste_clipboard(),
                    KeyAction::Quit => return Ok(false),
                    KeyAction::Pending | KeyAction::Ignore => {}
                }
            }
            Event::Paste(text) => {
                if self.state == PageState::Live {
                    self.bridge
                        .handle_renderer_event(RendererEvent::Input(text.into_bytes()));
                }
            }
            Event::Resize(_, _) => self.bridge.handle_host_resize(),
            _ => {}
        }
        Ok(true)
    }

    /// Decide what a key press means in the current state
    pub fn key_action(&mut self, key: &KeyEvent) -> KeyAction {
        if self.state != PageState::Live {
            return match key.code {
                KeyCode::Char('r') if self.state.can_reconnect() => KeyAction::Reconnect,
                KeyCode::Char('q') | KeyCode::Esc => KeyAction::Quit,
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => KeyAction::Quit,
                _ => KeyAction::Ignore,
            };
        }

        let is_prefix = key.modifiers.contains(KeyModifiers::CONTROL)
            && key.code == KeyCode::Char(self.options.prefix.char);

        if self.prefix_pending {
            self.prefix_pending = false;
            if is_prefix {
                return KeyAction::Send(vec![self.options.prefix.byte()]);
            }
            return match key.code {
                KeyCode::Char('d') => KeyAction::Quit,
                KeyCode::Char('r') => KeyAction::Reconnect,
                KeyCode::Char(']') => KeyAction::Paste,
                _ => KeyAction::Ignore,
            };
        }

        if is_prefix {
            self.prefix_pending = true;
            return KeyAction::Pending;
        }

        let modes = self.modes.borrow().modes();
        match KeyMapper::map(key, modes) {
            Some(bytes) => KeyAction::Send(bytes),
            None => KeyAction::Ignore,
        }
    }

    fn paste_clipboard(&mut self) {
        let text = arboard::Clipboard::new().and_then(|mut clipboard| clipboard.get_text());
        match text {
            Ok(text) if !text.is_empty() => {
                self.bridge
                    .handle_renderer_event(RendererEvent::Input(text.into_bytes()));
            }
            Ok(_) => {}
            Err(e) => warn!("Clipboard unavailable: {}", e),
        }
    }
}
