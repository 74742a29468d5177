//! Local terminal: the user's own TTY driven through crossterm.
//!
//! Remote output is passed straight to stdout; the remote side does all the
//! emulation. Input is read on a dedicated thread and handed to the async
//! event loop over a channel.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::thread;

use crossterm::{
    cursor::{MoveTo, SetCursorStyle, Show},
    event::{self, DisableBracketedPaste, EnableBracketedPaste, Event},
    execute, queue,
    style::{ResetColor, SetAttribute, Attribute},
    terminal::{self, Clear, ClearType, SetTitle},
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::keymapper::ModeTracker;
use crate::bridge::{Renderer, RendererFactory, Viewport};

/// Puts the TTY in raw mode for the lifetime of the guard.
pub struct TerminalGuard {
    active: bool,
}

impl TerminalGuard {
    pub fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        if let Err(e) = execute!(io::stdout(), EnableBracketedPaste) {
            // Not fatal: pasted text then arrives as key events
            warn!("Bracketed paste unavailable: {}", e);
        }
        Ok(Self { active: true })
    }

    pub fn leave(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        let mut stdout = io::stdout();
        let _ = execute!(
            stdout,
            DisableBracketedPaste,
            SetAttribute(Attribute::Reset),
            ResetColor,
            SetCursorStyle::DefaultUserShape,
            Show
        );
        let _ = terminal::disable_raw_mode();
        let _ = stdout.flush();
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        self.leave();
    }
}

/// Renderer writing to stdout
pub struct TerminalRenderer {
    out: io::Stdout,
    viewport: Viewport,
    modes: Rc<RefCell<ModeTracker>>,
}

impl TerminalRenderer {
    fn current_size() -> io::Result<Viewport> {
        let (cols, rows) = terminal::size()?;
        Ok(Viewport::new(cols, rows))
    }
}

impl Renderer for TerminalRenderer {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.modes.borrow_mut().observe(data);
        self.out.write_all(data)?;
        self.out.flush()
    }

    fn fit(&mut self) -> io::Result<Option<Viewport>> {
        let size = Self::current_size()?;
        if size == self.viewport {
            return Ok(None);
        }
        debug!("Terminal resized to {}x{}", size.cols, size.rows);
        self.viewport = size;
        Ok(Some(size))
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn dispose(&mut self) -> io::Result<()> {
        // Leave the remote output on screen, just reset what it left behind
        queue!(self.out, SetAttribute(Attribute::Reset), ResetColor, Show)?;
        self.out.write_all(b"\r\n")?;
        self.out.flush()
    }
}

/// Creates a fresh, cleared terminal renderer for each session.
pub struct TerminalFactory {
    modes: Rc<RefCell<ModeTracker>>,
}

impl TerminalFactory {
    /// `modes` is shared with the key handling side so arrow keys follow the
    /// remote application's cursor-key mode.
    pub fn new(modes: Rc<RefCell<ModeTracker>>) -> Self {
        Self { modes }
    }
}

impl RendererFactory for TerminalFactory {
    type Renderer = TerminalRenderer;

    fn create(&mut self) -> io::Result<TerminalRenderer> {
        let mut out = io::stdout();
        execute!(out, ResetColor, Clear(ClearType::All), MoveTo(0, 0))?;
        self.modes.borrow_mut().reset();

        // Start from a zero size so the first fit always reports the real one
        Ok(TerminalRenderer {
            out,
            viewport: Viewport::new(0, 0),
            modes: self.modes.clone(),
        })
    }
}

/// Write a line outside of any session (prompts, hints).
pub fn print_line(text: &str) -> io::Result<()> {
    let mut out = io::stdout();
    write!(out, "{}\r\n", text)?;
    out.flush()
}

/// Set the terminal window title.
pub fn set_title(title: &str) {
    if let Err(e) = execute!(io::stdout(), SetTitle(title)) {
        debug!("Failed to set title: {}", e);
    }
}

/// Read terminal events on a blocking thread and forward them.
///
/// The thread exits once the receiver is dropped and the next event arrives.
pub fn spawn_input_reader(tx: mpsc::UnboundedSender<Event>) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("roamterm-input".to_string())
        .spawn(move || loop {
            match event::read() {
                Ok(ev) => {
                    if tx.send(ev).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Terminal input failed: {}", e);
                    break;
                }
            }
        })
}
