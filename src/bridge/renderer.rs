//! Renderer seam: the local terminal emulator a session draws into.

use std::io;

use crossterm::style::Stylize;

/// Visible terminal size in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub cols: u16,
    pub rows: u16,
}

impl Viewport {
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

/// Events raised by the renderer side of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendererEvent {
    /// User input, already encoded as terminal bytes
    Input(Vec<u8>),
    /// Viewport changed size
    Resize(Viewport),
}

/// Local terminal emulator bound to one session.
pub trait Renderer {
    /// Display output verbatim.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Recompute the size that fits the container. Returns the new viewport
    /// only when it differs from the previous one.
    fn fit(&mut self) -> io::Result<Option<Viewport>>;

    /// Current viewport.
    fn viewport(&self) -> Viewport;

    /// Release the renderer. Called exactly once per renderer.
    fn dispose(&mut self) -> io::Result<()>;
}

/// Creates one renderer per session.
pub trait RendererFactory {
    type Renderer: Renderer;

    fn create(&mut self) -> io::Result<Self::Renderer>;
}

/// Status lines the bridge writes into the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLine {
    Connecting,
    Connected,
    Error,
    Disconnected(u16),
}

impl StatusLine {
    /// ANSI-styled bytes ready to hand to a renderer.
    pub fn render(&self) -> Vec<u8> {
        let line = match self {
            StatusLine::Connecting => format!("{}\r\n", "Connecting to server...".green().bold()),
            StatusLine::Connected => format!("{}\r\n\r\n", "Connected!".green().bold()),
            StatusLine::Error => format!("\r\n{}\r\n", "Connection error".red().bold()),
            StatusLine::Disconnected(code) => {
                format!("\r\n{}\r\n", format!("Disconnected (code: {})", code).red().bold())
            }
        };
        line.into_bytes()
    }
}

#[cfg(test)]
pub mod memory {
    //! In-memory renderer for tests.

    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// Shared view of everything a memory renderer saw
    #[derive(Debug, Default)]
    pub struct Screen {
        pub output: Vec<u8>,
        pub created: usize,
        pub disposed: usize,
        /// Size the next `fit()` will report
        pub container: Option<Viewport>,
    }

    impl Screen {
        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.output).into_owned()
        }
    }

    pub struct MemoryRenderer {
        screen: Rc<RefCell<Screen>>,
        viewport: Viewport,
        disposed: bool,
    }

    impl Renderer for MemoryRenderer {
        fn write(&mut self, data: &[u8]) -> io::Result<()> {
            assert!(!self.disposed, "write after dispose");
            self.screen.borrow_mut().output.extend_from_slice(data);
            Ok(())
        }

        fn fit(&mut self) -> io::Result<Option<Viewport>> {
            let container = self.screen.borrow().container.unwrap_or(self.viewport);
            if container == self.viewport {
                return Ok(None);
            }
            self.viewport = container;
            Ok(Some(container))
        }

        fn viewport(&self) -> Viewport {
            self.viewport
        }

        fn dispose(&mut self) -> io::Result<()> {
            assert!(!self.disposed, "renderer disposed twice");
            self.disposed = true;
            self.screen.borrow_mut().disposed += 1;
            Ok(())
        }
    }

    #[derive(Default, Clone)]
    pub struct MemoryFactory {
        pub screen: Rc<RefCell<Screen>>,
    }

    impl RendererFactory for MemoryFactory {
        type Renderer = MemoryRenderer;

        fn create(&mut self) -> io::Result<MemoryRenderer> {
            self.screen.borrow_mut().created += 1;
            Ok(MemoryRenderer {
                screen: self.screen.clone(),
                viewport: Viewport::new(80, 24),
                disposed: false,
            })
        }
    }
}
