//! User interface: local terminal output and input handling.
//!
//! - **terminal**: crossterm-backed renderer, raw-mode guard, input thread
//! - **keymapper**: Keyboard input to remote byte sequence mapping

pub mod keymapper;
pub mod terminal;

pub use keymapper::{KeyMapper, ModeTracker};
pub use terminal::{TerminalFactory, TerminalGuard};
