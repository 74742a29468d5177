//! Key mapping for terminal input
//!
//! Converts crossterm key events to the VT sequences a remote shell expects.
//! The remote side owns all terminal emulation, so the only mode we follow
//! locally is cursor-key mode (DECCKM), picked up from the output stream.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// Input modes requested by the remote application
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InputModes {
    /// DECCKM: arrows send `ESC O x` instead of `ESC [ x`
    pub application_cursor: bool,
}

/// Watches remote output for `ESC [ ? 1 h` / `ESC [ ? 1 l`.
///
/// Sequences split across writes are still recognized.
#[derive(Debug, Default)]
pub struct ModeTracker {
    modes: InputModes,
    matched: usize,
}

impl ModeTracker {
    const PREFIX: &'static [u8] = b"\x1b[?1";

    pub fn modes(&self) -> InputModes {
        self.modes
    }

    pub fn observe(&mut self, data: &[u8]) {
        for &b in data {
            if self.matched == Self::PREFIX.len() {
                match b {
                    b'h' => self.modes.application_cursor = true,
                    b'l' => self.modes.application_cursor = false,
                    _ => {}
                }
                self.matched = 0;
            }
            if b == Self::PREFIX[self.matched] {
                self.matched += 1;
            } else {
                self.matched = usize::from(b == Self::PREFIX[0]);
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Key mapper for converting key events to bytes
pub struct KeyMapper;

impl KeyMapper {
    /// Map a crossterm KeyEvent to the bytes sent to the remote shell
    pub fn map(event: &KeyEvent, modes: InputModes) -> Option<Vec<u8>> {
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            KeyCode::Char(ch) => Some(Self::map_char(ch, mods)),

            KeyCode::Enter => Some(vec![0x0D]),

            KeyCode::Backspace => {
                if mods.contains(Modifiers::ALT) {
                    Some(vec![0x1B, 0x7F])
                } else {
                    Some(vec![0x7F])
                }
            }

            KeyCode::Tab => Some(vec![0x09]),
            KeyCode::BackTab => Some(b"\x1b[Z".to_vec()),
            KeyCode::Esc => Some(vec![0x1B]),

            KeyCode::Up => Some(Self::arrow_key(b'A', mods, modes)),
            KeyCode::Down => Some(Self::arrow_key(b'B', mods, modes)),
            KeyCode::Right => Some(Self::arrow_key(b'C', mods, modes)),
            KeyCode::Left => Some(Self::arrow_key(b'D', mods, modes)),

            KeyCode::Home => Some(Self::special_key(b'H', mods)),
            KeyCode::End => Some(Self::special_key(b'F', mods)),
            KeyCode::PageUp => Some(Self::tilde_key(5, mods)),
            KeyCode::PageDown => Some(Self::tilde_key(6, mods)),
            KeyCode::Insert => Some(Self::tilde_key(2, mods)),
            KeyCode::Delete => Some(Self::tilde_key(3, mods)),

            KeyCode::F(n) => {
                let bytes = Self::function_key(n, mods);
                (!bytes.is_empty()).then_some(bytes)
            }

            KeyCode::Null => Some(vec![0x00]),

            _ => None,
        }
    }

    fn map_char(ch: char, mods: Modifiers) -> Vec<u8> {
        if mods.contains(Modifiers::CTRL) {
            if let Some(code) = Self::control_code(ch) {
                if mods.contains(Modifiers::ALT) {
                    return vec![0x1B, code];
                }
                return vec![code];
            }
        }

        // Alt + key = ESC + key
        if mods.contains(Modifiers::ALT) {
            let mut bytes = vec![0x1B];
            bytes.extend(ch.to_string().as_bytes());
            return bytes;
        }

        ch.to_string().into_bytes()
    }

    /// C0 control byte for Ctrl+`ch`, if there is one
    pub fn control_code(ch: char) -> Option<u8> {
        match ch {
            'a'..='z' => Some(ch as u8 - b'a' + 1),
            'A'..='Z' => Some(ch as u8 - b'A' + 1),
            '@' | '`' | ' ' | '2' => Some(0x00),
            '[' | '3' => Some(0x1B),
            '\\' | '4' => Some(0x1C),
            ']' | '5' => Some(0x1D),
            '^' | '~' | '6' => Some(0x1E),
            '_' | '?' | '7' => Some(0x1F),
            _ => None,
        }
    }

    fn arrow_key(key: u8, mods: Modifiers, modes: InputModes) -> Vec<u8> {
        if !mods.is_empty() {
            format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
        } else if modes.application_cursor {
            vec![0x1B, b'O', key]
        } else {
            vec![0x1B, b'[', key]
        }
    }

    fn special_key(key: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            vec![0x1B, b'[', key]
        } else {
            format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
        }
    }

    fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", code).into_bytes()
        } else {
            format!("\x1b[{};{}~", code, Self::modifier_code(mods)).into_bytes()
        }
    }

    fn function_key(n: u8, mods: Modifiers) -> Vec<u8> {
        // F1-F4 are SS3 keys, the rest use tilde codes
        let tilde = match n {
            1..=4 => {
                let key = b"PQRS"[(n - 1) as usize];
                return if mods.is_empty() {
                    vec![0x1B, b'O', key]
                } else {
                    format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
                };
            }
            5 => 15,
            6 => 17,
            7 => 18,
            8 => 19,
            9 => 20,
            10 => 21,
            11 => 23,
            12 => 24,
            _ => return vec![],
        };
        Self::tilde_key(tilde, mods)
    }

    /// xterm modifier parameter
    fn modifier_code(mods: Modifiers) -> u8 {
        1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
            + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
            + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_event(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    #[test]
    fn test_char_keys() {
        let modes = InputModes::default();

        let event = key_event(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, modes), Some(b"a".to_vec()));

        // Ctrl+C
        let event = key_event(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event, modes), Some(vec![0x03]));

        // Alt+x
        let event = key_event(KeyCode::Char('x'), KeyModifiers::ALT);
        assert_eq!(KeyMapper::map(&event, modes), Some(vec![0x1B, b'x']));

        // Ctrl+Alt+a
        let event = key_event(KeyCode::Char('a'), KeyModifiers::CONTROL | KeyModifiers::ALT);
        assert_eq!(KeyMapper::map(&event, modes), Some(vec![0x1B, 0x01]));

        let event = key_event(KeyCode::Char('é'), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, modes), Some("é".as_bytes().to_vec()));
    }

    #[test]
    fn test_arrow_keys() {
        let modes = InputModes::default();

        let event = key_event(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, modes), Some(b"\x1b[A".to_vec()));

        let event = key_event(KeyCode::Up, KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event, modes), Some(b"\x1b[1;5A".to_vec()));

        let app = InputModes { application_cursor: true };
        let event = key_event(KeyCode::Left, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, app), Some(b"\x1bOD".to_vec()));
    }

    #[test]
    fn test_function_keys() {
        let modes = InputModes::default();

        let event = key_event(KeyCode::F(1), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, modes), Some(b"\x1bOP".to_vec()));

        let event = key_event(KeyCode::F(5), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, modes), Some(b"\x1b[15~".to_vec()));

        let event = key_event(KeyCode::F(12), KeyModifiers::SHIFT);
        assert_eq!(KeyMapper::map(&event, modes), Some(b"\x1b[24;2~".to_vec()));

        let event = key_event(KeyCode::F(2), KeyModifiers::ALT);
        assert_eq!(KeyMapper::map(&event, modes), Some(b"\x1b[1;3Q".to_vec()));

        let event = key_event(KeyCode::F(20), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, modes), None);
    }

    #[test]
    fn test_mode_tracker() {
        let mut tracker = ModeTracker::default();
        tracker.observe(b"hello \x1b[?1h");
        assert!(tracker.modes().application_cursor);

        // Split across writes
        tracker.observe(b"\x1b[?");
        tracker.observe(b"1l");
        assert!(!tracker.modes().application_cursor);

        // Other private modes are ignored
        tracker.observe(b"\x1b[?12h\x1b[?1049h");
        assert!(!tracker.modes().application_cursor);

        tracker.observe(b"\x1b\x1b[?1h");
        assert!(tracker.modes().application_cursor);
        tracker.reset();
        assert_eq!(tracker.modes(), InputModes::default());
    }
}
