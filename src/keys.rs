use std::io::{self, stdout};
use std::time::Duration;

use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::{execute, terminal};
use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JogKey {
    Left,
    Right,
    Up,
    Down,
    W,
    S,
    A,
    D,
    Quit,
}

impl JogKey {
    pub fn from_event(key: &KeyEvent) -> Option<JogKey> {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char('c') => Some(JogKey::Quit),
                _ => None,
            };
        }
        match key.code {
            KeyCode::Left => Some(JogKey::Left),
            KeyCode::Right => Some(JogKey::Right),
            KeyCode::Up => Some(JogKey::Up),
            KeyCode::Down => Some(JogKey::Down),
            KeyCode::Esc => Some(JogKey::Quit),
            KeyCode::Char(c) => match c.to_ascii_lowercase() {
                'w' => Some(JogKey::W),
                's' => Some(JogKey::S),
                'a' => Some(JogKey::A),
                'd' => Some(JogKey::D),
                'q' => Some(JogKey::Quit),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            JogKey::Left => "←",
            JogKey::Right => "→",
            JogKey::Up => "↑",
            JogKey::Down => "↓",
            JogKey::W => "W",
            JogKey::S => "S",
            JogKey::A => "A",
            JogKey::D => "D",
            JogKey::Quit => "Q",
        }
    }

    fn bit(self) -> u16 {
        1 << self as u16
    }
}

/// Set of keys currently held down.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeldKeys(u16);

impl HeldKeys {
    pub fn of(keys: &[JogKey]) -> Self {
        keys.iter().fold(HeldKeys::default(), |mut held, key| {
            held.press(*key);
            held
        })
    }

    pub fn press(&mut self, key: JogKey) {
        self.0 |= key.bit();
    }

    pub fn release(&mut self, key: JogKey) {
        self.0 &= !key.bit();
    }

    pub fn is_held(&self, key: JogKey) -> bool {
        self.0 & key.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Applies one terminal key event.
    pub fn apply(&mut self, key: &KeyEvent) {
        let Some(jog_key) = JogKey::from_event(key) else {
            return;
        };
        match key.kind {
            KeyEventKind::Press | KeyEventKind::Repeat => self.press(jog_key),
            KeyEventKind::Release => self.release(jog_key),
        }
    }
}

pub trait KeySource {
    /// Waits up to `wait` for input and returns the keys held afterwards.
    fn held(&mut self, wait: Duration) -> io::Result<HeldKeys>;
}

/// Key state from crossterm events. The terminal must already be in raw
/// mode. Terminals that report key releases give true held state; on the rest
/// a key counts as held only for the poll in which it was pressed or repeated.
pub struct CrosstermKeys {
    held: HeldKeys,
    reports_release: bool,
}

impl CrosstermKeys {
    pub fn new() -> io::Result<Self> {
        let reports_release = terminal::supports_keyboard_enhancement().unwrap_or(false);
        if reports_release {
            execute!(
                stdout(),
                PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
            )?;
        }
        info!("Key release events supported: {reports_release}");
        Ok(CrosstermKeys {
            held: HeldKeys::default(),
            reports_release,
        })
    }
}

impl KeySource for CrosstermKeys {
    fn held(&mut self, wait: Duration) -> io::Result<HeldKeys> {
        if !self.reports_release {
            self.held = HeldKeys::default();
        }
        let mut timeout = wait;
        while event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                self.held.apply(&key);
            }
            timeout = Duration::ZERO;
        }
        Ok(self.held)
    }
}

impl Drop for CrosstermKeys {
    fn drop(&mut self) {
        if self.reports_release {
            let _ = execute!(stdout(), PopKeyboardEnhancementFlags);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, kind: KeyEventKind) -> KeyEvent {
        KeyEvent::new_with_kind(code, KeyModifiers::NONE, kind)
    }

    #[test]
    fn press_and_release_track_held_state() {
        let mut held = HeldKeys::default();
        held.apply(&key(KeyCode::Right, KeyEventKind::Press));
        held.apply(&key(KeyCode::Char('W'), KeyEventKind::Press));
        assert!(held.is_held(JogKey::Right));
        assert!(held.is_held(JogKey::W));

        held.apply(&key(KeyCode::Right, KeyEventKind::Release));
        assert!(!held.is_held(JogKey::Right));
        assert_eq!(held, HeldKeys::of(&[JogKey::W]));
    }

    #[test]
    fn control_c_quits() {
        let event = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(JogKey::from_event(&event), Some(JogKey::Quit));
        let plain = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE);
        assert_eq!(JogKey::from_event(&plain), None);
    }

    #[test]
    fn unrelated_keys_are_ignored() {
        let mut held = HeldKeys::default();
        held.apply(&key(KeyCode::Enter, KeyEventKind::Press));
        assert!(held.is_empty());
    }
}
