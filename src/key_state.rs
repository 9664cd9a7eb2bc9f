//! Lock-free key state table shared between the device watcher and the renderer.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

/// Number of key codes in the Linux input universe (`KEY_MAX + 1`), covering
/// every `KEY_*` and `BTN_*` code.
pub const KEY_CNT: usize = 0x300;

/// Last reported value of a key or button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum KeyState {
    #[default]
    Released = 0,
    Pressed = 1,
    Held = 2,
}

impl KeyState {
    /// Map an evdev key event value (0 = up, 1 = down, 2 = repeat).
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(KeyState::Released),
            1 => Some(KeyState::Pressed),
            2 => Some(KeyState::Held),
            _ => None,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => KeyState::Pressed,
            2 => KeyState::Held,
            _ => KeyState::Released,
        }
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyState::Released => "released",
            KeyState::Pressed => "pressed",
            KeyState::Held => "held",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("key code {code} is out of range (must be below {limit})")]
    OutOfRange { code: u16, limit: usize },
}

type RedrawCallback = Box<dyn Fn() + Send + Sync>;

/// Fixed-size table of key states, one atomic slot per code.
///
/// Writers never block each other and readers never block writers. A reader
/// walking every key while writers race may see a mix of old and new values;
/// each individual slot is always a valid state.
pub struct KeyStateStore {
    slots: Box<[AtomicU8]>,
    on_change: Option<RedrawCallback>,
}

impl KeyStateStore {
    /// Create a store with `capacity` codes, all released.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| AtomicU8::new(KeyState::Released as u8)).collect();
        Self { slots, on_change: None }
    }

    /// Number of codes the store can hold.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Replace the change notification. Passing `None` disables it.
    pub fn set_callback(&mut self, callback: Option<RedrawCallback>) {
        self.on_change = callback;
    }

    /// Current state of `code`.
    pub fn get(&self, code: u16) -> Result<KeyState, StateError> {
        let slot = self.slot(code)?;
        Ok(KeyState::from_raw(slot.load(Ordering::Acquire)))
    }

    /// Store `state` for `code`, returning whether the value changed.
    ///
    /// The callback fires only when the stored value actually changed.
    pub fn set(&self, code: u16, state: KeyState) -> Result<bool, StateError> {
        let slot = self.slot(code)?;
        let old = slot.swap(state as u8, Ordering::AcqRel);
        let changed = old != state as u8;
        if changed {
            if let Some(callback) = &self.on_change {
                callback();
            }
        }
        Ok(changed)
    }

    fn slot(&self, code: u16) -> Result<&AtomicU8, StateError> {
        self.slots.get(code as usize).ok_or(StateError::OutOfRange {
            code,
            limit: self.slots.len(),
        })
    }
}

impl Default for KeyStateStore {
    fn default() -> Self {
        Self::new(KEY_CNT)
    }
}

impl fmt::Debug for KeyStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStateStore")
            .field("capacity", &self.slots.len())
            .field("has_callback", &self.on_change.is_some())
            .finish()
    }
}
