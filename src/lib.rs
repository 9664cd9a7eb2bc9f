//! Live display of key and button state read from evdev input devices.
//!
//! A [`watcher::WatchSession`] reads any number of devices on a background
//! thread and feeds transitions into a [`keyboard::Keyboard`], which renders
//! a declarative [`layout::LayoutSpec`] onto a [`canvas::Canvas`].

pub mod canvas;
pub mod config;
pub mod display;
pub mod evdev_util;
pub mod key_state;
pub mod keyboard;
pub mod layout;
pub mod layouts;
pub mod poll;
pub mod settings;
pub mod terminal;
pub mod watcher;

pub use key_state::{KeyState, KeyStateStore, StateError, KEY_CNT};
pub use keyboard::Keyboard;
pub use layout::{KeySpec, LayoutError, LayoutSpec};
pub use watcher::{StartError, WatchError, WatchHandler, WatchSession};
