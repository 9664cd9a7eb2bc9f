//! Built-in layouts, selectable by name.

use crate::layout::{KeySpec, LayoutSpec};
use evdev::Key;

/// A named layout compiled into the binary.
pub struct BuiltinLayout {
    pub name: &'static str,
    pub description: &'static str,
    build: fn() -> LayoutSpec,
}

impl BuiltinLayout {
    pub fn spec(&self) -> LayoutSpec {
        (self.build)()
    }
}

pub const BUILTIN_LAYOUTS: &[BuiltinLayout] = &[
    BuiltinLayout {
        name: "km-us-en",
        description: "US English keyboard, plus three standard mouse buttons",
        build: us_keyboard_mouse,
    },
    BuiltinLayout {
        name: "m-logi-m570",
        description: "Logitech M570 mouse",
        build: logitech_m570,
    },
];

/// Look up a built-in layout by name.
pub fn find_builtin(name: &str) -> Option<LayoutSpec> {
    BUILTIN_LAYOUTS.iter().find(|l| l.name == name).map(BuiltinLayout::spec)
}

struct Builder {
    keys: Vec<KeySpec>,
}

impl Builder {
    fn new() -> Self {
        Self { keys: Vec::new() }
    }

    fn key(mut self, units: u32, label: &str, key: Key) -> Self {
        self.keys.push(KeySpec::key(units, label, key.code()));
        self
    }

    fn gap(mut self, units: u32) -> Self {
        self.keys.push(KeySpec::spacer(units));
        self
    }

    /// Keys separated by one-unit gaps.
    fn run(mut self, keys: &[(u32, &str, Key)]) -> Self {
        for (i, &(units, label, key)) in keys.iter().enumerate() {
            if i > 0 {
                self = self.gap(1);
            }
            self = self.key(units, label, key);
        }
        self
    }

    fn build(self, units_per_row: u32, units_per_base: u32, px_per_base: u32) -> LayoutSpec {
        LayoutSpec { units_per_row, units_per_base, px_per_base, keys: self.keys }
    }
}

fn us_keyboard_mouse() -> LayoutSpec {
    Builder::new()
        // Function row
        .key(4, "Esc", Key::KEY_ESC)
        .gap(6)
        .run(&[(4, "F1", Key::KEY_F1), (4, "F2", Key::KEY_F2), (4, "F3", Key::KEY_F3), (4, "F4", Key::KEY_F4)])
        .gap(4)
        .run(&[(4, "F5", Key::KEY_F5), (4, "F6", Key::KEY_F6), (4, "F7", Key::KEY_F7), (4, "F8", Key::KEY_F8)])
        .gap(3)
        .run(&[(4, "F9", Key::KEY_F9), (4, "F10", Key::KEY_F10), (4, "F11", Key::KEY_F11), (4, "F12", Key::KEY_F12)])
        // Number row
        .run(&[
            (4, "`", Key::KEY_GRAVE), (4, "1", Key::KEY_1), (4, "2", Key::KEY_2), (4, "3", Key::KEY_3),
            (4, "4", Key::KEY_4), (4, "5", Key::KEY_5), (4, "6", Key::KEY_6), (4, "7", Key::KEY_7),
            (4, "8", Key::KEY_8), (4, "9", Key::KEY_9), (4, "0", Key::KEY_0), (4, "-", Key::KEY_MINUS),
            (4, "=", Key::KEY_EQUAL), (9, "Bksp", Key::KEY_BACKSPACE),
        ])
        // Top row
        .run(&[
            (6, "Tab", Key::KEY_TAB), (4, "Q", Key::KEY_Q), (4, "W", Key::KEY_W), (4, "E", Key::KEY_E),
            (4, "R", Key::KEY_R), (4, "T", Key::KEY_T), (4, "Y", Key::KEY_Y), (4, "U", Key::KEY_U),
            (4, "I", Key::KEY_I), (4, "O", Key::KEY_O), (4, "P", Key::KEY_P), (4, "[", Key::KEY_LEFTBRACE),
            (4, "]", Key::KEY_RIGHTBRACE), (7, "\\", Key::KEY_BACKSLASH),
        ])
        // Home row
        .run(&[
            (9, "Caps", Key::KEY_CAPSLOCK), (4, "A", Key::KEY_A), (4, "S", Key::KEY_S), (4, "D", Key::KEY_D),
            (4, "F", Key::KEY_F), (4, "G", Key::KEY_G), (4, "H", Key::KEY_H), (4, "J", Key::KEY_J),
            (4, "K", Key::KEY_K), (4, "L", Key::KEY_L), (4, ";", Key::KEY_SEMICOLON),
            (4, "'", Key::KEY_APOSTROPHE), (9, "Enter", Key::KEY_ENTER),
        ])
        // Shift row
        .run(&[
            (12, "Shift", Key::KEY_LEFTSHIFT), (4, "Z", Key::KEY_Z), (4, "X", Key::KEY_X), (4, "C", Key::KEY_C),
            (4, "V", Key::KEY_V), (4, "B", Key::KEY_B), (4, "N", Key::KEY_N), (4, "M", Key::KEY_M),
            (4, ",", Key::KEY_COMMA), (4, ".", Key::KEY_DOT), (4, "/", Key::KEY_SLASH),
            (11, "Shift", Key::KEY_RIGHTSHIFT),
        ])
        // Bottom row
        .run(&[
            (5, "Ctrl", Key::KEY_LEFTCTRL), (5, "Sup", Key::KEY_LEFTMETA), (5, "Alt", Key::KEY_LEFTALT),
            (32, "Space", Key::KEY_SPACE), (5, "Alt", Key::KEY_RIGHTALT), (5, "Sup", Key::KEY_RIGHTMETA),
            (5, "Fn", Key::KEY_FN), (5, "Ctrl", Key::KEY_RIGHTCTRL),
        ])
        // Mouse buttons
        .gap(12)
        .run(&[
            (16, "Mouse Left", Key::BTN_LEFT),
            (16, "Mouse Middle", Key::BTN_MIDDLE),
            (16, "Mouse Right", Key::BTN_RIGHT),
        ])
        .gap(12)
        .build(74, 4, 24)
}

fn logitech_m570() -> LayoutSpec {
    Builder::new()
        .run(&[
            (4, "<", Key::BTN_SIDE),
            (12, "Left", Key::BTN_LEFT),
            (12, "Middle", Key::BTN_MIDDLE),
            (12, "Right", Key::BTN_RIGHT),
            (4, ">", Key::BTN_EXTRA),
        ])
        .build(48, 4, 24)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_state::KEY_CNT;

    #[test]
    fn all_builtins_validate() {
        for layout in BUILTIN_LAYOUTS {
            let spec = layout.spec();
            assert!(spec.validate(KEY_CNT).is_ok(), "{} failed validation", layout.name);
        }
    }

    #[test]
    fn us_layout_dimensions() {
        let spec = find_builtin("km-us-en").unwrap();
        let m = spec.validate(KEY_CNT).unwrap();
        assert_eq!(m.rows, 7);
        assert_eq!(m.width, 2 * 6 + 74 * 6);
        assert_eq!(m.height, 6 + 7 * (24 + 6));
    }

    #[test]
    fn m570_is_one_row() {
        let spec = find_builtin("m-logi-m570").unwrap();
        assert_eq!(spec.validate(KEY_CNT).unwrap().rows, 1);
        assert!(spec.keys.iter().any(|k| k.code == Some(Key::BTN_SIDE.code())));
    }

    #[test]
    fn unknown_name_is_none() {
        assert!(find_builtin("dvorak").is_none());
    }
}
