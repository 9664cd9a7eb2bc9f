//! Raw evdev record decoding and input device discovery.

use std::path::PathBuf;

/// Size of one `struct input_event` as read from an event device.
pub const RECORD_SIZE: usize = std::mem::size_of::<libc::input_event>();

/// Event type of key and button records (`EV_KEY`).
pub const EV_KEY: u16 = evdev::EventType::KEY.0;

/// The fields of an input event the watcher cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

impl RawEvent {
    /// Decode a native-endian `struct input_event`. The timestamp is skipped.
    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Self {
        let tail = RECORD_SIZE - 8;
        Self {
            kind: u16::from_ne_bytes([buf[tail], buf[tail + 1]]),
            code: u16::from_ne_bytes([buf[tail + 2], buf[tail + 3]]),
            value: i32::from_ne_bytes([buf[tail + 4], buf[tail + 5], buf[tail + 6], buf[tail + 7]]),
        }
    }

    /// Encode with a zero timestamp, as a device would emit it.
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        let tail = RECORD_SIZE - 8;
        buf[tail..tail + 2].copy_from_slice(&self.kind.to_ne_bytes());
        buf[tail + 2..tail + 4].copy_from_slice(&self.code.to_ne_bytes());
        buf[tail + 4..].copy_from_slice(&self.value.to_ne_bytes());
        buf
    }

    pub fn is_key(&self) -> bool {
        self.kind == EV_KEY
    }
}

/// An event device that reports key or button events.
#[derive(Debug, Clone)]
pub struct InputDevice {
    pub path: PathBuf,
    pub name: String,
    pub keys: usize,
}

/// Finds all event devices under /dev/input that report keys or buttons.
pub fn find_key_devices() -> Vec<InputDevice> {
    let mut devices: Vec<InputDevice> = evdev::enumerate()
        .filter_map(|(path, device)| {
            let keys = device.supported_keys()?.iter().count();
            if keys == 0 {
                return None;
            }
            Some(InputDevice {
                path,
                name: device.name().unwrap_or("unknown").to_string(),
                keys,
            })
        })
        .collect();
    devices.sort_by(|a, b| a.path.cmp(&b.path));
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_matches_kernel_struct() {
        // timeval (two longs) + type + code + value
        assert_eq!(RECORD_SIZE, 2 * std::mem::size_of::<libc::c_long>() + 8);
    }

    #[test]
    fn decode_reads_type_code_value() {
        let ev = RawEvent { kind: EV_KEY, code: 30, value: 2 };
        let decoded = RawEvent::decode(&ev.encode());
        assert_eq!(decoded, ev);
        assert!(decoded.is_key());
    }

    #[test]
    fn sync_records_are_not_keys() {
        let ev = RawEvent { kind: 0, code: 0, value: 0 };
        assert!(!ev.is_key());
        assert_eq!(EV_KEY, 1);
    }
}
