//! Background watcher multiplexing any number of evdev devices.
//!
//! One thread per session blocks in `epoll_wait` on every opened device plus
//! a cancellation eventfd. Key records are decoded and handed to a
//! [`WatchHandler`] on that thread. Problems with individual devices never
//! stop the loop; only the cancellation signal does.

use crate::evdev_util::{RawEvent, RECORD_SIZE};
use crate::key_state::KeyState;
use crate::poll::{Epoll, EventFd, Readiness};
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Epoll token of the cancellation eventfd. Devices use their index.
const CANCEL_TOKEN: u64 = u64::MAX;

/// Maximum readiness events handled per wakeup.
const MAX_EVENTS: usize = 16;

/// Pause before retrying after `epoll_wait` fails.
const WAIT_RETRY: Duration = Duration::from_millis(100);

/// Receives decoded key transitions and non-fatal errors.
///
/// Both methods run on the watcher thread and block its loop while they run,
/// so they should return quickly.
pub trait WatchHandler: Send + 'static {
    fn key_state(&self, code: u16, state: KeyState);

    /// Non-fatal problem with a single device. Ignored unless overridden.
    fn error(&self, err: WatchError) {
        let _ = err;
    }
}

/// Failure to start a session. Nothing is left running.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("could not create cancellation eventfd: {0}")]
    Cancel(#[source] io::Error),
    #[error("could not create epoll instance: {0}")]
    Epoll(#[source] io::Error),
    #[error("could not add cancellation eventfd to epoll: {0}")]
    RegisterCancel(#[source] io::Error),
    #[error("could not start watcher thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Non-fatal error reported while the session runs.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("open device '{}': {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("open device '{}': add to epoll: {source}", path.display())]
    Register { path: PathBuf, source: io::Error },
    #[error("device '{}' hung up, removed from epoll", path.display())]
    Hangup { path: PathBuf },
    #[error("device '{}' reported an error condition, removed from epoll", path.display())]
    Fault { path: PathBuf },
    #[error("remove device '{}' from epoll: {source}", path.display())]
    Deregister { path: PathBuf, source: io::Error },
    #[error("device '{}': unknown readiness event", path.display())]
    UnknownEvent { path: PathBuf },
    #[error("read event from '{}': {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("read event from '{}': wrong size: wanted {wanted}, got {got}", path.display())]
    ShortRead { path: PathBuf, wanted: usize, got: usize },
    #[error("device '{}': key {code} has unknown value {value}", path.display())]
    UnknownValue { path: PathBuf, code: u16, value: i32 },
    #[error("wait for epoll event: {0}")]
    Wait(#[source] io::Error),
}

/// A running watcher. Stopping (or dropping) it closes every device it opened.
#[derive(Debug)]
pub struct WatchSession {
    cancel: Arc<EventFd>,
    thread: Option<JoinHandle<()>>,
}

impl WatchSession {
    /// Start watching `paths`.
    ///
    /// Devices that cannot be opened are reported through `handler` and
    /// skipped; they do not fail the call.
    pub fn start<H: WatchHandler>(paths: Vec<PathBuf>, handler: H) -> Result<Self, StartError> {
        let cancel = Arc::new(EventFd::new().map_err(StartError::Cancel)?);
        let epoll = Epoll::new().map_err(StartError::Epoll)?;
        epoll
            .add(cancel.as_raw_fd(), CANCEL_TOKEN)
            .map_err(StartError::RegisterCancel)?;

        let watch = Watch {
            epoll,
            cancel: Arc::clone(&cancel),
            devices: paths.into_iter().map(|path| Slot { path, file: None }).collect(),
            handler,
        };
        let thread = std::thread::Builder::new()
            .name("kbdscr-watch".into())
            .spawn(move || watch.run())
            .map_err(StartError::Spawn)?;

        Ok(Self { cancel, thread: Some(thread) })
    }

    /// Whether the background thread is still alive.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal cancellation and wait for the thread to close everything.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if let Err(e) = self.cancel.signal() {
            warn!("could not signal watcher cancellation: {}", e);
        }
        if thread.join().is_err() {
            warn!("watcher thread panicked");
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Consecutive `epoll_wait` failures. Only the first of a run is reported.
#[derive(Debug, Default)]
struct WaitFailures {
    run: u32,
}

impl WaitFailures {
    /// Count a failure, returning whether it starts a new run.
    fn record(&mut self) -> bool {
        self.run = self.run.saturating_add(1);
        self.run == 1
    }

    fn clear(&mut self) {
        if self.run > 1 {
            debug!("epoll wait recovered after {} failures", self.run);
        }
        self.run = 0;
    }
}

struct Slot {
    path: PathBuf,
    file: Option<File>,
}

struct Watch<H> {
    epoll: Epoll,
    cancel: Arc<EventFd>,
    devices: Vec<Slot>,
    handler: H,
}

impl<H: WatchHandler> Watch<H> {
    fn run(mut self) {
        self.open_devices();
        debug!(
            "watching {} of {} devices",
            self.devices.iter().filter(|d| d.file.is_some()).count(),
            self.devices.len()
        );

        let mut ready = Vec::with_capacity(MAX_EVENTS);
        let mut failures = WaitFailures::default();
        loop {
            match self.epoll.wait(&mut ready, MAX_EVENTS) {
                Ok(()) => failures.clear(),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Keep retrying at a slow pace; cancellation still ends the loop.
                    if failures.record() {
                        self.handler.error(WatchError::Wait(e));
                    }
                    std::thread::sleep(WAIT_RETRY);
                    if self.cancel.is_signalled() {
                        break;
                    }
                    continue;
                }
            }
            if ready.iter().any(|r| r.token == CANCEL_TOKEN) {
                break;
            }
            for r in &ready {
                self.service(r);
            }
        }

        self.close();
    }

    fn open_devices(&mut self) {
        for (index, slot) in self.devices.iter_mut().enumerate() {
            let file = match OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
                .open(&slot.path)
            {
                Ok(file) => file,
                Err(source) => {
                    self.handler.error(WatchError::Open { path: slot.path.clone(), source });
                    continue;
                }
            };
            if let Err(source) = self.epoll.add(file.as_raw_fd(), index as u64) {
                self.handler.error(WatchError::Register { path: slot.path.clone(), source });
                continue;
            }
            slot.file = Some(file);
        }
    }

    fn service(&mut self, r: &Readiness) {
        // Errors always name the device registered under this token.
        let Some(slot) = self.devices.get_mut(r.token as usize) else {
            return;
        };
        let Some(file) = slot.file.as_ref() else {
            return;
        };
        let path = &slot.path;

        if r.hangup || r.error {
            let err = if r.hangup {
                WatchError::Hangup { path: path.clone() }
            } else {
                WatchError::Fault { path: path.clone() }
            };
            let removed = self.epoll.delete(file.as_raw_fd());
            self.handler.error(err);
            if let Err(source) = removed {
                self.handler.error(WatchError::Deregister { path: path.clone(), source });
            }
            slot.file = None;
            return;
        }
        if !r.readable {
            self.handler.error(WatchError::UnknownEvent { path: path.clone() });
            return;
        }

        let mut buf = [0u8; RECORD_SIZE];
        let mut reader: &File = file;
        match reader.read(&mut buf) {
            Ok(n) if n == RECORD_SIZE => {}
            Ok(got) => {
                self.handler.error(WatchError::ShortRead { path: path.clone(), wanted: RECORD_SIZE, got });
                return;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(source) => {
                self.handler.error(WatchError::Read { path: path.clone(), source });
                return;
            }
        }

        let event = RawEvent::decode(&buf);
        if !event.is_key() {
            return;
        }
        match KeyState::from_value(event.value) {
            Some(state) => self.handler.key_state(event.code, state),
            None => self.handler.error(WatchError::UnknownValue {
                path: path.clone(),
                code: event.code,
                value: event.value,
            }),
        }
    }

    fn close(self) {
        let Watch { epoll, devices, .. } = self;
        let open = devices.iter().filter(|d| d.file.is_some()).count();
        drop(devices);
        drop(epoll);
        debug!("watcher stopped, closed {} devices", open);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evdev_util::EV_KEY;
    use std::ffi::CString;
    use std::io::Write;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[derive(Debug)]
    enum Seen {
        Key(u16, KeyState),
        Error(WatchError),
    }

    struct ChannelHandler(Sender<Seen>);

    impl WatchHandler for ChannelHandler {
        fn key_state(&self, code: u16, state: KeyState) {
            let _ = self.0.send(Seen::Key(code, state));
        }

        fn error(&self, err: WatchError) {
            let _ = self.0.send(Seen::Error(err));
        }
    }

    fn channel() -> (ChannelHandler, Receiver<Seen>) {
        let (tx, rx) = mpsc::channel();
        (ChannelHandler(tx), rx)
    }

    fn make_fifo(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let c = CString::new(path.as_os_str().as_bytes()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(c.as_ptr(), 0o600) }, 0);
        path
    }

    /// Writer side of a FIFO standing in for an event device. Opening blocks
    /// until the watcher has opened the read side.
    struct FakeDevice {
        writer: Option<File>,
    }

    impl FakeDevice {
        fn connect(path: &Path) -> Self {
            let writer = OpenOptions::new().write(true).open(path).unwrap();
            Self { writer: Some(writer) }
        }

        fn write_raw(&mut self, bytes: &[u8]) {
            self.writer.as_mut().unwrap().write_all(bytes).unwrap();
        }

        fn emit(&mut self, kind: u16, code: u16, value: i32) {
            self.write_raw(&RawEvent { kind, code, value }.encode());
        }

        fn key(&mut self, code: u16, value: i32) {
            self.emit(EV_KEY, code, value);
        }

        fn hang_up(&mut self) {
            self.writer = None;
        }
    }

    fn next(rx: &Receiver<Seen>) -> Seen {
        rx.recv_timeout(TIMEOUT).expect("watcher produced nothing")
    }

    fn next_key(rx: &Receiver<Seen>) -> (u16, KeyState) {
        match next(rx) {
            Seen::Key(code, state) => (code, state),
            Seen::Error(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn press_release_sequence_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_fifo(dir.path(), "event0");
        let (handler, rx) = channel();
        let session = WatchSession::start(vec![path.clone()], handler).unwrap();
        let mut dev = FakeDevice::connect(&path);

        dev.key(30, 1);
        dev.key(30, 0);
        assert_eq!(next_key(&rx), (30, KeyState::Pressed));
        assert_eq!(next_key(&rx), (30, KeyState::Released));

        session.stop();
        assert!(rx.try_iter().next().is_none());
    }

    #[test]
    fn non_key_records_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_fifo(dir.path(), "event0");
        let (handler, rx) = channel();
        let session = WatchSession::start(vec![path.clone()], handler).unwrap();
        let mut dev = FakeDevice::connect(&path);

        dev.emit(0, 0, 0); // EV_SYN
        dev.emit(2, 0, -5); // EV_REL
        dev.key(272, 2);
        assert_eq!(next_key(&rx), (272, KeyState::Held));
        session.stop();
    }

    #[test]
    fn short_read_is_reported_and_device_keeps_working() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_fifo(dir.path(), "event0");
        let (handler, rx) = channel();
        let session = WatchSession::start(vec![path.clone()], handler).unwrap();
        let mut dev = FakeDevice::connect(&path);

        dev.write_raw(&[1, 2, 3, 4, 5]);
        match next(&rx) {
            Seen::Error(WatchError::ShortRead { path: p, wanted, got }) => {
                assert_eq!(p, path);
                assert_eq!(wanted, RECORD_SIZE);
                assert_eq!(got, 5);
            }
            other => panic!("expected short read, got {other:?}"),
        }

        dev.key(48, 1);
        assert_eq!(next_key(&rx), (48, KeyState::Pressed));
        session.stop();
    }

    #[test]
    fn unknown_value_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_fifo(dir.path(), "event0");
        let (handler, rx) = channel();
        let session = WatchSession::start(vec![path.clone()], handler).unwrap();
        let mut dev = FakeDevice::connect(&path);

        dev.key(30, 7);
        assert!(matches!(
            next(&rx),
            Seen::Error(WatchError::UnknownValue { code: 30, value: 7, .. })
        ));
        session.stop();
    }

    #[test]
    fn hangup_of_one_device_leaves_others_running() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..3).map(|i| make_fifo(dir.path(), &format!("event{i}"))).collect();
        let (handler, rx) = channel();
        let session = WatchSession::start(paths.clone(), handler).unwrap();
        let mut devs: Vec<FakeDevice> = paths.iter().map(|p| FakeDevice::connect(p)).collect();

        for (i, dev) in devs.iter_mut().enumerate() {
            dev.key(30 + i as u16, 1);
        }
        let mut keys: Vec<_> = (0..3).map(|_| next_key(&rx)).collect();
        keys.sort_by_key(|(code, _)| *code);
        assert_eq!(keys, vec![(30, KeyState::Pressed), (31, KeyState::Pressed), (32, KeyState::Pressed)]);

        devs[1].hang_up();
        match next(&rx) {
            Seen::Error(WatchError::Hangup { path }) => assert_eq!(path, paths[1]),
            other => panic!("expected hangup, got {other:?}"),
        }

        devs[0].key(30, 0);
        devs[2].key(32, 0);
        let mut keys: Vec<_> = (0..2).map(|_| next_key(&rx)).collect();
        keys.sort_by_key(|(code, _)| *code);
        assert_eq!(keys, vec![(30, KeyState::Released), (32, KeyState::Released)]);

        assert!(session.is_running());
        session.stop();
        assert!(rx.try_iter().all(|seen| matches!(seen, Seen::Key(..))));
    }

    #[test]
    fn failed_open_is_skipped_and_errors_name_the_right_device() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let path = make_fifo(dir.path(), "event1");
        let (handler, rx) = channel();
        let session = WatchSession::start(vec![missing.clone(), path.clone()], handler).unwrap();

        match next(&rx) {
            Seen::Error(WatchError::Open { path: p, source }) => {
                assert_eq!(p, missing);
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected open error, got {other:?}"),
        }

        let mut dev = FakeDevice::connect(&path);
        dev.key(2, 1);
        assert_eq!(next_key(&rx), (2, KeyState::Pressed));
        dev.hang_up();
        match next(&rx) {
            Seen::Error(err @ WatchError::Hangup { .. }) => {
                assert!(err.to_string().contains("event1"), "{err}");
            }
            other => panic!("expected hangup, got {other:?}"),
        }
        session.stop();
    }

    #[test]
    fn unpollable_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let regular = dir.path().join("plain");
        std::fs::write(&regular, b"").unwrap();
        let (handler, rx) = channel();
        let session = WatchSession::start(vec![regular.clone()], handler).unwrap();
        assert!(matches!(next(&rx), Seen::Error(WatchError::Register { path, .. }) if path == regular));
        session.stop();
    }

    #[test]
    fn stop_closes_devices_and_joins_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_fifo(dir.path(), "event0");
        let (tx, rx) = mpsc::channel();
        let handler = Arc::new(ChannelHandler(tx));

        struct Shared(Arc<ChannelHandler>);
        impl WatchHandler for Shared {
            fn key_state(&self, code: u16, state: KeyState) {
                self.0.key_state(code, state);
            }
        }

        let session = WatchSession::start(vec![path.clone()], Shared(Arc::clone(&handler))).unwrap();
        let mut dev = FakeDevice::connect(&path);
        dev.key(30, 1);
        assert_eq!(next_key(&rx), (30, KeyState::Pressed));
        assert!(session.is_running());

        session.stop();
        // The thread dropped its handler clone on exit.
        assert_eq!(Arc::strong_count(&handler), 1);

        // No reader is left on the FIFO once the watcher closed it.
        dev.hang_up();
        let err = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENXIO));
    }

    #[test]
    fn session_without_devices_stops_cleanly() {
        let (handler, rx) = channel();
        let session = WatchSession::start(Vec::new(), handler).unwrap();
        assert!(session.is_running());
        drop(session);
        assert!(rx.try_iter().next().is_none());
    }

    #[test]
    fn repeated_wait_failures_are_reported_once_per_run() {
        let mut failures = WaitFailures::default();
        assert!(failures.record());
        assert!(!failures.record());
        assert!(!failures.record());
        failures.clear();
        assert!(failures.record());
    }

    #[test]
    fn stop_joins_even_after_cancel_was_already_signalled() {
        let (handler, _rx) = channel();
        let session = WatchSession::start(Vec::new(), handler).unwrap();
        session.cancel.signal().unwrap();
        session.stop();
    }
}
