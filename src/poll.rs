//! Thin wrappers over epoll and eventfd.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Readiness flags reported for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: u64,
    pub readable: bool,
    pub error: bool,
    pub hangup: bool,
}

/// An epoll instance. Closed on drop.
#[derive(Debug)]
pub struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
    }

    /// Watch `fd` for input. Errors and hangups are always reported.
    pub fn add(&self, fd: RawFd, token: u64) -> io::Result<()> {
        let mut event = libc::epoll_event { events: libc::EPOLLIN as u32, u64: token };
        let ret = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let ret = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Block until at least one source is ready, filling `out`.
    pub fn wait(&self, out: &mut Vec<Readiness>, capacity: usize) -> io::Result<()> {
        out.clear();
        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)];
        let n = unsafe {
            libc::epoll_wait(self.fd.as_raw_fd(), events.as_mut_ptr(), events.len() as libc::c_int, -1)
        };
        if n == -1 {
            return Err(io::Error::last_os_error());
        }
        for event in &events[..n as usize] {
            let flags = event.events;
            out.push(Readiness {
                token: event.u64,
                readable: flags & libc::EPOLLIN as u32 != 0,
                error: flags & libc::EPOLLERR as u32 != 0,
                hangup: flags & libc::EPOLLHUP as u32 != 0,
            });
        }
        Ok(())
    }
}

/// Counter-backed wakeup source, used as a cancellation signal.
///
/// The counter is never read, so once signalled it stays readable.
#[derive(Debug)]
pub struct EventFd {
    fd: OwnedFd,
}

impl EventFd {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
    }

    /// Make the eventfd readable. Safe to call from any thread.
    pub fn signal(&self) -> io::Result<()> {
        let one: u64 = 1;
        loop {
            let n = unsafe {
                libc::write(self.fd.as_raw_fd(), &one as *const u64 as *const libc::c_void, std::mem::size_of::<u64>())
            };
            if n == std::mem::size_of::<u64>() as isize {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                // Counter saturated: it is already readable.
                io::ErrorKind::WouldBlock => return Ok(()),
                _ => return Err(err),
            }
        }
    }

    /// Whether `signal` has been called, without blocking.
    pub fn is_signalled(&self) -> bool {
        let mut pfd = libc::pollfd { fd: self.fd.as_raw_fd(), events: libc::POLLIN, revents: 0 };
        let n = unsafe { libc::poll(&mut pfd, 1, 0) };
        n > 0 && pfd.revents & libc::POLLIN != 0
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
