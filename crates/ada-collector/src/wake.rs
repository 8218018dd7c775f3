//! Self-pipe wake channel for the drain loop.
//!
//! The writing end is async-signal safe: waking is one `write(2)` of one
//! byte to a non-blocking pipe, nothing else. The drain parks in `poll(2)`
//! on the reading end with its backoff-chosen timeout, so a wake interrupts
//! an idle sleep immediately.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sending half. Cloneable; safe to use from a signal handler.
#[derive(Clone)]
pub struct WakeHandle {
    write_fd: RawFd,
    closed: Arc<AtomicBool>,
}

impl WakeHandle {
    /// Writes the wake byte. Errors (full pipe, closed peer) are ignored;
    /// a full pipe already means the receiver has a pending wake.
    pub fn wake(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let byte = [1u8];
        // SAFETY: write on a valid fd with a valid one-byte buffer. This is
        // on the async-signal-safe list.
        unsafe {
            libc::write(self.write_fd, byte.as_ptr().cast(), 1);
        }
    }
}

/// Receiving half, owned by the drain thread.
pub struct WakeReceiver {
    read_fd: RawFd,
    write_fd: RawFd,
    closed: Arc<AtomicBool>,
}

impl WakeReceiver {
    /// Creates the pipe pair.
    pub fn new() -> io::Result<(WakeHandle, WakeReceiver)> {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: fds is a valid two-element out array.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        for fd in fds {
            // SAFETY: fd was just returned by pipe.
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
        }
        let closed = Arc::new(AtomicBool::new(false));
        Ok((
            WakeHandle {
                write_fd: fds[1],
                closed: Arc::clone(&closed),
            },
            WakeReceiver {
                read_fd: fds[0],
                write_fd: fds[1],
                closed,
            },
        ))
    }

    /// Parks for up to `timeout` or until a wake byte arrives. Returns
    /// `true` if woken. Pending wake bytes are drained either way.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut pfd = libc::pollfd {
            fd: self.read_fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        // SAFETY: pfd is a valid pollfd for one fd.
        let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        let woken = ready > 0 && (pfd.revents & libc::POLLIN) != 0;
        if woken {
            self.drain_bytes();
        }
        woken
    }

    fn drain_bytes(&self) {
        let mut buf = [0u8; 64];
        loop {
            // SAFETY: valid fd and buffer; the fd is non-blocking so this
            // never parks.
            let n = unsafe { libc::read(self.read_fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n <= 0 {
                break;
            }
        }
    }
}

impl Drop for WakeReceiver {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        // SAFETY: fds are owned by this pair and closed exactly once.
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

// SAFETY: raw fds are just integers; the closed flag synchronizes shutdown.
unsafe impl Send for WakeHandle {}
unsafe impl Sync for WakeHandle {}
unsafe impl Send for WakeReceiver {}
