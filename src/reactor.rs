//! Event reactor: signal delivery and the user-triggered shutdown event.
//!
//! Signals are blocked process-wide and observed only here — on macOS via a
//! dedicated kqueue watching `EVFILT_SIGNAL`, matching the framework's own
//! concurrency model; elsewhere (the portable build used by the test
//! harness and by `cargo check` on non-macOS hosts) via `signal-hook`. Both
//! backends funnel into the same channel the forwarding loops post to, so
//! [`Reactor::wait_for_shutdown`] is a single, OS-independent join point.

use std::os::unix::io::RawFd;

use crossbeam_channel::{Receiver, Sender};

use crate::error::{DaemonError, Result};

/// What caused forwarding to stop.
#[derive(Debug, Clone, Copy)]
pub enum ShutdownCause {
    Signal(i32),
    HostLoopError,
    VmLoopStopped,
    VmLoopError,
    ReactorError,
}

impl ShutdownCause {
    /// Maps onto the two-bit shutdown-flags field: `STOPPED` alone or zero
    /// is a clean exit, any `FAILURE` is not.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ShutdownCause::HostLoopError | ShutdownCause::VmLoopError | ShutdownCause::ReactorError
        )
    }
}

/// A cloneable handle the forwarding loops use to report terminal
/// conditions without holding a reference to the reactor itself.
#[derive(Clone)]
pub struct ShutdownPoster(Sender<ShutdownCause>);

impl ShutdownPoster {
    pub fn post(&self, cause: ShutdownCause) {
        // The channel is unbounded and the reactor only ever reads the
        // first cause, so a full or disconnected channel is not an error.
        let _ = self.0.try_send(cause);
    }
}

pub struct Reactor {
    shutdown_tx: Sender<ShutdownCause>,
    shutdown_rx: Receiver<ShutdownCause>,
    _signal_thread: SignalThread,
}

impl Reactor {
    /// Blocks SIGTERM/SIGINT at the process level, ignores SIGPIPE, and
    /// starts the backend that turns signal delivery into
    /// [`ShutdownCause::Signal`] posts.
    pub fn new() -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::unbounded();
        let signal_thread = SignalThread::spawn(shutdown_tx.clone())?;
        Ok(Reactor {
            shutdown_tx,
            shutdown_rx,
            _signal_thread: signal_thread,
        })
    }

    pub fn poster(&self) -> ShutdownPoster {
        ShutdownPoster(self.shutdown_tx.clone())
    }

    /// Blocks until a signal arrives or a forwarding loop posts a cause.
    pub fn wait_for_shutdown(&self) -> ShutdownCause {
        self.shutdown_rx
            .recv()
            .unwrap_or(ShutdownCause::ReactorError)
    }

    /// Blocks until `fd` is readable, or a shutdown cause preempts it (in
    /// which case the caller should abandon the attach and proceed straight
    /// to teardown). Used only during `SOCKET_ATTACHED` in path mode.
    pub fn wait_for_readable(&self, fd: RawFd) -> Result<ReadableOutcome> {
        use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

        loop {
            if !self.shutdown_rx.is_empty() {
                return Ok(ReadableOutcome::ShutdownRequested);
            }
            let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
            let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
            // Wake periodically to notice a shutdown cause posted between
            // the emptiness check above and entering poll().
            match poll(&mut fds, PollTimeout::from(100u16)) {
                Ok(0) => continue,
                Ok(_) => return Ok(ReadableOutcome::Readable),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(DaemonError::Reactor(e.to_string())),
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReadableOutcome {
    Readable,
    ShutdownRequested,
}

#[cfg(target_os = "macos")]
struct SignalThread {
    handle: Option<std::thread::JoinHandle<()>>,
}

#[cfg(target_os = "macos")]
impl SignalThread {
    fn spawn(tx: Sender<ShutdownCause>) -> Result<Self> {
        use nix::sys::event::{EvFlags, EventFilter, FilterFlag, KEvent, Kqueue};
        use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

        let mut mask = SigSet::empty();
        mask.add(Signal::SIGTERM);
        mask.add(Signal::SIGINT);
        signal::sigprocmask(signal::SigmaskHow::SIG_BLOCK, Some(&mask), None)
            .map_err(|e| DaemonError::Reactor(e.to_string()))?;

        unsafe {
            signal::sigaction(
                Signal::SIGPIPE,
                &SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty()),
            )
            .map_err(|e| DaemonError::Reactor(e.to_string()))?;
        }

        let kq = Kqueue::new().map_err(|e| DaemonError::Reactor(e.to_string()))?;
        let changes = [
            KEvent::new(
                Signal::SIGTERM as usize,
                EventFilter::EVFILT_SIGNAL,
                EvFlags::EV_ADD,
                FilterFlag::empty(),
                0,
                0,
            ),
            KEvent::new(
                Signal::SIGINT as usize,
                EventFilter::EVFILT_SIGNAL,
                EvFlags::EV_ADD,
                FilterFlag::empty(),
                0,
                0,
            ),
        ];
        kq.kevent(&changes, &mut [], None)
            .map_err(|e| DaemonError::Reactor(e.to_string()))?;

        let handle = std::thread::Builder::new()
            .name("reactor".into())
            .spawn(move || loop {
                let mut events = [KEvent::new(
                    0,
                    EventFilter::EVFILT_SIGNAL,
                    EvFlags::empty(),
                    FilterFlag::empty(),
                    0,
                    0,
                )];
                match kq.kevent(&[], &mut events, None) {
                    Ok(0) => continue,
                    Ok(_) => {
                        let signum = events[0].ident() as i32;
                        tx.send(ShutdownCause::Signal(signum)).ok();
                        return;
                    }
                    Err(_) => return,
                }
            })
            .map_err(|e| DaemonError::Reactor(e.to_string()))?;

        Ok(SignalThread {
            handle: Some(handle),
        })
    }
}

#[cfg(target_os = "macos")]
impl Drop for SignalThread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(not(target_os = "macos"))]
struct SignalThread {
    handle: Option<std::thread::JoinHandle<()>>,
    signals_handle: signal_hook::iterator::Handle,
}

#[cfg(not(target_os = "macos"))]
impl SignalThread {
    fn spawn(tx: Sender<ShutdownCause>) -> Result<Self> {
        use signal_hook::consts::signal::{SIGINT, SIGPIPE, SIGTERM};
        use signal_hook::iterator::Signals;

        unsafe {
            signal_hook::low_level::register(SIGPIPE, || {}).ok();
        }

        let mut signals =
            Signals::new([SIGTERM, SIGINT]).map_err(|e| DaemonError::Reactor(e.to_string()))?;
        let signals_handle = signals.handle();
        let join = std::thread::Builder::new()
            .name("reactor".into())
            .spawn(move || {
                if let Some(signum) = (&mut signals).into_iter().next() {
                    tx.send(ShutdownCause::Signal(signum)).ok();
                }
            })
            .map_err(|e| DaemonError::Reactor(e.to_string()))?;

        Ok(SignalThread {
            handle: Some(join),
            signals_handle,
        })
    }
}

#[cfg(not(target_os = "macos"))]
impl Drop for SignalThread {
    fn drop(&mut self) {
        self.signals_handle.close();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_causes_are_classified() {
        assert!(ShutdownCause::HostLoopError.is_failure());
        assert!(ShutdownCause::VmLoopError.is_failure());
        assert!(ShutdownCause::ReactorError.is_failure());
        assert!(!ShutdownCause::VmLoopStopped.is_failure());
        assert!(!ShutdownCause::Signal(15).is_failure());
    }

    #[test]
    fn forwarding_loop_can_post_and_reactor_observes_it() {
        let reactor = Reactor::new().unwrap();
        let poster = reactor.poster();
        poster.post(ShutdownCause::VmLoopStopped);
        assert!(!reactor.wait_for_shutdown().is_failure());
    }
}
