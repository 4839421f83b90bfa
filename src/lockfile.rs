//! Advisory exclusive lock on `<socket-path>.lock`, held for the process
//! lifetime.
//!
//! The lock is acquired non-blocking so a second daemon on the same socket
//! path fails fast instead of queuing behind the first. The underlying file
//! descriptor is deliberately leaked (never closed) rather than dropped, so
//! the kernel only releases the lock when the process itself dies — a
//! crashed daemon's lockfile is reclaimable by the next launch without any
//! cleanup step.

use std::fs::{File, OpenOptions};

use nix::fcntl::{Flock, FlockArg};

use crate::error::{DaemonError, Result};

#[derive(Debug)]
pub struct Lockfile {
    path: String,
}

impl Lockfile {
    /// Creates (or opens) `<socket_path>.lock` and takes a non-blocking
    /// exclusive flock on it. Fails with [`DaemonError::LockfileBusy`] if
    /// another process already holds it.
    pub fn acquire(socket_path: &str) -> Result<Self> {
        let path = format!("{socket_path}.lock");
        let file: File = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(DaemonError::Io)?;

        let flock = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_file, errno)| {
            if errno == nix::errno::Errno::EWOULDBLOCK {
                DaemonError::LockfileBusy { path: path.clone() }
            } else {
                DaemonError::Io(errno.into())
            }
        })?;

        // The lock must outlive this function's stack frame and every
        // subsequent scope up to process exit; an explicit unlock/close is
        // never wanted, so the guard is forgotten rather than dropped.
        std::mem::forget(flock);

        Ok(Lockfile { path })
    }

    /// Removes the lockfile. Tolerates the file already being gone.
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DaemonError::Io(e)),
        }
    }
}
