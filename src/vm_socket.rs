//! The VM-facing datagram socket: adoption of a pre-connected descriptor
//! (fd mode) or creation, bind, and client handshake (path mode), plus the
//! batched sendmsg_x/recvmsg_x fast path with a single-datagram fallback.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixDatagram;

use crate::error::{DaemonError, Result};
use crate::reactor::{Reactor, ReadableOutcome};

/// Client datagrams shorter than this are a known benign handshake blob
/// some clients send first; the NIC would reject them as malformed frames.
const SHORT_FRAME_THRESHOLD: usize = 64;

/// Send buffer only needs to hold one datagram; the receive buffer is kept
/// much larger so a bursty VM doesn't stall the kernel's own queuing.
const SEND_BUFFER_BYTES: i32 = 1 << 20;
const RECV_BUFFER_BYTES: i32 = SEND_BUFFER_BYTES * 4;

pub struct VmSocket {
    inner: UnixDatagram,
    has_bulk_forwarding: bool,
}

impl VmSocket {
    /// Adopts an already-connected descriptor passed by a launcher. No
    /// bind or connect is performed.
    pub fn adopt_fd(fd: RawFd, has_bulk_forwarding: bool) -> Result<Self> {
        let inner = unsafe { UnixDatagram::from_raw_fd(fd) };
        set_buffer_sizes(&inner);
        Ok(VmSocket {
            inner,
            has_bulk_forwarding,
        })
    }

    /// Creates, binds, and chmods a socket at `path`, waits for the first
    /// client datagram, connects to the sender, and discards that datagram
    /// if it looks like the short handshake blob rather than a real frame.
    pub fn bind_path(path: &str, reactor: &Reactor, has_bulk_forwarding: bool) -> Result<Self> {
        let inner = UnixDatagram::bind(path).map_err(|source| DaemonError::SocketBind {
            path: path.to_string(),
            source,
        })?;
        std::fs::set_permissions(path, std::os::unix::fs::PermissionsExt::from_mode(0o600))
            .map_err(DaemonError::Io)?;

        match reactor.wait_for_readable(inner.as_raw_fd())? {
            ReadableOutcome::ShutdownRequested => {
                return Err(DaemonError::SocketBind {
                    path: path.to_string(),
                    source: io::Error::new(io::ErrorKind::Interrupted, "shutdown requested"),
                });
            }
            ReadableOutcome::Readable => {}
        }

        let (peeked_len, peer_path) = peek_sender(&inner).map_err(|e| DaemonError::SocketBind {
            path: path.to_string(),
            source: e,
        })?;
        inner.connect(&peer_path).map_err(DaemonError::Io)?;

        if peeked_len < SHORT_FRAME_THRESHOLD {
            let mut discard = [0u8; SHORT_FRAME_THRESHOLD];
            inner.recv(&mut discard).map_err(DaemonError::Io)?;
            tracing::debug!(len = peeked_len, "discarded short handshake datagram");
        }

        set_buffer_sizes(&inner);
        Ok(VmSocket {
            inner,
            has_bulk_forwarding,
        })
    }

    pub fn has_bulk_forwarding(&self) -> bool {
        self.has_bulk_forwarding
    }

    /// Wraps an already-connected pair endpoint for tests elsewhere in the
    /// crate that need a real `VmSocket` without going through `bind_path`.
    #[cfg(test)]
    pub(crate) fn from_connected_for_test(inner: UnixDatagram) -> Self {
        VmSocket {
            inner,
            has_bulk_forwarding: false,
        }
    }

    /// Single-datagram read. `Ok(0)` means the peer closed its end.
    pub fn read_single(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.recv(buf)
    }

    /// Single-datagram write. Datagram sockets either fully transmit or
    /// fail; a short write here indicates a kernel contract violation.
    pub fn write_single(&self, buf: &[u8]) -> io::Result<()> {
        let n = self.inner.send(buf)?;
        assert_eq!(n, buf.len(), "partial write on datagram socket");
        Ok(())
    }
}

/// Peeks the first datagram without consuming it, returning its length and
/// the sender's socket path. `std::os::unix::net::UnixDatagram::peek_from`
/// is not yet stable, so this goes through `nix`'s `recvmsg` directly.
fn peek_sender(sock: &UnixDatagram) -> io::Result<(usize, std::path::PathBuf)> {
    use nix::sys::socket::{recvmsg, MsgFlags, UnixAddr};
    use std::io::IoSliceMut;

    let mut buf = [0u8; SHORT_FRAME_THRESHOLD];
    let mut iov = [IoSliceMut::new(&mut buf)];
    let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(sock.as_raw_fd()) };
    let msg = recvmsg::<UnixAddr>(borrowed.as_raw_fd(), &mut iov, None, MsgFlags::MSG_PEEK)
        .map_err(io::Error::from)?;

    let peer_path = msg
        .address
        .as_ref()
        .and_then(UnixAddr::path)
        .map(|p| p.to_path_buf())
        .ok_or_else(|| io::Error::other("client address is unnamed"))?;

    Ok((msg.bytes, peer_path))
}

fn set_buffer_sizes(sock: &UnixDatagram) {
    use nix::sys::socket::{setsockopt, sockopt};
    let fd = sock.as_raw_fd();
    let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
    if let Err(e) = setsockopt(&borrowed, sockopt::SndBuf, &(SEND_BUFFER_BYTES as usize)) {
        tracing::warn!(error = %e, "failed to set SO_SNDBUF");
    }
    if let Err(e) = setsockopt(&borrowed, sockopt::RcvBuf, &(RECV_BUFFER_BYTES as usize)) {
        tracing::warn!(error = %e, "failed to set SO_RCVBUF");
    }
}

/// `kern.osproductversion` major version `> 13` gates availability of the
/// batched `sendmsg_x`/`recvmsg_x` syscalls; below that, only single-frame
/// I/O is supported.
#[cfg(target_os = "macos")]
pub fn has_bulk_forwarding() -> bool {
    match os_major_version() {
        Some(major) if major > 13 => true,
        Some(major) => {
            tracing::info!(major, "OS version predates bulk forwarding support");
            false
        }
        None => false,
    }
}

#[cfg(not(target_os = "macos"))]
pub fn has_bulk_forwarding() -> bool {
    false
}

#[cfg(target_os = "macos")]
fn os_major_version() -> Option<u32> {
    let mut buf = [0u8; 32];
    let mut len = buf.len();
    let name = c"kern.osproductversion";
    let rc = unsafe {
        ffi::sysctlbyname(
            name.as_ptr(),
            buf.as_mut_ptr().cast(),
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc != 0 {
        return None;
    }
    let s = std::str::from_utf8(&buf[..len]).ok()?;
    s.trim_end_matches('\0').split('.').next()?.parse().ok()
}

/// Batched socket I/O: private libSystem symbols not exposed by `libc`,
/// declared here to match `socket_x.h`.
#[cfg(target_os = "macos")]
pub mod ffi {
    use libc::{c_int, c_uint, msghdr, size_t, ssize_t};

    #[repr(C)]
    pub struct MsghdrX {
        pub msg_hdr: msghdr,
        pub msg_len: size_t,
    }

    unsafe extern "C" {
        pub fn sendmsg_x(s: c_int, msgp: *const MsghdrX, cnt: c_uint, flags: c_int) -> ssize_t;
        pub fn recvmsg_x(s: c_int, msgp: *const MsghdrX, cnt: c_uint, flags: c_int) -> ssize_t;
        pub fn sysctlbyname(
            name: *const std::ffi::c_char,
            oldp: *mut std::ffi::c_void,
            oldlenp: *mut size_t,
            newp: *mut std::ffi::c_void,
            newlen: size_t,
        ) -> c_int;
    }
}

#[cfg(target_os = "macos")]
impl VmSocket {
    /// One `sendmsg_x` call sending each of `bufs` as an independent
    /// datagram. Returns the number of datagrams the kernel accepted; a
    /// short count means the caller should retry the unsent tail.
    pub fn write_batch_fast(&self, bufs: &[&[u8]]) -> io::Result<usize> {
        use libc::iovec;

        let mut iovecs: Vec<iovec> = bufs
            .iter()
            .map(|b| iovec {
                iov_base: b.as_ptr() as *mut _,
                iov_len: b.len(),
            })
            .collect();
        let mut msgs: Vec<ffi::MsghdrX> = iovecs
            .iter_mut()
            .map(|iov| ffi::MsghdrX {
                msg_hdr: empty_msghdr(iov),
                msg_len: 0,
            })
            .collect();

        let rc = unsafe {
            ffi::sendmsg_x(
                self.inner.as_raw_fd(),
                msgs.as_ptr(),
                msgs.len() as libc::c_uint,
                0,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rc as usize)
    }

    /// One `recvmsg_x` call reading up to `bufs.len()` datagrams, recording
    /// each datagram's length in the matching slot of `lengths_out`.
    pub fn read_batch_fast(
        &self,
        bufs: &mut [&mut [u8]],
        lengths_out: &mut [usize],
    ) -> io::Result<usize> {
        use libc::iovec;

        let mut iovecs: Vec<iovec> = bufs
            .iter_mut()
            .map(|b| iovec {
                iov_base: b.as_mut_ptr() as *mut _,
                iov_len: b.len(),
            })
            .collect();
        let mut msgs: Vec<ffi::MsghdrX> = iovecs
            .iter_mut()
            .map(|iov| ffi::MsghdrX {
                msg_hdr: empty_msghdr(iov),
                msg_len: 0,
            })
            .collect();

        let rc = unsafe {
            ffi::recvmsg_x(
                self.inner.as_raw_fd(),
                msgs.as_ptr(),
                msgs.len() as libc::c_uint,
                0,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        let count = rc as usize;
        for (len_out, msg) in lengths_out.iter_mut().zip(msgs.iter()).take(count) {
            *len_out = msg.msg_len;
        }
        Ok(count)
    }
}

#[cfg(target_os = "macos")]
fn empty_msghdr(iov: &mut libc::iovec) -> libc::msghdr {
    libc::msghdr {
        msg_name: std::ptr::null_mut(),
        msg_namelen: 0,
        msg_iov: iov as *mut libc::iovec,
        msg_iovlen: 1,
        msg_control: std::ptr::null_mut(),
        msg_controllen: 0,
        msg_flags: 0,
    }
}

#[cfg(not(target_os = "macos"))]
impl VmSocket {
    pub fn write_batch_fast(&self, _bufs: &[&[u8]]) -> io::Result<usize> {
        unreachable!("has_bulk_forwarding() is always false off macOS")
    }

    pub fn read_batch_fast(
        &self,
        _bufs: &mut [&mut [u8]],
        _lengths_out: &mut [usize],
    ) -> io::Result<usize> {
        unreachable!("has_bulk_forwarding() is always false off macOS")
    }
}
