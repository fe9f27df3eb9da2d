//! Kernel uevent netlink socket.
//!
//! One non-blocking `NETLINK_KOBJECT_UEVENT` datagram socket, member of
//! multicast group 1, with a forced 8 MiB receive buffer so a coldboot
//! replay cannot overrun it. Only datagrams from the kernel itself (port
//! id 0, sent to a multicast group) are accepted; anything a userspace
//! process injects is dropped.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use nix::errno::Errno;
use nix::sys::socket::{
    bind, recvfrom, setsockopt, socket, sockopt, AddressFamily, NetlinkAddr, SockFlag,
    SockProtocol, SockType,
};
use thiserror::Error;
use tracing::{debug, trace};

use devd_core::uevent::UEVENT_MSG_MAX;

/// Kernel-side receive buffer reservation. udev uses twice this.
pub const UEVENT_RCVBUF: usize = 8 * 1024 * 1024;

/// Uevent socket failure.
#[derive(Debug, Error)]
pub enum NetlinkError {
    /// Socket creation failed.
    #[error("cannot create uevent socket: {0}")]
    Open(#[source] Errno),
    /// The receive buffer could not be sized.
    #[error("cannot size uevent receive buffer: {0}")]
    Rcvbuf(#[source] Errno),
    /// Binding to the uevent multicast group failed.
    #[error("cannot bind uevent socket: {0}")]
    Bind(#[source] Errno),
    /// A receive failed with something other than "no data".
    #[error("uevent receive failed: {0}")]
    Recv(#[source] Errno),
}

/// Bound kernel uevent listener.
#[derive(Debug)]
pub struct UeventSocket {
    fd: OwnedFd,
}

impl UeventSocket {
    /// Opens, sizes and binds the socket.
    ///
    /// # Errors
    ///
    /// Any of the [`NetlinkError`] variants; binding needs
    /// `CAP_NET_ADMIN`.
    pub fn open(rcvbuf: usize) -> Result<Self, NetlinkError> {
        let fd = socket(
            AddressFamily::Netlink,
            SockType::Datagram,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
            SockProtocol::NetlinkKObjectUEvent,
        )
        .map_err(NetlinkError::Open)?;

        // Forcing past rmem_max needs privilege; fall back to the capped
        // variant when we do not have it.
        if setsockopt(&fd, sockopt::RcvBufForce, &rcvbuf).is_err() {
            setsockopt(&fd, sockopt::RcvBuf, &rcvbuf).map_err(NetlinkError::Rcvbuf)?;
        }

        let addr = NetlinkAddr::new(0, 1);
        bind(fd.as_raw_fd(), &addr).map_err(NetlinkError::Bind)?;

        Ok(Self { fd })
    }

    /// Receives the next acceptable datagram into `buf`.
    ///
    /// Returns `Ok(None)` once the socket is drained. Datagrams from
    /// userspace senders and datagrams that filled the whole buffer
    /// (truncated by the kernel) are discarded.
    ///
    /// # Errors
    ///
    /// [`NetlinkError::Recv`] on unexpected receive failures.
    pub fn recv_uevent(&self, buf: &mut [u8]) -> Result<Option<usize>, NetlinkError> {
        debug_assert!(buf.len() >= UEVENT_MSG_MAX);
        loop {
            match recvfrom::<NetlinkAddr>(self.fd.as_raw_fd(), buf) {
                Ok((n, addr)) => {
                    let Some(addr) = addr else { continue };
                    if addr.pid() != 0 || addr.groups() == 0 {
                        debug!(pid = addr.pid(), "ignoring uevent from userspace sender");
                        continue;
                    }
                    if n >= UEVENT_MSG_MAX {
                        trace!(len = n, "oversized uevent discarded");
                        continue;
                    }
                    return Ok(Some(n));
                }
                Err(Errno::EAGAIN) => return Ok(None),
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(NetlinkError::Recv(err)),
            }
        }
    }
}

impl AsFd for UeventSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
