//! Network interface adapter: the two packet sockets, interface discovery
//! and the promiscuous-mode toggle.
//!
//! Frames go out on an `AF_PACKET/SOCK_RAW` socket carrying the full
//! Ethernet header built by [crate::udp::build_udp_packet]. Replies come in
//! on a non-blocking `AF_PACKET/SOCK_DGRAM` socket, so the kernel strips
//! the link header and [crate::udp::extract_dhcp_payload] sees IPv4 first.

use crate::{DhcpError, ErrorKind, MacAddr};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use std::io;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Packet type for outgoing broadcast frames, from linux/if_packet.h.
const PACKET_BROADCAST: libc::c_uchar = 1;

/// Handle on the capture interface. Dropping it restores the promiscuous
/// flag (if this process set it) and closes both sockets.
#[derive(Debug)]
pub struct Interface {
    name: String,
    index: libc::c_int,
    hwaddr: MacAddr,
    send_fd: OwnedFd,
    recv_fd: OwnedFd,
    promisc_set: bool,
}

impl Interface {
    /// Open both sockets on `name`, read its index and hardware address,
    /// and optionally flip it into promiscuous mode.
    pub fn open(name: &str, promisc: bool) -> Result<Self, DhcpError> {
        let send_fd = packet_socket(libc::SOCK_RAW)?;
        let recv_fd = packet_socket(libc::SOCK_DGRAM)?;
        set_nonblocking(recv_fd.as_raw_fd())?;

        let index = query_index(send_fd.as_raw_fd(), name)?;
        let hwaddr = query_hwaddr(send_fd.as_raw_fd(), name)?;

        let promisc_set = if promisc {
            set_promisc_mode(recv_fd.as_raw_fd(), name, true)?
        } else {
            false
        };

        Ok(Interface {
            name: name.to_owned(),
            index,
            hwaddr,
            send_fd,
            recv_fd,
            promisc_set,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> libc::c_int {
        self.index
    }

    /// The interface's own hardware address, used as the frame source
    pub fn hwaddr(&self) -> MacAddr {
        self.hwaddr
    }

    /// Broadcast a fully-formed Ethernet frame out of the send socket.
    pub fn send_frame(&self, frame: &[u8]) -> Result<(), DhcpError> {
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = (libc::ETH_P_IP as u16).to_be();
        addr.sll_ifindex = self.index;
        addr.sll_hatype = libc::ARPHRD_ETHER;
        addr.sll_pkttype = PACKET_BROADCAST;
        addr.sll_halen = 6;
        addr.sll_addr[..6].copy_from_slice(&MacAddr::BROADCAST.0);

        let sent = unsafe {
            libc::sendto(
                self.send_fd.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if sent <= 0 {
            return Err(DhcpError::new(
                ErrorKind::Socket,
                format!("can not send DHCP packet: {}", io::Error::last_os_error()),
            ));
        }
        Ok(())
    }

    /// Pull one datagram off the capture socket. `Ok(None)` when nothing
    /// is queued.
    pub fn recv_into(&self, buffer: &mut [u8]) -> Result<Option<usize>, DhcpError> {
        let n = unsafe {
            libc::read(
                self.recv_fd.as_raw_fd(),
                buffer.as_mut_ptr() as *mut libc::c_void,
                buffer.len(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(DhcpError::new(
                ErrorKind::Socket,
                format!("error while reading capture socket: {err}"),
            ));
        }
        Ok(Some(n as usize))
    }

    /// Wait up to `timeout` for the capture socket to become readable.
    /// `Ok(false)` on timeout or interruption by a signal.
    pub fn wait_readable(&self, timeout: Duration) -> Result<bool, DhcpError> {
        let mut fds = [PollFd::new(self.recv_fd.as_fd(), PollFlags::POLLIN)];
        let millis = timeout.as_millis().clamp(1, u128::from(u16::MAX)) as u16;
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(n) => Ok(n > 0),
            Err(nix::errno::Errno::EINTR) => Ok(false),
            Err(e) => Err(DhcpError::new(
                ErrorKind::Socket,
                format!("error while waiting for incoming data: {e}"),
            )),
        }
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        if self.promisc_set {
            if let Err(e) = set_promisc_mode(self.recv_fd.as_raw_fd(), &self.name, false) {
                log::error!("leaving {} promiscuous: {e}", self.name);
            }
        }
    }
}

/// `AF_PACKET` socket of the given kind, broadcast allowed, seeing every
/// ethertype.
fn packet_socket(kind: libc::c_int) -> Result<OwnedFd, DhcpError> {
    let protocol = libc::c_int::from((libc::ETH_P_ALL as u16).to_be());
    let fd = unsafe { libc::socket(libc::AF_PACKET, kind, protocol) };
    if fd == -1 {
        return Err(DhcpError::new(
            ErrorKind::Socket,
            format!("can not create packet socket: {}", io::Error::last_os_error()),
        ));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BROADCAST,
            &one as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(DhcpError::new(
            ErrorKind::Socket,
            format!("can not allow broadcast: {}", io::Error::last_os_error()),
        ));
    }

    Ok(fd)
}

fn set_nonblocking(fd: RawFd) -> Result<(), DhcpError> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(DhcpError::new(
            ErrorKind::Socket,
            format!("can not get socket flags: {}", io::Error::last_os_error()),
        ));
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(DhcpError::new(
            ErrorKind::Socket,
            format!("can not set socket flags: {}", io::Error::last_os_error()),
        ));
    }
    Ok(())
}

/// Zeroed `ifreq` with the interface name filled in.
fn ifreq_for(name: &str) -> Result<libc::ifreq, DhcpError> {
    let mut req: libc::ifreq = unsafe { std::mem::zeroed() };
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() >= req.ifr_name.len() {
        return Err(DhcpError::new(
            ErrorKind::InvalidArgument,
            format!("bad interface name {name:?}"),
        ));
    }
    for (dst, src) in req.ifr_name.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    Ok(req)
}

fn query_index(fd: RawFd, name: &str) -> Result<libc::c_int, DhcpError> {
    let mut req = ifreq_for(name)?;
    if unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut req) } == -1 {
        return Err(DhcpError::new(
            ErrorKind::Interface,
            format!("can not read index of {name}: {}", io::Error::last_os_error()),
        ));
    }
    Ok(unsafe { req.ifr_ifru.ifru_ifindex })
}

fn query_hwaddr(fd: RawFd, name: &str) -> Result<MacAddr, DhcpError> {
    let mut req = ifreq_for(name)?;
    if unsafe { libc::ioctl(fd, libc::SIOCGIFHWADDR, &mut req) } == -1 {
        return Err(DhcpError::new(
            ErrorKind::Interface,
            format!(
                "can not read hardware address of {name}: {}",
                io::Error::last_os_error()
            ),
        ));
    }
    let sa_data = unsafe { req.ifr_ifru.ifru_hwaddr.sa_data };
    let mut mac = [0_u8; 6];
    for (dst, src) in mac.iter_mut().zip(sa_data.iter()) {
        *dst = *src as u8;
    }
    Ok(MacAddr::new(mac))
}

/// Flip the interface's promiscuous flag. Returns true if the flag was
/// changed by this call, false if it was already in the wanted state.
fn set_promisc_mode(fd: RawFd, name: &str, promisc_on: bool) -> Result<bool, DhcpError> {
    let mut req = ifreq_for(name)?;
    if unsafe { libc::ioctl(fd, libc::SIOCGIFFLAGS, &mut req) } == -1 {
        return Err(DhcpError::new(
            ErrorKind::Interface,
            format!("can not get flags for {name}: {}", io::Error::last_os_error()),
        ));
    }

    let flags = unsafe { req.ifr_ifru.ifru_flags };
    let promisc_flag = libc::IFF_PROMISC as libc::c_short;
    if promisc_on == (flags & promisc_flag != 0) {
        return Ok(false);
    }

    log::debug!(
        "setting {name} to {} mode",
        if promisc_on { "promiscuous" } else { "non-promiscuous" }
    );
    req.ifr_ifru.ifru_flags = if promisc_on {
        flags | promisc_flag
    } else {
        flags & !promisc_flag
    };
    if unsafe { libc::ioctl(fd, libc::SIOCSIFFLAGS, &mut req) } == -1 {
        return Err(DhcpError::new(
            ErrorKind::Interface,
            format!("can not set flags for {name}: {}", io::Error::last_os_error()),
        ));
    }
    Ok(true)
}
