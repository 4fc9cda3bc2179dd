//! One DHCP round-trip: broadcast a request, wait for the reply that
//! belongs to it.
//!
//! The transactor is the only user of the sockets. Everything the wait
//! accepts or drops is decided by [screen_reply], which is plain code over
//! a captured buffer so the filter rules are testable on their own.

use crate::dhcp::DhcpPacket;
use crate::iface::Interface;
use crate::udp::{build_udp_packet, extract_dhcp_payload};
use crate::{ByteStruct, ByteStructLen, DhcpError, IpV4Addr, MacAddr};

use std::time::{Duration, Instant};

/// Room for one outgoing frame: headers plus the full DHCP packet.
const FRAME_BUF_SIZE: usize = 1024;

/// Room for one captured datagram.
const CAPTURE_BUF_SIZE: usize = 8192;

/// Decide whether a captured buffer is the reply the caller is waiting for.
///
/// It must frame a DHCP payload, be a BOOTREPLY, carry the caller's xid,
/// name its server in option 54, and not come from the excluded server.
/// Anything else is dropped (with a log line saying why).
pub fn screen_reply(
    captured: &[u8],
    xid: u32,
    exclude_server: Option<IpV4Addr>,
) -> Option<DhcpPacket> {
    let payload = extract_dhcp_payload(captured)?;

    let mut bytes = [0_u8; DhcpPacket::BYTE_LEN];
    let n = payload.len().min(bytes.len());
    bytes[..n].copy_from_slice(&payload[..n]);
    let reply = DhcpPacket::read_bytes(&bytes);

    if reply.op != crate::dhcp::DhcpOperation::Reply || reply.xid != xid {
        return None;
    }

    let mut server_id = [0_u8; 4];
    if reply
        .get_option(crate::dhcp::DhcpOptionKind::ServerIdentifier, &mut server_id)
        .is_none()
    {
        log::error!("no server ID in reply");
        return None;
    }
    let server_id = IpV4Addr::new(server_id);
    if Some(server_id) == exclude_server {
        log::debug!("ignoring server {server_id}");
        return None;
    }

    reply.trace_contents();
    Some(reply)
}

/// Sends requests and collects matching replies over one [Interface].
pub struct Transactor<'a> {
    iface: &'a Interface,
    exclude_server: Option<IpV4Addr>,
}

impl<'a> Transactor<'a> {
    pub fn new(iface: &'a Interface, exclude_server: Option<IpV4Addr>) -> Self {
        Transactor {
            iface,
            exclude_server,
        }
    }

    /// Broadcast `msg` and wait up to `timeout` for a matching reply.
    ///
    /// The frame goes from 0.0.0.0:68 to 255.255.255.255:67, source MAC the
    /// interface's own, destination `dst_macaddr` or broadcast. `Ok(None)`
    /// means the window closed without an acceptable reply; `Err` means a
    /// socket gave out.
    pub fn send_and_wait(
        &self,
        msg: &DhcpPacket,
        msg_size: usize,
        dst_macaddr: Option<MacAddr>,
        timeout: Duration,
    ) -> Result<Option<DhcpPacket>, DhcpError> {
        let mut dhcp_bytes = [0_u8; DhcpPacket::BYTE_LEN];
        msg.write_bytes(&mut dhcp_bytes);
        let payload = &dhcp_bytes[..msg_size.min(dhcp_bytes.len())];

        let mut frame = [0_u8; FRAME_BUF_SIZE];
        let frame_len = build_udp_packet(
            &mut frame,
            payload,
            self.iface.hwaddr(),
            IpV4Addr::ANY,
            crate::dhcp::DHCP_CLIENT_PORT,
            dst_macaddr.unwrap_or(MacAddr::BROADCAST),
            IpV4Addr::BROADCAST,
            crate::dhcp::DHCP_SERVER_PORT,
        )?;
        self.iface.send_frame(&frame[..frame_len])?;

        let deadline = Instant::now() + timeout;
        let mut capture = [0_u8; CAPTURE_BUF_SIZE];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::debug!(
                    "timeout while waiting for incoming data ({} seconds)",
                    timeout.as_secs()
                );
                return Ok(None);
            }
            if !self.iface.wait_readable(remaining)? {
                continue;
            }
            while let Some(n) = self.iface.recv_into(&mut capture)? {
                if let Some(reply) = screen_reply(&capture[..n], msg.xid, self.exclude_server) {
                    return Ok(Some(reply));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dhcp::DhcpOptionKind;
    use crate::lease::Lease;
    use crate::udp::build_udp_packet;

    /// Frame an OFFER the way a server broadcasting back to us would,
    /// then strip the Ethernet header like the SOCK_DGRAM capture does.
    fn captured_offer(xid: u32, server_id: [u8; 4]) -> Vec<u8> {
        let mut lease = Lease::new(xid, MacAddr::new([0, 0x16, 0x36, 9, 9, 9]));
        lease.client_addr = IpV4Addr::new([10, 0, 0, 50]);
        let mut offer = DhcpPacket::make_discover(&lease, true).unwrap();
        offer.op = crate::dhcp::DhcpOperation::Reply;
        // Rewrite option 53 in place from DISCOVER to OFFER
        offer.options.0[6] = 2;
        offer
            .add_option(DhcpOptionKind::ServerIdentifier, &server_id)
            .unwrap();

        let mut dhcp_bytes = [0_u8; DhcpPacket::BYTE_LEN];
        offer.write_bytes(&mut dhcp_bytes);
        let size = offer.packet_size().unwrap();

        let mut frame = [0_u8; 2048];
        let n = build_udp_packet(
            &mut frame,
            &dhcp_bytes[..size],
            MacAddr::new([0xAA; 6]),
            IpV4Addr::new(server_id),
            67,
            MacAddr::BROADCAST,
            IpV4Addr::BROADCAST,
            68,
        )
        .unwrap();
        frame[14..n].to_vec()
    }

    #[test]
    fn test_screen_accepts_matching_reply() {
        let captured = captured_offer(0x55AA55AA, [10, 0, 0, 2]);
        let reply = screen_reply(&captured, 0x55AA55AA, None).unwrap();
        assert_eq!(reply.xid, 0x55AA55AA);

        // Invariant: an accepted BOOTREPLY always exposes the waited-on xid
        assert_eq!(reply.op, crate::dhcp::DhcpOperation::Reply);
    }

    #[test]
    fn test_screen_drops_wrong_xid() {
        let captured = captured_offer(0x11111111, [10, 0, 0, 2]);
        assert!(screen_reply(&captured, 0x22222222, None).is_none());
    }

    #[test]
    fn test_screen_drops_request_op() {
        let mut lease = Lease::new(1, MacAddr::ANY);
        lease.client_addr = IpV4Addr::new([10, 0, 0, 50]);
        let discover = DhcpPacket::make_discover(&lease, true).unwrap();
        let mut dhcp_bytes = [0_u8; DhcpPacket::BYTE_LEN];
        discover.write_bytes(&mut dhcp_bytes);
        let mut frame = [0_u8; 2048];
        let n = build_udp_packet(
            &mut frame,
            &dhcp_bytes[..discover.packet_size().unwrap()],
            MacAddr::ANY,
            IpV4Addr::ANY,
            68,
            MacAddr::BROADCAST,
            IpV4Addr::BROADCAST,
            67,
        )
        .unwrap();

        assert!(screen_reply(&frame[14..n], 1, None).is_none());
    }

    #[test]
    fn test_screen_requires_server_id() {
        let mut lease = Lease::new(3, MacAddr::ANY);
        lease.client_addr = IpV4Addr::new([10, 0, 0, 50]);
        let mut offer = DhcpPacket::make_discover(&lease, true).unwrap();
        offer.op = crate::dhcp::DhcpOperation::Reply;
        offer.options.0[6] = 2;

        let mut dhcp_bytes = [0_u8; DhcpPacket::BYTE_LEN];
        offer.write_bytes(&mut dhcp_bytes);
        let mut frame = [0_u8; 2048];
        let n = build_udp_packet(
            &mut frame,
            &dhcp_bytes[..offer.packet_size().unwrap()],
            MacAddr::ANY,
            IpV4Addr::new([10, 0, 0, 2]),
            67,
            MacAddr::BROADCAST,
            IpV4Addr::BROADCAST,
            68,
        )
        .unwrap();

        assert!(screen_reply(&frame[14..n], 3, None).is_none());
    }

    #[test]
    fn test_exclude_filter() {
        let xid = 0xDEAD0001;
        let excluded = captured_offer(xid, [10, 0, 0, 1]);
        let other = captured_offer(xid, [10, 0, 0, 2]);
        let exclude = Some(IpV4Addr::new([10, 0, 0, 1]));

        // The excluded server's OFFER is discarded; another server's OFFER
        // with the same xid gets through in the same wait window
        assert!(screen_reply(&excluded, xid, exclude).is_none());
        let reply = screen_reply(&other, xid, exclude).unwrap();
        let mut server_id = [0_u8; 4];
        reply
            .get_option(DhcpOptionKind::ServerIdentifier, &mut server_id)
            .unwrap();
        assert_eq!(server_id, [10, 0, 0, 2]);

        // Without the exclusion both pass
        assert!(screen_reply(&excluded, xid, None).is_some());
    }

    #[test]
    fn test_screen_ignores_foreign_traffic() {
        assert!(screen_reply(&[0_u8; 600], 1, None).is_none());
        assert!(screen_reply(b"short", 1, None).is_none());
    }
}
