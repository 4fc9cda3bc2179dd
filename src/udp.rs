//! Transport layer: User Datagram Protocol, plus assembly and recognition
//! of the full `[Ethernet | IPv4 | UDP | payload]` frames this tool sends
//! and receives on its packet sockets.

use crate::dhcp::{self, DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
use crate::enet::EthernetHeader;
use crate::ip::IpV4Header;
use crate::{calc_ip_checksum_finalize, calc_ip_checksum_incomplete};
use crate::{DhcpError, ErrorKind, IpV4Addr, MacAddr, Protocol};

use byte_struct::*;

/// UDP datagram header structure
///
/// value [0:1] source port [u16]
///
/// value [2:3] destination port [u16]
///
/// value [4:5] total length in bytes [u16], header + data
///
/// value [6:7] checksum [u16]
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct UdpHeader {
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// Datagram length including header and data
    pub length: u16,
    /// Checksum over pseudo-header, header and data
    pub checksum: u16,
}

/// UDP checksum over the pseudo-header followed by `udp_bytes` (header plus
/// payload, with the zero pad byte already present for odd payloads).
///
/// `udp_length` is the unpadded header-plus-payload length that goes into
/// the pseudo-header. A result of 0x0000 is emitted as-is; this codec does
/// not use the zero-means-omitted convention.
pub fn udp_checksum(
    src_ipaddr: IpV4Addr,
    dst_ipaddr: IpV4Addr,
    udp_bytes: &[u8],
    udp_length: u16,
) -> u16 {
    let mut pseudo = [0_u8; 12];
    pseudo[0..4].copy_from_slice(&src_ipaddr.0);
    pseudo[4..8].copy_from_slice(&dst_ipaddr.0);
    pseudo[9] = Protocol::Udp as u8;
    pseudo[10..12].copy_from_slice(&udp_length.to_be_bytes());

    let sum = calc_ip_checksum_incomplete(&pseudo) + calc_ip_checksum_incomplete(udp_bytes);
    calc_ip_checksum_finalize(sum)
}

/// Assemble `[Ethernet | IPv4 | UDP | payload]` into `buffer`, ready for
/// `sendto` on a raw packet socket. Ports are host order. Returns the number
/// of bytes written.
///
/// An odd-length payload gets a single zero byte appended so the checksum
/// is computed over whole 16-bit words; the UDP length field and the IP
/// total length stay unpadded, while the returned frame length includes
/// the pad byte.
pub fn build_udp_packet(
    buffer: &mut [u8],
    payload: &[u8],
    src_macaddr: MacAddr,
    src_ipaddr: IpV4Addr,
    src_port: u16,
    dst_macaddr: MacAddr,
    dst_ipaddr: IpV4Addr,
    dst_port: u16,
) -> Result<usize, DhcpError> {
    const ETH_END: usize = EthernetHeader::BYTE_LEN;
    const IP_END: usize = ETH_END + IpV4Header::BYTE_LEN;
    const UDP_END: usize = IP_END + UdpHeader::BYTE_LEN;

    let udp_length = UdpHeader::BYTE_LEN + payload.len();
    let pad = payload.len() % 2;
    let packet_len = UDP_END + payload.len() + pad;

    if packet_len > buffer.len() {
        return Err(DhcpError::new(
            ErrorKind::BufferOverflow,
            format!("frame of {packet_len} bytes exceeds {}-byte buffer", buffer.len()),
        ));
    }

    let frame = &mut buffer[..packet_len];
    frame.fill(0);
    frame[UDP_END..UDP_END + payload.len()].copy_from_slice(payload);

    let udp = UdpHeader {
        src_port,
        dst_port,
        length: udp_length as u16,
        checksum: 0,
    };
    udp.write_bytes(&mut frame[IP_END..UDP_END]);
    let checksum = udp_checksum(
        src_ipaddr,
        dst_ipaddr,
        &frame[IP_END..],
        udp_length as u16,
    );
    frame[IP_END + 6..IP_END + 8].copy_from_slice(&checksum.to_be_bytes());

    IpV4Header::for_payload(udp_length, Protocol::Udp, src_ipaddr, dst_ipaddr)
        .write_bytes(&mut frame[ETH_END..IP_END]);
    EthernetHeader::ipv4(src_macaddr, dst_macaddr).write_bytes(&mut frame[..ETH_END]);

    Ok(packet_len)
}

/// Recognise a captured `[IPv4 | UDP | DHCP]` buffer (link header already
/// stripped by the SOCK_DGRAM capture socket) and return the DHCP payload.
///
/// A candidate must parse as IPv4 carrying UDP to port 67 or 68, with the
/// magic cookie opening the DHCP options area. The IHL nibble is honored,
/// so headers with IP options do not throw off the UDP offset.
pub fn extract_dhcp_payload(buffer: &[u8]) -> Option<&[u8]> {
    let min_payload = dhcp::FIXED_HEADER_SIZE + dhcp::MAGIC_COOKIE.len();

    if buffer.len() < IpV4Header::BYTE_LEN + UdpHeader::BYTE_LEN + min_payload {
        return None;
    }

    let ip = IpV4Header::read_bytes(&buffer[..IpV4Header::BYTE_LEN]);
    if ip.protocol != Protocol::Udp {
        return None;
    }

    let ihl = ip.header_length();
    if ihl < IpV4Header::BYTE_LEN || buffer.len() < ihl + UdpHeader::BYTE_LEN + min_payload {
        return None;
    }

    let udp = UdpHeader::read_bytes(&buffer[ihl..ihl + UdpHeader::BYTE_LEN]);
    if udp.dst_port != DHCP_SERVER_PORT && udp.dst_port != DHCP_CLIENT_PORT {
        return None;
    }

    let payload = &buffer[ihl + UdpHeader::BYTE_LEN..];
    let cookie = &payload[dhcp::FIXED_HEADER_SIZE..dhcp::FIXED_HEADER_SIZE + 4];
    if cookie != dhcp::MAGIC_COOKIE {
        return None;
    }

    Some(payload)
}
