//! Internet layer: Internet Protocol message header construction
//!
//! IPV4 header per IETF-RFC-791; see <https://en.wikipedia.org/wiki/IPv4>

use crate::{calc_ip_checksum, IpV4Addr, Protocol};

use byte_struct::*;

/// Version 4, header length 5 words (no options area)
const VERSION_AND_IHL: u8 = 0x45;

/// "Do not fragment" bit of the flags/fragment-offset word
const FLAG_DO_NOT_FRAGMENT: u16 = 0x4000;

/// IPV4 header, fixed 20-byte form without options
///
/// value [0] Version [4 bits], Header Length [4 bits]
///
/// value [1] Type-of-Service/DSCP
///
/// value [2:3] Total Length [u16] in bytes
///
/// value [4:5] Identification [u16]
///
/// value [6:7] Flags [3 bits], Fragmentation Offset [13 bits]
///
/// value [8] Time-to-Live
///
/// value [9] Protocol
///
/// value [10:11] Checksum [u16]
///
/// value [12:15] Source IP Address
///
/// value [16:19] Destination IP Address
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct IpV4Header {
    pub version_and_length: u8,
    pub dscp: u8,
    pub total_length: u16,
    pub identification: u16,
    pub flags_and_fragment: u16,
    pub time_to_live: u8,
    pub protocol: Protocol,
    pub checksum: u16,
    pub src_ipaddr: IpV4Addr,
    pub dst_ipaddr: IpV4Addr,
}

impl IpV4Header {
    /// Header for a datagram carrying `data_len` bytes above the IP layer,
    /// DF set, TTL 64, checksum computed over the header with the checksum
    /// field zeroed.
    pub fn for_payload(
        data_len: usize,
        protocol: Protocol,
        src_ipaddr: IpV4Addr,
        dst_ipaddr: IpV4Addr,
    ) -> Self {
        let mut header = IpV4Header {
            version_and_length: VERSION_AND_IHL,
            dscp: 0,
            total_length: (Self::BYTE_LEN + data_len) as u16,
            identification: 0,
            flags_and_fragment: FLAG_DO_NOT_FRAGMENT,
            time_to_live: 64,
            protocol,
            checksum: 0,
            src_ipaddr,
            dst_ipaddr,
        };
        header.checksum = calc_ip_checksum(&header.to_be_bytes());

        header
    }

    /// Header length in bytes as declared by the IHL nibble
    pub fn header_length(&self) -> usize {
        ((self.version_and_length & 0x0F) as usize) * 4
    }

    /// Pack into big-endian (network) byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut header_bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut header_bytes);

        header_bytes
    }
}
