//! DHCP message construction and parsing

use crate::dhcp::{FIXED_HEADER_SIZE, MAGIC_COOKIE, MAX_OPTIONS_SIZE};
use crate::lease::Lease;
use crate::{ByteArray, DhcpError, ErrorKind, IpV4Addr, MacAddr};

use byte_struct::*;
use static_assertions::const_assert_eq;

use std::fmt;

/// Hardware type for ethernet
const HTYPE_ETHER: u8 = 1;

/// Hardware address length for ethernet
const HLEN_ETHER: u8 = 6;

/// Broadcast bit of the flags field (bit 15 of the big-endian word)
pub const FLAG_BROADCAST: u16 = 0x8000;

enum_with_unknown! {
    /// Message op code / message type. 1 = BOOTREQUEST, 2 = BOOTREPLY
    /// Legacy operation type field from BOOTP.
    /// Still has to match and change value depending on message type even though
    /// there is only one valid combination of message type and operation.
    pub enum DhcpOperation(u8) {
        /// Anything coming from the client
        Request = 1,
        /// Anything coming from the server
        Reply = 2
    }
}

impl ByteStructLen for DhcpOperation {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for DhcpOperation {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

enum_with_unknown! {
    /// Contents of option field kind 53
    pub enum DhcpMessageKind(u8) {
        /// Client broadcast to locate available servers.
        Discover = 1,
        /// Server to client in response to DHCPDISCOVER with offer of configuration parameters.
        Offer = 2,
        /// Client message to servers either requesting offered parameters
        /// from one server or extending the lease on a particular address.
        Request = 3,
        /// Client to server indicating network address is already in use.
        Decline = 4,
        /// Server to client with configuration parameters, including committed network address.
        Ack = 5,
        /// Server to client refusing the request.
        Nak = 6,
        /// Client to server relinquishing network address and cancelling remaining lease.
        Release = 7,
        /// Client to server, asking only for local configuration parameters.
        Inform = 8
    }
}

impl fmt::Display for DhcpMessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discover => write!(f, "DHCPDISCOVER"),
            Self::Offer => write!(f, "DHCPOFFER"),
            Self::Request => write!(f, "DHCPREQUEST"),
            Self::Decline => write!(f, "DHCPDECLINE"),
            Self::Ack => write!(f, "DHCPACK"),
            Self::Nak => write!(f, "DHCPNAK"),
            Self::Release => write!(f, "DHCPRELEASE"),
            Self::Inform => write!(f, "DHCPINFORM"),
            Self::Unknown(other) => write!(f, "message type {other}"),
        }
    }
}

enum_with_unknown! {
    /// Option type codes for the options this tool sends or reads back.
    /// Every other code lands in `Unknown` and fails the size whitelist.
    pub enum DhcpOptionKind(u8) {
        /// Single-byte no-op filler
        Pad = 0,
        SubnetMask = 1,
        Router = 3,
        DomainNameServers = 6,
        DomainName = 15,
        BroadcastAddress = 28,
        RequestedIpAddress = 50,
        IpAddressLeaseTime = 51,
        /// This option's contents indicate how the rest of the message should be parsed
        DhcpMessageType = 53,
        ServerIdentifier = 54,
        /// Time in seconds until start of renewal (T1)
        RenewalTime = 58,
        /// Time in seconds until rebinding (T2)
        RebindingTime = 59,
        /// End-of-options sentinel
        End = 255
    }
}

/// Check an option's declared size against RFC-1533. Codes this tool does
/// not handle are reported as invalid.
pub fn option_size_valid(code: DhcpOptionKind, size: usize) -> bool {
    match code {
        DhcpOptionKind::DhcpMessageType => size == 1,
        DhcpOptionKind::DomainName => size > 0,
        DhcpOptionKind::SubnetMask
        | DhcpOptionKind::BroadcastAddress
        | DhcpOptionKind::RequestedIpAddress
        | DhcpOptionKind::IpAddressLeaseTime
        | DhcpOptionKind::ServerIdentifier
        | DhcpOptionKind::RenewalTime
        | DhcpOptionKind::RebindingTime => size == 4,
        DhcpOptionKind::Router | DhcpOptionKind::DomainNameServers => {
            size > 0 && size % 4 == 0
        }
        _ => false,
    }
}

/// One position in the options area, as seen by the walkers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionSlot {
    /// 0x00: single-byte filler; also what untouched tail bytes read as
    Pad,
    /// 0xFF: end of options
    End,
    /// A `code | len | value` record starts here
    Opt { code: u8, len: u8 },
}

/// The on-wire DHCP packet: fixed header plus the options area.
///
/// value [0] op, [1] htype, [2] hlen, [3] hops
///
/// value [4:7] xid, [8:9] secs, [10:11] flags
///
/// value [12:15] ciaddr, [16:19] yiaddr, [20:23] siaddr, [24:27] giaddr
///
/// value [28:43] chaddr, [44:107] sname, [108:235] file
///
/// value [236:547] options, opened by the magic cookie
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct DhcpPacket {
    pub op: DhcpOperation,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: IpV4Addr,
    pub yiaddr: IpV4Addr,
    pub siaddr: IpV4Addr,
    pub giaddr: IpV4Addr,
    pub chaddr: ByteArray<16>,
    pub sname: ByteArray<64>,
    pub file: ByteArray<128>,
    pub options: ByteArray<MAX_OPTIONS_SIZE>,
}

const_assert_eq!(DhcpPacket::BYTE_LEN, FIXED_HEADER_SIZE + MAX_OPTIONS_SIZE);
const_assert_eq!(DhcpPacket::BYTE_LEN, 548);

impl DhcpPacket {
    /// All-zero BOOTREQUEST carrying `xid` and `chaddr`, options area
    /// holding nothing but the cookie.
    fn request(xid: u32, chaddr: MacAddr, broadcast: bool) -> Self {
        let mut chaddr16 = [0_u8; 16];
        chaddr16[..6].copy_from_slice(&chaddr.0);

        let mut options = [0_u8; MAX_OPTIONS_SIZE];
        options[..4].copy_from_slice(&MAGIC_COOKIE);

        DhcpPacket {
            op: DhcpOperation::Request,
            htype: HTYPE_ETHER,
            hlen: HLEN_ETHER,
            hops: 0,
            xid,
            secs: 0,
            flags: if broadcast { FLAG_BROADCAST } else { 0 },
            ciaddr: IpV4Addr::ANY,
            yiaddr: IpV4Addr::ANY,
            siaddr: IpV4Addr::ANY,
            giaddr: IpV4Addr::ANY,
            chaddr: ByteArray(chaddr16),
            sname: ByteArray::default(),
            file: ByteArray::default(),
            options: ByteArray(options),
        }
    }

    /// DHCPDISCOVER for a fresh lease.
    pub fn make_discover(lease: &Lease, broadcast: bool) -> Result<Self, DhcpError> {
        let mut msg = Self::request(lease.xid, lease.mac, broadcast);
        msg.add_option(
            DhcpOptionKind::DhcpMessageType,
            &[DhcpMessageKind::Discover.into()],
        )?;
        Ok(msg)
    }

    /// DHCPREQUEST selecting the address and server recorded in the lease
    /// by the preceding OFFER.
    pub fn make_request(lease: &Lease, broadcast: bool) -> Result<Self, DhcpError> {
        let mut msg = Self::request(lease.xid, lease.mac, broadcast);
        msg.add_option(
            DhcpOptionKind::DhcpMessageType,
            &[DhcpMessageKind::Request.into()],
        )?;
        msg.add_option(DhcpOptionKind::RequestedIpAddress, &lease.client_addr.0)?;
        msg.add_option(DhcpOptionKind::IpAddressLeaseTime, &lease.lease_secs().to_be_bytes())?;
        msg.add_option(DhcpOptionKind::ServerIdentifier, &lease.server_id.0)?;
        Ok(msg)
    }

    /// DHCPREQUEST extending an existing lease: `ciaddr` carries the held
    /// address and the only option is the message type.
    ///
    /// RFC 2131 has a RENEWING client unicast this to the leasing server;
    /// this tool broadcasts it with the broadcast flag instead, so the reply
    /// comes back to the capture socket rather than to an address the host
    /// does not own.
    pub fn make_renew(lease: &Lease, broadcast: bool) -> Result<Self, DhcpError> {
        let mut msg = Self::request(lease.xid, lease.mac, broadcast);
        msg.ciaddr = lease.client_addr;
        msg.add_option(
            DhcpOptionKind::DhcpMessageType,
            &[DhcpMessageKind::Request.into()],
        )?;
        Ok(msg)
    }

    /// Classify the options byte at `index`.
    fn slot_at(&self, index: usize) -> OptionSlot {
        match self.options.0[index] {
            0x00 => OptionSlot::Pad,
            0xFF => OptionSlot::End,
            code => OptionSlot::Opt {
                code,
                len: self.options.0.get(index + 1).copied().unwrap_or(0),
            },
        }
    }

    /// Offset of the first free byte in the options area: the first Pad or
    /// End byte reached by walking records from just past the cookie. None
    /// if the walk runs off the end of the area.
    fn free_slot(&self) -> Option<usize> {
        let mut index = MAGIC_COOKIE.len();
        while index < MAX_OPTIONS_SIZE {
            match self.slot_at(index) {
                OptionSlot::Pad | OptionSlot::End => return Some(index),
                OptionSlot::Opt { len, .. } => index += 2 + len as usize,
            }
        }
        None
    }

    /// Append `code | len | value` at the first free slot and terminate the
    /// area with an End byte. Callers are responsible for not duplicating
    /// option codes; there is no merging.
    pub fn add_option(&mut self, code: DhcpOptionKind, value: &[u8]) -> Result<(), DhcpError> {
        let len = value.len();
        if len == 0 || len > u8::MAX as usize {
            return Err(DhcpError::new(
                ErrorKind::InvalidArgument,
                format!("option value of {len} bytes"),
            ));
        }
        let index = self.free_slot().ok_or_else(|| {
            DhcpError::new(ErrorKind::InvalidOptions, "options area has no free slot")
        })?;
        if index + len + 3 >= MAX_OPTIONS_SIZE {
            return Err(DhcpError::new(
                ErrorKind::InvalidOptions,
                format!("no room for {len}-byte option {}", u8::from(code)),
            ));
        }

        let options = &mut self.options.0;
        options[index] = code.into();
        options[index + 1] = len as u8;
        options[index + 2..index + 2 + len].copy_from_slice(value);
        options[index + 2 + len] = DhcpOptionKind::End.into();

        Ok(())
    }

    /// Actual packet size in bytes: fixed header plus used options plus the
    /// End byte, without the padded tail.
    pub fn packet_size(&self) -> Result<usize, DhcpError> {
        let index = self.free_slot().ok_or_else(|| {
            DhcpError::new(ErrorKind::InvalidOptions, "unterminated options area")
        })?;
        Ok(FIXED_HEADER_SIZE + index + 1)
    }

    /// Iterate the options records. The walk starts past the cookie and
    /// stops at the first Pad or End byte.
    pub fn options(&self) -> Options<'_> {
        Options {
            msg: self,
            index: MAGIC_COOKIE.len(),
        }
    }

    /// Find an option and copy its value into `buffer`, up to the buffer's
    /// capacity. Returns the declared value length, which the caller should
    /// compare against the buffer size if truncation matters.
    ///
    /// A declared length failing the RFC-1533 whitelist, or overrunning the
    /// options area, is logged and reported as not found.
    pub fn get_option(&self, code: DhcpOptionKind, buffer: &mut [u8]) -> Option<usize> {
        let wanted = u8::from(code);
        let view = self.options().find(|view| view.code == wanted)?;

        if view.value.len() < view.len {
            log::error!(
                "option {wanted} with size {} overruns the options area",
                view.len
            );
            return None;
        }
        if !option_size_valid(code, view.len) {
            log::error!("bad option size: optcode={wanted}, size={}", view.len);
            return None;
        }

        Some(view.read_into(buffer))
    }

    /// Message type from option 53, if present and well-formed.
    pub fn message_kind(&self) -> Option<DhcpMessageKind> {
        let mut value = [0_u8; 1];
        self.get_option(DhcpOptionKind::DhcpMessageType, &mut value)?;
        Some(DhcpMessageKind::from(value[0]))
    }

    /// Dump header fields and option records to the trace log.
    pub fn trace_contents(&self) {
        if !log::log_enabled!(log::Level::Trace) {
            return;
        }
        log::trace!(
            "dhcp op={} xid={:#010x} flags={:#06x} ciaddr={} yiaddr={} siaddr={} giaddr={} chaddr={}",
            u8::from(self.op),
            self.xid,
            self.flags,
            self.ciaddr,
            self.yiaddr,
            self.siaddr,
            self.giaddr,
            MacAddr::new(self.chaddr.0[..6].try_into().unwrap_or([0; 6])),
        );
        for view in self.options() {
            log::trace!("  option {} len {} value {:02x?}", view.code, view.len, view.value);
        }
    }
}

/// One option record as it sits in the options area.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OptionView<'a> {
    /// Option code
    pub code: u8,
    /// Declared value length, which may exceed `value.len()` if the record
    /// overruns the options area
    pub len: usize,
    /// The value bytes that are actually in bounds
    pub value: &'a [u8],
}

impl OptionView<'_> {
    /// Copy the value into `buffer`, truncating silently at the buffer's
    /// capacity. Returns the declared length.
    pub fn read_into(&self, buffer: &mut [u8]) -> usize {
        let n = self.value.len().min(buffer.len());
        buffer[..n].copy_from_slice(&self.value[..n]);
        self.len
    }
}

/// Iterator over the options records of a [DhcpPacket].
pub struct Options<'a> {
    msg: &'a DhcpPacket,
    index: usize,
}

impl<'a> Iterator for Options<'a> {
    type Item = OptionView<'a>;

    fn next(&mut self) -> Option<OptionView<'a>> {
        if self.index + 1 >= MAX_OPTIONS_SIZE {
            return None;
        }
        match self.msg.slot_at(self.index) {
            OptionSlot::Pad | OptionSlot::End => None,
            OptionSlot::Opt { code, len } => {
                let len = len as usize;
                let start = (self.index + 2).min(MAX_OPTIONS_SIZE);
                let end = (start + len).min(MAX_OPTIONS_SIZE);
                self.index = start + len;
                Some(OptionView {
                    code,
                    len,
                    value: &self.msg.options.0[start..end],
                })
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lease::Lease;

    fn lease_with(xid: u32, mac: [u8; 6]) -> Lease {
        let mut lease = Lease::new(xid, MacAddr::new(mac));
        lease.client_addr = IpV4Addr::new([192, 168, 1, 50]);
        lease.server_id = IpV4Addr::new([192, 168, 1, 1]);
        lease.lease_time = 3600_u32.to_be();
        lease
    }

    #[test]
    fn test_discover_encoding() {
        let lease = lease_with(0xDEADBEEF, [0x00, 0x16, 0x36, 0x01, 0x02, 0x03]);
        let msg = DhcpPacket::make_discover(&lease, true).unwrap();

        let mut bytes = [0_u8; DhcpPacket::BYTE_LEN];
        msg.write_bytes(&mut bytes);

        assert_eq!(bytes[0], 1); // BOOTREQUEST
        assert_eq!(bytes[1], 1); // ethernet
        assert_eq!(bytes[2], 6);
        assert_eq!(&bytes[4..8], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&bytes[10..12], &[0x80, 0x00]); // broadcast bit
        assert_eq!(&bytes[28..34], &[0x00, 0x16, 0x36, 0x01, 0x02, 0x03]);
        assert_eq!(
            &bytes[236..244],
            &[0x63, 0x82, 0x53, 0x63, 0x35, 0x01, 0x01, 0xFF]
        );

        // fixed header + cookie + message type record + End byte
        assert_eq!(msg.packet_size().unwrap(), 244);
    }

    #[test]
    fn test_discover_without_broadcast_flag() {
        let lease = lease_with(1, [2; 6]);
        let msg = DhcpPacket::make_discover(&lease, false).unwrap();
        assert_eq!(msg.flags, 0);
    }

    #[test]
    fn test_request_options() {
        let lease = lease_with(0x01020304, [0x00, 0x16, 0x36, 0xAA, 0xBB, 0xCC]);
        let msg = DhcpPacket::make_request(&lease, true).unwrap();

        let mut value = [0_u8; 4];
        assert_eq!(msg.message_kind(), Some(DhcpMessageKind::Request));
        assert_eq!(
            msg.get_option(DhcpOptionKind::RequestedIpAddress, &mut value),
            Some(4)
        );
        assert_eq!(value, [192, 168, 1, 50]);
        assert_eq!(
            msg.get_option(DhcpOptionKind::IpAddressLeaseTime, &mut value),
            Some(4)
        );
        assert_eq!(u32::from_be_bytes(value), 3600);
        assert_eq!(
            msg.get_option(DhcpOptionKind::ServerIdentifier, &mut value),
            Some(4)
        );
        assert_eq!(value, [192, 168, 1, 1]);
    }

    #[test]
    fn test_renew_carries_ciaddr_only() {
        let lease = lease_with(7, [0x00, 0x16, 0x36, 1, 2, 3]);
        let msg = DhcpPacket::make_renew(&lease, true).unwrap();

        assert_eq!(msg.ciaddr, IpV4Addr::new([192, 168, 1, 50]));
        assert_eq!(msg.message_kind(), Some(DhcpMessageKind::Request));
        let mut value = [0_u8; 4];
        assert_eq!(msg.get_option(DhcpOptionKind::ServerIdentifier, &mut value), None);
        assert_eq!(msg.get_option(DhcpOptionKind::RequestedIpAddress, &mut value), None);
        // cookie + one 3-byte record + End
        assert_eq!(msg.packet_size().unwrap(), 244);
    }

    #[test]
    fn test_option_roundtrip_in_order() {
        let mut msg = DhcpPacket::request(1, MacAddr::ANY, false);
        let written: &[(DhcpOptionKind, &[u8])] = &[
            (DhcpOptionKind::DhcpMessageType, &[2]),
            (DhcpOptionKind::ServerIdentifier, &[10, 0, 0, 1]),
            (DhcpOptionKind::DomainName, b"lan.example"),
            (DhcpOptionKind::RenewalTime, &[0, 0, 7, 8]),
        ];
        for (code, value) in written {
            msg.add_option(*code, value).unwrap();
        }

        let read: Vec<(u8, usize, Vec<u8>)> = msg
            .options()
            .map(|view| (view.code, view.len, view.value.to_vec()))
            .collect();
        let expected: Vec<(u8, usize, Vec<u8>)> = written
            .iter()
            .map(|(code, value)| (u8::from(*code), value.len(), value.to_vec()))
            .collect();
        assert_eq!(read, expected);
    }

    #[test]
    fn test_get_option_truncates_but_reports_length() {
        let mut msg = DhcpPacket::request(1, MacAddr::ANY, false);
        msg.add_option(DhcpOptionKind::DomainName, b"very.long.domain.example")
            .unwrap();

        let mut small = [0_u8; 4];
        let declared = msg
            .get_option(DhcpOptionKind::DomainName, &mut small)
            .unwrap();
        assert_eq!(declared, 24);
        assert_eq!(&small, b"very");
    }

    #[test]
    fn test_get_option_rejects_bad_sizes() {
        let mut msg = DhcpPacket::request(1, MacAddr::ANY, false);
        // Hand-write a server id with a 2-byte value
        msg.options.0[4..9].copy_from_slice(&[54, 2, 1, 2, 0xFF]);

        let mut value = [0_u8; 4];
        assert_eq!(msg.get_option(DhcpOptionKind::ServerIdentifier, &mut value), None);
    }

    #[test]
    fn test_unknown_option_rejected() {
        let mut msg = DhcpPacket::request(1, MacAddr::ANY, false);
        // Vendor info (43) is not on the whitelist
        msg.options.0[4..8].copy_from_slice(&[43, 1, 0xAB, 0xFF]);

        let mut value = [0_u8; 4];
        assert_eq!(
            msg.get_option(DhcpOptionKind::from(43_u8), &mut value),
            None
        );
    }

    #[test]
    fn test_overrun_option_rejected() {
        let mut msg = DhcpPacket::request(1, MacAddr::ANY, false);
        // Two filler records walk the iterator to offset 308, where a server
        // id claims 4 value bytes but only 2 fit before the area ends
        msg.options.0[4..6].copy_from_slice(&[15, 250]);
        msg.options.0[256..258].copy_from_slice(&[15, 50]);
        msg.options.0[MAX_OPTIONS_SIZE - 4..].copy_from_slice(&[54, 4, 1, 2]);

        let mut value = [0_u8; 4];
        assert_eq!(msg.get_option(DhcpOptionKind::ServerIdentifier, &mut value), None);
    }

    #[test]
    fn test_add_option_over_capacity_fails() {
        let mut msg = DhcpPacket::request(1, MacAddr::ANY, false);
        msg.add_option(DhcpOptionKind::DomainName, &[b'a'; 255]).unwrap();
        // 4 + 257 = 261 used; another 255-byte record cannot fit
        let err = msg
            .add_option(DhcpOptionKind::DomainName, &[b'b'; 255])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOptions);

        // A small one still fits and the area stays terminated
        msg.add_option(DhcpOptionKind::DhcpMessageType, &[1]).unwrap();
        assert_eq!(msg.packet_size().unwrap(), 236 + 261 + 3 + 1);
    }

    #[test]
    fn test_message_kind_unknown_value() {
        let mut msg = DhcpPacket::request(1, MacAddr::ANY, false);
        msg.add_option(DhcpOptionKind::DhcpMessageType, &[200]).unwrap();
        assert_eq!(msg.message_kind(), Some(DhcpMessageKind::Unknown(200)));
    }
}
