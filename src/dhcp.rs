//! Dynamic Host Configuration Protocol for IPV4.
//!
//! Client side of the call-response structure used by a router to assign IP
//! addresses to devices on a local network, per IETF-RFC-2131; see
//! <https://datatracker.ietf.org/doc/html/rfc2131#page-22>
//!
//! [`protocol`] is the message codec: the 236-byte fixed header, the options
//! area behind the magic cookie, and the DISCOVER/REQUEST/RENEW builders.
//! [`client`] drives one lease through the acquisition and renewal
//! conversations.

pub mod client;
pub mod protocol;

pub use protocol::{DhcpMessageKind, DhcpOperation, DhcpOptionKind, DhcpPacket};

/// Port servers listen on
pub const DHCP_SERVER_PORT: u16 = 67;
/// Port clients listen on
pub const DHCP_CLIENT_PORT: u16 = 68;

/// "Magic cookie" marking the start of the DHCP options area
pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Size of the fixed DHCP header, up to but not including the cookie
pub const FIXED_HEADER_SIZE: usize = 236;

/// Capacity of the options area, cookie included
pub const MAX_OPTIONS_SIZE: usize = 312;
