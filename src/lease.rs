//! Lease storage and manipulation.
//!
//! The registry owns every lease for the lifetime of the run. Leases are
//! appended when a DISCOVER first goes out and stay in place until shutdown;
//! nothing removes a lease, not even a NAK.

use crate::dhcp::{DhcpMessageKind, DhcpOptionKind, DhcpPacket};
use crate::{IpV4Addr, MacAddr};

use rand::Rng;

/// Max. number of DNS servers kept from option 6.
pub const MAX_DNS_COUNT: usize = 10;

/// Max. domain name bytes kept from option 15.
pub const MAX_DOMAIN_NAME: usize = 128;

/// Wall-clock seconds since the epoch, truncated to u32.
pub fn unix_now() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// One impersonated client and whatever the server has granted it so far.
///
/// Address fields hold wire bytes, so they are network order by construction.
/// The three timer fields keep the u32 exactly as it arrived on the wire
/// (most significant byte first); decode with [u32::from_be] or the
/// `*_secs` accessors before doing arithmetic.
#[derive(Clone, Debug)]
pub struct Lease {
    /// Transaction ID linking requests to replies; fresh random per lease
    pub xid: u32,
    /// Synthetic hardware address this lease impersonates
    pub mac: MacAddr,
    /// Address granted by the server (yiaddr of the OFFER)
    pub client_addr: IpV4Addr,
    /// Server that issued the lease (option 54)
    pub server_id: IpV4Addr,
    /// Lease duration, wire order (option 51)
    pub lease_time: u32,
    /// Subnet mask (option 1)
    pub netmask: IpV4Addr,
    /// First router (option 3)
    pub router: IpV4Addr,
    /// DNS servers (option 6), zero-filled tail
    pub dns: [IpV4Addr; MAX_DNS_COUNT],
    /// Renewal timer T1, wire order (option 58)
    pub renewal_time: u32,
    /// Rebinding timer T2, wire order (option 59)
    pub rebinding_time: u32,
    /// Wall-clock seconds of the most recent ACK, host order.
    /// Zero means acquisition has not completed yet.
    pub last_updated: u32,
    /// Domain name (option 15), zero-filled tail
    pub domain_name: [u8; MAX_DOMAIN_NAME],
}

impl Lease {
    /// Zero-initialised lease for `mac` under transaction id `xid`.
    pub fn new(xid: u32, mac: MacAddr) -> Self {
        Lease {
            xid,
            mac,
            client_addr: IpV4Addr::ANY,
            server_id: IpV4Addr::ANY,
            lease_time: 0,
            netmask: IpV4Addr::ANY,
            router: IpV4Addr::ANY,
            dns: [IpV4Addr::ANY; MAX_DNS_COUNT],
            renewal_time: 0,
            rebinding_time: 0,
            last_updated: 0,
            domain_name: [0_u8; MAX_DOMAIN_NAME],
        }
    }

    /// Lease duration in seconds
    pub fn lease_secs(&self) -> u32 {
        u32::from_be(self.lease_time)
    }

    /// T1 in seconds
    pub fn renewal_secs(&self) -> u32 {
        u32::from_be(self.renewal_time)
    }

    /// T2 in seconds
    pub fn rebinding_secs(&self) -> u32 {
        u32::from_be(self.rebinding_time)
    }

    /// True once a third of T1 has elapsed since the last ACK, unless the
    /// renewal window is already over or the acquisition never finished.
    pub fn due_for_renewal(&self, now: u32) -> bool {
        // DHCPDISCOVER in progress
        if self.last_updated == 0 {
            return false;
        }
        let age = now.saturating_sub(self.last_updated);
        let renewal_time = self.renewal_secs();
        // Renewal window already missed; the server has likely reclaimed it
        if renewal_time < age {
            return false;
        }
        age > renewal_time / 3
    }

    /// Merge fields from a server reply into the lease.
    ///
    /// OFFER requires server id, lease time, netmask and both timers;
    /// a missing one aborts the merge with the lease left mid-acquisition.
    /// ACK requires only the server id, takes everything else
    /// opportunistically, and stamps `last_updated`. Every other message
    /// type leaves the lease untouched.
    pub fn apply(&mut self, msg: &DhcpPacket, now: u32) {
        let Some(kind) = msg.message_kind() else {
            log::error!("no DHCP message type in reply");
            return;
        };

        match kind {
            DhcpMessageKind::Offer => {
                self.client_addr = msg.yiaddr;
                if !self.read_addr(msg, DhcpOptionKind::ServerIdentifier) {
                    log::error!("no server id option in DHCPOFFER");
                    return;
                }
                if !self.read_timer(msg, DhcpOptionKind::IpAddressLeaseTime) {
                    log::error!("no IP address lease time option in DHCPOFFER");
                    return;
                }
                if !self.read_addr(msg, DhcpOptionKind::SubnetMask) {
                    log::error!("no network mask option in DHCPOFFER");
                    return;
                }
                if !self.read_timer(msg, DhcpOptionKind::RenewalTime) {
                    log::error!("no renewal time option in DHCPOFFER");
                    return;
                }
                if !self.read_timer(msg, DhcpOptionKind::RebindingTime) {
                    log::error!("no rebinding time option in DHCPOFFER");
                    return;
                }

                self.read_domain_name(msg);
                self.read_addr(msg, DhcpOptionKind::Router);
                self.read_dns(msg);
            }
            DhcpMessageKind::Ack => {
                if !self.read_addr(msg, DhcpOptionKind::ServerIdentifier) {
                    log::error!("no server id option in DHCPACK");
                    return;
                }
                self.read_timer(msg, DhcpOptionKind::IpAddressLeaseTime);
                self.read_timer(msg, DhcpOptionKind::RenewalTime);
                self.read_timer(msg, DhcpOptionKind::RebindingTime);
                self.read_addr(msg, DhcpOptionKind::SubnetMask);
                self.read_addr(msg, DhcpOptionKind::Router);
                self.read_dns(msg);
                self.read_domain_name(msg);

                self.last_updated = now;
            }
            DhcpMessageKind::Discover
            | DhcpMessageKind::Request
            | DhcpMessageKind::Decline
            | DhcpMessageKind::Nak
            | DhcpMessageKind::Release
            | DhcpMessageKind::Inform => {}
            DhcpMessageKind::Unknown(other) => {
                log::error!("unknown message type {other}");
            }
        }
    }

    /// Read a 4-byte address option into the matching lease field.
    /// Returns false if the option is absent or malformed.
    fn read_addr(&mut self, msg: &DhcpPacket, code: DhcpOptionKind) -> bool {
        let mut value = [0_u8; 4];
        if msg.get_option(code, &mut value).is_none() {
            return false;
        }
        let addr = IpV4Addr::new(value);
        match code {
            DhcpOptionKind::ServerIdentifier => self.server_id = addr,
            DhcpOptionKind::SubnetMask => self.netmask = addr,
            DhcpOptionKind::Router => self.router = addr,
            _ => return false,
        }
        true
    }

    /// Read a 4-byte timer option, keeping the value in wire order.
    fn read_timer(&mut self, msg: &DhcpPacket, code: DhcpOptionKind) -> bool {
        let mut value = [0_u8; 4];
        if msg.get_option(code, &mut value).is_none() {
            return false;
        }
        let raw = u32::from_ne_bytes(value);
        match code {
            DhcpOptionKind::IpAddressLeaseTime => self.lease_time = raw,
            DhcpOptionKind::RenewalTime => self.renewal_time = raw,
            DhcpOptionKind::RebindingTime => self.rebinding_time = raw,
            _ => return false,
        }
        true
    }

    fn read_dns(&mut self, msg: &DhcpPacket) {
        let mut value = [0_u8; 4 * MAX_DNS_COUNT];
        if let Some(len) = msg.get_option(DhcpOptionKind::DomainNameServers, &mut value) {
            let copied = len.min(value.len());
            for (slot, chunk) in self.dns.iter_mut().zip(value[..copied].chunks_exact(4)) {
                *slot = IpV4Addr::new([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
        }
    }

    fn read_domain_name(&mut self, msg: &DhcpPacket) {
        let mut value = [0_u8; MAX_DOMAIN_NAME];
        if let Some(len) = msg.get_option(DhcpOptionKind::DomainName, &mut value) {
            let copied = len.min(value.len());
            self.domain_name[..copied].copy_from_slice(&value[..copied]);
        }
    }
}

/// Append-only pool of every lease this run has started acquiring.
/// Iteration order is insertion order.
#[derive(Debug, Default)]
pub struct LeaseRegistry {
    leases: Vec<Lease>,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed lease for `mac` with a fresh random xid, append it
    /// and hand it back for the acquisition conversation.
    pub fn create(&mut self, mac: MacAddr) -> &mut Lease {
        self.leases.push(Lease::new(rand::rng().random(), mac));
        let last = self.leases.len() - 1;
        &mut self.leases[last]
    }

    pub fn first(&self) -> Option<&Lease> {
        self.leases.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lease> {
        self.leases.iter()
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Release every lease. Only called on shutdown.
    pub fn clear(&mut self) {
        self.leases.clear();
    }

    /// Walk the pool once and call `renew` on each lease that is due.
    ///
    /// `renew` reports `Some(true)` for a successful renewal, `Some(false)`
    /// for a failed one, and `None` to abandon the sweep (shutdown). At most
    /// `max_renewals` successful renewals happen per sweep; the count is
    /// returned.
    pub fn sweep_renewals<F>(&mut self, now: u32, max_renewals: usize, mut renew: F) -> usize
    where
        F: FnMut(&mut Lease) -> Option<bool>,
    {
        let mut renewed = 0;

        for lease in self.leases.iter_mut() {
            if !lease.due_for_renewal(now) {
                continue;
            }
            match renew(lease) {
                Some(true) => {
                    renewed += 1;
                    if renewed >= max_renewals {
                        break;
                    }
                }
                Some(false) => {}
                None => break,
            }
        }

        renewed
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dhcp::protocol::DhcpOperation;
    use crate::dhcp::{MAGIC_COOKIE, MAX_OPTIONS_SIZE};
    use crate::ByteArray;

    fn reply(xid: u32, yiaddr: IpV4Addr) -> DhcpPacket {
        let mut options = [0_u8; MAX_OPTIONS_SIZE];
        options[..4].copy_from_slice(&MAGIC_COOKIE);
        DhcpPacket {
            op: DhcpOperation::Reply,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid,
            secs: 0,
            flags: 0,
            ciaddr: IpV4Addr::ANY,
            yiaddr,
            siaddr: IpV4Addr::ANY,
            giaddr: IpV4Addr::ANY,
            chaddr: ByteArray::default(),
            sname: ByteArray::default(),
            file: ByteArray::default(),
            options: ByteArray(options),
        }
    }

    fn offer(xid: u32) -> DhcpPacket {
        let mut msg = reply(xid, IpV4Addr::new([192, 168, 1, 50]));
        msg.add_option(DhcpOptionKind::DhcpMessageType, &[2]).unwrap();
        msg.add_option(DhcpOptionKind::ServerIdentifier, &[0xC0, 0xA8, 0x01, 0x01])
            .unwrap();
        msg.add_option(DhcpOptionKind::IpAddressLeaseTime, &[0, 0, 0x0E, 0x10])
            .unwrap();
        msg.add_option(DhcpOptionKind::SubnetMask, &[0xFF, 0xFF, 0xFF, 0x00])
            .unwrap();
        msg.add_option(DhcpOptionKind::RenewalTime, &[0, 0, 0x07, 0x08])
            .unwrap();
        msg.add_option(DhcpOptionKind::RebindingTime, &[0, 0, 0x0C, 0x4E])
            .unwrap();
        msg
    }

    #[test]
    fn test_offer_merge() {
        let mut lease = Lease::new(42, MacAddr::new([0, 0x16, 0x36, 1, 2, 3]));
        lease.apply(&offer(42), 1_000_000);

        assert_eq!(lease.client_addr, IpV4Addr::new([192, 168, 1, 50]));
        assert_eq!(lease.server_id, IpV4Addr::new([192, 168, 1, 1]));
        assert_eq!(lease.lease_secs(), 3600);
        assert_eq!(lease.netmask, IpV4Addr::new([255, 255, 255, 0]));
        assert_eq!(lease.renewal_secs(), 1800);
        assert_eq!(lease.rebinding_secs(), 3150);
        // Still mid-acquisition until the ACK
        assert_eq!(lease.last_updated, 0);
    }

    #[test]
    fn test_ack_completes_acquisition() {
        let mut lease = Lease::new(42, MacAddr::ANY);
        lease.apply(&offer(42), 0);

        let mut ack = reply(42, IpV4Addr::ANY);
        ack.add_option(DhcpOptionKind::DhcpMessageType, &[5]).unwrap();
        ack.add_option(DhcpOptionKind::ServerIdentifier, &[0xC0, 0xA8, 0x01, 0x01])
            .unwrap();
        lease.apply(&ack, 1_234_567);

        assert_eq!(lease.last_updated, 1_234_567);
        // OFFER-derived fields survive an ACK that does not repeat them
        assert_eq!(lease.client_addr, IpV4Addr::new([192, 168, 1, 50]));
        assert_eq!(lease.lease_secs(), 3600);
        assert_eq!(lease.renewal_secs(), 1800);
    }

    #[test]
    fn test_offer_missing_mandatory_aborts() {
        let mut msg = reply(7, IpV4Addr::new([10, 0, 0, 99]));
        msg.add_option(DhcpOptionKind::DhcpMessageType, &[2]).unwrap();
        msg.add_option(DhcpOptionKind::ServerIdentifier, &[10, 0, 0, 1])
            .unwrap();
        // No lease time: merge stops there

        let mut lease = Lease::new(7, MacAddr::ANY);
        lease.apply(&msg, 99);

        assert_eq!(lease.client_addr, IpV4Addr::new([10, 0, 0, 99]));
        assert_eq!(lease.server_id, IpV4Addr::new([10, 0, 0, 1]));
        assert_eq!(lease.lease_time, 0);
        assert_eq!(lease.netmask, IpV4Addr::ANY);
        assert_eq!(lease.last_updated, 0);
    }

    #[test]
    fn test_nak_leaves_lease_untouched() {
        let mut lease = Lease::new(42, MacAddr::ANY);
        lease.apply(&offer(42), 0);
        let before = lease.clone();

        let mut nak = reply(42, IpV4Addr::new([1, 2, 3, 4]));
        nak.add_option(DhcpOptionKind::DhcpMessageType, &[6]).unwrap();
        nak.add_option(DhcpOptionKind::ServerIdentifier, &[9, 9, 9, 9])
            .unwrap();
        lease.apply(&nak, 55);

        assert_eq!(lease.client_addr, before.client_addr);
        assert_eq!(lease.server_id, before.server_id);
        assert_eq!(lease.last_updated, 0);
    }

    #[test]
    fn test_renewal_eligibility() {
        let now = 1_000_000;
        let mut lease = Lease::new(1, MacAddr::ANY);
        lease.renewal_time = 60_u32.to_be();

        // Acquisition still in flight
        lease.last_updated = 0;
        assert!(!lease.due_for_renewal(now));

        // 25 s old: past a third of T1
        lease.last_updated = now - 25;
        assert!(lease.due_for_renewal(now));

        // 15 s old: not yet
        lease.last_updated = now - 15;
        assert!(!lease.due_for_renewal(now));

        // 120 s old: window missed, skip forever
        lease.last_updated = now - 120;
        assert!(!lease.due_for_renewal(now));
    }

    #[test]
    fn test_registry_is_append_only_in_order() {
        let mut registry = LeaseRegistry::new();
        let macs = [
            MacAddr::new([0, 0x16, 0x36, 0, 0, 1]),
            MacAddr::new([0, 0x16, 0x36, 0, 0, 2]),
            MacAddr::new([0, 0x16, 0x36, 0, 0, 3]),
        ];
        for mac in macs {
            registry.create(mac);
        }

        assert_eq!(registry.len(), 3);
        let seen: Vec<MacAddr> = registry.iter().map(|lease| lease.mac).collect();
        assert_eq!(seen, macs);
        assert_eq!(registry.first().map(|lease| lease.mac), Some(macs[0]));

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sweep_caps_successful_renewals() {
        let now = 1_000_000;
        let mut registry = LeaseRegistry::new();
        for i in 0..5 {
            let lease = registry.create(MacAddr::new([0, 0x16, 0x36, 0, 0, i]));
            lease.renewal_time = 60_u32.to_be();
            lease.last_updated = now - 30;
        }

        let mut calls = 0;
        let renewed = registry.sweep_renewals(now, 2, |_lease| {
            calls += 1;
            Some(true)
        });
        assert_eq!(renewed, 2);
        assert_eq!(calls, 2);

        // Failed renewals do not count against the cap
        let mut calls = 0;
        let renewed = registry.sweep_renewals(now, 2, |_lease| {
            calls += 1;
            Some(calls > 3)
        });
        assert_eq!(renewed, 2);
        assert_eq!(calls, 5);

        // A sweep abandons on None
        let mut calls = 0;
        registry.sweep_renewals(now, 10, |_lease| {
            calls += 1;
            None
        });
        assert_eq!(calls, 1);
    }
}
