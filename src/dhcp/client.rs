//! Per-lease client conversations: acquire a fresh lease, renew a held one.
//!
//! Each conversation is a bounded retry of one transaction. Failures are
//! terminal for the attempt but never for the program; the caller just
//! moves on to the next lease or the next synthetic MAC.

use crate::dhcp::{DhcpMessageKind, DhcpPacket};
use crate::lease::{unix_now, Lease};
use crate::txn::Transactor;
use crate::DhcpError;

use std::time::Duration;

/// How long one transaction waits for a reply. Kept small to bound the
/// overall cycle time.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Transaction attempts per phase.
pub const REQUEST_RETRIES: u32 = 2;

/// Run one phase: build the message fresh each attempt and send it until a
/// reply arrives or the retries run out.
fn converse<B>(
    txn: &Transactor<'_>,
    lease: &Lease,
    phase: &str,
    timeout: Duration,
    retries: u32,
    build: B,
) -> Result<Option<DhcpPacket>, DhcpError>
where
    B: Fn(&Lease) -> Result<DhcpPacket, DhcpError>,
{
    for _attempt in 0..retries {
        let msg = build(lease)?;
        let size = msg.packet_size()?;
        if let Some(reply) = txn.send_and_wait(&msg, size, None, timeout)? {
            return Ok(Some(reply));
        }
    }
    log::debug!(
        "did not receive DHCP reply for {phase} for {} in {retries} retries",
        lease.mac
    );
    Ok(None)
}

/// Acquire an address for the fresh `lease`: DISCOVER until an OFFER lands,
/// then REQUEST until the server answers. `Ok(true)` once the ACK is merged
/// into the lease; `Ok(false)` leaves the lease mid-acquisition for good.
pub fn request_lease(
    txn: &Transactor<'_>,
    lease: &mut Lease,
    timeout: Duration,
    retries: u32,
) -> Result<bool, DhcpError> {
    let Some(offer) = converse(txn, lease, "DHCPDISCOVER", timeout, retries, |lease| {
        DhcpPacket::make_discover(lease, true)
    })?
    else {
        return Ok(false);
    };
    lease.apply(&offer, unix_now());

    let Some(reply) = converse(txn, lease, "DHCPREQUEST", timeout, retries, |lease| {
        DhcpPacket::make_request(lease, true)
    })?
    else {
        return Ok(false);
    };

    match reply.message_kind() {
        Some(DhcpMessageKind::Ack) => {
            lease.apply(&reply, unix_now());
            log::info!(
                "got address {} for {} from {}",
                lease.client_addr,
                lease.mac,
                lease.server_id
            );
            Ok(true)
        }
        Some(DhcpMessageKind::Nak) => {
            log::info!(
                "got DHCPNAK reply when requesting address for {} from {}",
                lease.mac,
                lease.server_id
            );
            Ok(false)
        }
        Some(other) => {
            log::info!(
                "got {other} reply when requesting address for {} from {}",
                lease.mac,
                lease.server_id
            );
            Ok(false)
        }
        None => {
            log::error!("no message type option in DHCP reply");
            Ok(false)
        }
    }
}

/// Extend a held lease with a broadcast renewal REQUEST. `Ok(true)` and a
/// fresh `last_updated` on ACK; anything else leaves the lease as it was.
pub fn renew_lease(
    txn: &Transactor<'_>,
    lease: &mut Lease,
    timeout: Duration,
    retries: u32,
) -> Result<bool, DhcpError> {
    let Some(reply) = converse(txn, lease, "lease renewal", timeout, retries, |lease| {
        DhcpPacket::make_renew(lease, true)
    })?
    else {
        return Ok(false);
    };

    match reply.message_kind() {
        Some(DhcpMessageKind::Ack) => {
            lease.apply(&reply, unix_now());
            log::debug!(
                "renewed lease with address {} for {}",
                lease.client_addr,
                lease.mac
            );
            Ok(true)
        }
        Some(DhcpMessageKind::Nak) => {
            log::debug!(
                "got DHCPNAK reply when renewing lease with address {}",
                lease.client_addr
            );
            Ok(false)
        }
        Some(other) => {
            log::debug!(
                "got {other} reply when renewing lease with address {}",
                lease.client_addr
            );
            Ok(false)
        }
        None => {
            log::error!("no message type option in DHCP reply");
            Ok(false)
        }
    }
}
